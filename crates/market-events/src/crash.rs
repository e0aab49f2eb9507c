//! Handler crash capture
//!
//! `catch_unwind` hands back only the panic payload; the stack is gone by
//! the time the dispatch loop sees it. A process-wide panic hook, installed
//! once and chained to whatever hook was there before, records a backtrace
//! at the panic site while a [`CaptureGuard`] is active on the panicking
//! thread. The unwind ends in the same poll on the same thread, so the
//! dispatch loop picks the backtrace up right after the catch.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::sync::Once;

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Install the capturing panic hook. Later calls are no-ops.
pub(crate) fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            // Never panic inside the hook: TLS may already be torn down.
            if CAPTURING.try_with(Cell::get).unwrap_or(false) {
                let backtrace = Backtrace::force_capture();
                let _ = LAST_BACKTRACE.try_with(|slot| {
                    if let Ok(mut slot) = slot.try_borrow_mut() {
                        *slot = Some(backtrace);
                    }
                });
            }
            previous(info);
        }));
    });
}

/// Marks the current thread as running handler code until dropped.
pub(crate) struct CaptureGuard {
    previous: bool,
}

impl CaptureGuard {
    pub(crate) fn enter() -> Self {
        let previous = CAPTURING.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = CAPTURING.try_with(|flag| flag.set(previous));
    }
}

/// Take the backtrace recorded by the last captured panic on this thread.
pub(crate) fn take_backtrace() -> Option<Backtrace> {
    LAST_BACKTRACE
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
