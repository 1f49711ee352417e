//! Microtask checkpoint.
//!
//! The scheduler batches work per "tick": everything queued before the next
//! checkpoint is flushed together. The checkpoint is explicit here. Callbacks
//! are queued on a thread-local FIFO with [`queue_microtask`] and run by
//! [`run_microtasks`], either directly or by awaiting [`next_tick`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::trace;

type Microtask = Box<dyn FnOnce()>;

thread_local! {
    static MICROTASKS: RefCell<VecDeque<Microtask>> = RefCell::new(VecDeque::new());
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Queue `f` to run at the next checkpoint, after everything queued before.
pub fn queue_microtask(f: impl FnOnce() + 'static) {
    MICROTASKS.with(|tasks| tasks.borrow_mut().push_back(Box::new(f)));
}

pub fn has_pending_microtasks() -> bool {
    MICROTASKS.with(|tasks| !tasks.borrow().is_empty())
}

/// Run queued microtasks until none are left, including ones queued while
/// draining.
///
/// Calls made while already draining return immediately. A panicking
/// microtask propagates; the ones behind it stay queued.
pub fn run_microtasks() {
    if DRAINING.with(|draining| draining.replace(true)) {
        return;
    }

    struct Reset;

    impl Drop for Reset {
        fn drop(&mut self) {
            DRAINING.with(|draining| draining.set(false));
        }
    }

    let _reset = Reset;
    let mut ran = 0usize;
    while let Some(task) = MICROTASKS.with(|tasks| tasks.borrow_mut().pop_front()) {
        task();
        ran += 1;
    }
    if ran > 0 {
        trace!(ran, "microtasks drained");
    }
}

/// Completes once the pending flush (and every other queued microtask) has
/// run.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    _private: (),
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        run_microtasks();
        Poll::Ready(())
    }
}

/// Wait for the in-flight flush.
pub fn next_tick() -> NextTick {
    NextTick::default()
}

/// Run `f` after the in-flight flush, then complete.
pub fn next_tick_with(f: impl FnOnce() + 'static) -> NextTick {
    queue_microtask(f);
    NextTick::default()
}
