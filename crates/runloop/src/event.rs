//! Callbacks and the events that carry them.
//!
//! A callback is an argument-free unit of work. Its identity is the `Arc`
//! it lives in, so one callback can be queued many times, from many
//! threads, and a periodic timer can hand the same callback to the queue on
//! every fire.

use core::fmt;

use crate::sync::Arc;

/// Shared, argument-free unit of work.
pub type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Wraps a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A callback waiting in the queue for dispatch.
///
/// Events carry nothing but their callback; their position in the queue is
/// their only meaning.
pub struct Event {
    callback: Callback,
}

impl Event {
    pub fn new(callback: Callback) -> Self {
        Self { callback }
    }

    /// Runs the callback, consuming the event.
    pub fn dispatch(self) {
        (self.callback)();
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("callback", &Arc::as_ptr(&self.callback))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_callback_dispatches_through_many_events() {
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = hits.clone();
        let cb = callback(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        });

        Event::new(cb.clone()).dispatch();
        Event::new(cb.clone()).dispatch();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(Arc::strong_count(&cb), 1);
    }
}
