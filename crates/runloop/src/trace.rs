//! Optional observation hooks for the run loop and timer engine.
//!
//! Hooks run synchronously on whichever thread produced the record (a
//! producer, the dispatcher, or the timer thread) and must not block. They
//! are never called with an internal lock held.

use crate::clock::Timestamp;
use crate::sync::Arc;

/// Something the core just did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceRecord {
    /// An event was appended; `depth` is the queue length afterwards.
    Enqueued { depth: usize },
    /// An event was popped and its callback finished running.
    Dispatched,
    /// The timer thread captured its base time and seeded the periodic timers.
    TimerStarted { base: Timestamp },
    /// Periodic timer `index` fired for the slot scheduled at `scheduled`.
    PeriodicFired {
        index: usize,
        scheduled: Timestamp,
        now: Timestamp,
    },
    /// A one-shot timer with the given deadline fired.
    OneShotFired { deadline: Timestamp, now: Timestamp },
    /// The timer thread began a pass over its timers.
    TimerWoke { now: Timestamp },
}

pub type TraceHook = Arc<dyn Fn(&TraceRecord) + Send + Sync>;

pub(crate) fn emit(hook: &Option<TraceHook>, record: TraceRecord) {
    if let Some(hook) = hook {
        hook(&record);
    }
}
