//! Monotonic time source and deadline arithmetic.
//!
//! All scheduling is expressed in nanoseconds on a monotonic clock, so
//! adjustments to the wall clock never move a deadline. Comparisons between
//! timestamps go through signed 64-bit differences, which stay correct
//! across wraparound of the underlying counter.

use core::fmt;
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Largest delay or period the engine accepts, in nanoseconds.
///
/// Anything longer would make the signed difference between `now` and the
/// deadline overflow, turning a far-future deadline into a past one.
pub const MAX_SPAN_NANOS: u64 = i64::MAX as u64;

/// Point in time on a monotonic clock, in nanoseconds since the clock's origin.
///
/// There is no `Ord`: the counter wraps, so timestamps are compared with
/// [`until`](Self::until) or [`has_reached`](Self::has_reached).
///
/// ```compile_fail
/// use runloop::Timestamp;
/// let _ = Timestamp::ZERO < Timestamp::from_nanos(1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The clock's origin.
    pub const ZERO: Self = Self(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the timestamp `nanos` later, wrapping around the counter.
    pub const fn add_nanos(self, nanos: u64) -> Self {
        Self(self.0.wrapping_add(nanos))
    }

    /// Returns the timestamp `span` later. Spans beyond [`MAX_SPAN_NANOS`] are clamped.
    pub fn after(self, span: Duration) -> Self {
        self.add_nanos(span_nanos(span))
    }

    /// Signed nanoseconds from `self` until `deadline`.
    ///
    /// Zero or negative means the deadline has been reached.
    pub const fn until(self, deadline: Timestamp) -> i64 {
        deadline.0.wrapping_sub(self.0) as i64
    }

    /// Returns `true` once `deadline` is at or before `self`.
    pub const fn has_reached(self, deadline: Timestamp) -> bool {
        self.until(deadline) <= 0
    }

    /// Nanoseconds elapsed since `earlier`, or zero if `earlier` is in the future.
    pub const fn saturating_since(self, earlier: Timestamp) -> u64 {
        let delta = earlier.until(self);
        if delta > 0 {
            delta as u64
        } else {
            0
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}s", self.0 / 1_000_000_000, self.0 % 1_000_000_000)
    }
}

/// Converts a duration to nanoseconds, clamped to [`MAX_SPAN_NANOS`].
pub fn span_nanos(span: Duration) -> u64 {
    u64::try_from(span.as_nanos())
        .unwrap_or(u64::MAX)
        .min(MAX_SPAN_NANOS)
}

/// Source of monotonic timestamps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// The process's monotonic clock, counted from the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(span_nanos(self.origin.elapsed()))
    }
}

/// Clock that only moves when told to.
///
/// Useful for driving timer bookkeeping deterministically; a timer thread
/// sleeping against a manual clock still waits in real time.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            nanos: AtomicU64::new(start.as_nanos()),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.nanos.store(now.as_nanos(), Ordering::SeqCst);
    }

    pub fn advance(&self, span: Duration) {
        self.nanos.fetch_add(span_nanos(span), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.nanos.load(Ordering::SeqCst))
    }
}
