//! # runloop
//!
//! The run-time core of a robot control program: every piece of application
//! logic runs as a callback on one dispatcher thread, no matter which thread
//! produced it.
//!
//! ## Module Overview
//! - [`clock`]  – Monotonic nanosecond timestamps and wrap-aware deadline math.
//! - [`event`]  – Callbacks and the events that carry them through the queue.
//! - [`queue`]  – The locked FIFO shared by producers and the dispatcher.
//! - [`runloop`] – The dispatcher: `enqueue` from anywhere, `run_forever` on one thread.
//! - [`timer`]  – Periodic and one-shot timers delivered through the run loop.
//! - [`fatal`]  – Component-tagged diagnostics for unrecoverable conditions.
//!
//! Producers only ever need two operations: [`RunLoop::enqueue`] and
//! [`OneShotScheduler::schedule_once`]. Both are safe from any thread,
//! including from inside a dispatched callback.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod fatal;
pub mod queue;
pub mod runloop;
mod sync;
pub mod timer;
pub mod trace;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::{RunLoopConfig, RunLoopConfigBuilder, TimerConfig, TimerConfigBuilder};
pub use error::{ConfigError, TimerError};
pub use event::{callback, Callback, Event};
pub use fatal::{fatal, Component, OrFatal};
pub use runloop::{EventSink, RunLoop};
pub use timer::{OneShotScheduler, TimerEngine, TimerHandle};
pub use trace::{TraceHook, TraceRecord};

#[cfg(test)]
mod tests;
