//! Synchronization primitives shared by the run loop and the timer engine.
//!
//! Both the event queue and the one-shot timer set are guarded by
//! `parking_lot` locks. They never poison, so a callback that panics on the
//! dispatcher thread cannot wedge producers on other threads.

pub use parking_lot::{Condvar, Mutex, MutexGuard};
pub use std::sync::Arc;
