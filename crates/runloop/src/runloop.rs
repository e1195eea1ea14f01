//! The dispatcher: one thread runs every callback, one at a time.
//!
//! Any thread may [`enqueue`](RunLoop::enqueue) work. The thread that calls
//! [`run_forever`](RunLoop::run_forever) becomes the dispatcher and stays in
//! the loop for the rest of the process. Because the queue lock is released
//! before each callback runs, callbacks can enqueue more work, schedule
//! timers, or re-enqueue themselves without deadlocking.

use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, trace, warn};

use crate::config::RunLoopConfig;
use crate::event::{Callback, Event};
use crate::fatal::{fatal, Component};
use crate::queue::EventQueue;
use crate::sync::Arc;
use crate::trace::{emit, TraceHook, TraceRecord};

/// Destination for fired timers and other produced work.
pub trait EventSink: Send + Sync {
    fn enqueue_callback(&self, callback: Callback);
}

/// Single-consumer callback queue plus the loop that drains it.
pub struct RunLoop {
    config: RunLoopConfig,
    queue: EventQueue,
    trace: Option<TraceHook>,
    dispatching: AtomicBool,
}

impl RunLoop {
    pub fn new(config: RunLoopConfig) -> Self {
        let queue = EventQueue::new(config.backlog_warning);
        Self {
            config,
            queue,
            trace: None,
            dispatching: AtomicBool::new(false),
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn config(&self) -> &RunLoopConfig {
        &self.config
    }

    /// Queues `f` for execution on the dispatcher thread.
    pub fn enqueue<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.enqueue_callback(Arc::new(f));
    }

    /// Queues a shared callback for execution on the dispatcher thread.
    pub fn enqueue_callback(&self, callback: Callback) {
        let pushed = self.queue.push(Event::new(callback));
        if pushed.crossed_backlog {
            warn!(
                "{}: {} events pending, dispatcher is falling behind",
                self.config.name, pushed.depth
            );
        }
        emit(&self.trace, TraceRecord::Enqueued { depth: pushed.depth });
    }

    /// Number of events waiting for dispatch.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Turns the calling thread into the dispatcher. Never returns.
    ///
    /// `entry` is queued ahead of anything produced after this call and is
    /// typically where the application starts its timers and hardware
    /// threads.
    pub fn run_forever<F>(&self, entry: F) -> !
    where
        F: Fn() + Send + Sync + 'static,
    {
        let _token = self.claim_dispatcher();
        info!("{}: entering run loop", self.config.name);
        self.enqueue(entry);
        loop {
            let event = self.queue.pop_blocking();
            self.dispatch(event);
        }
    }

    /// Dispatches the head event if there is one. Returns whether one ran.
    pub fn dispatch_once(&self) -> bool {
        let _token = self.claim_dispatcher();
        match self.queue.try_pop() {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Waits up to `timeout` for an event and dispatches it. Returns whether one ran.
    pub fn dispatch_timeout(&self, timeout: Duration) -> bool {
        let _token = self.claim_dispatcher();
        match self.queue.pop_timeout(timeout) {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Dispatches until the queue is empty, including work queued along the way.
    ///
    /// Returns the number of callbacks that ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.dispatch_once() {
            ran += 1;
        }
        ran
    }

    fn dispatch(&self, event: Event) {
        trace!("{}: dispatching {:?}", self.config.name, event);
        event.dispatch();
        emit(&self.trace, TraceRecord::Dispatched);
    }

    /// Marks the calling thread as the only dispatcher until the token drops.
    fn claim_dispatcher(&self) -> DispatchToken<'_> {
        if self.dispatching.swap(true, Ordering::AcqRel) {
            fatal(
                Component::RunLoop,
                format_args!(
                    "{}: dispatch attempted while another dispatch is running",
                    self.config.name
                ),
            );
        }
        DispatchToken(&self.dispatching)
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::new(RunLoopConfig::default())
    }
}

impl EventSink for RunLoop {
    fn enqueue_callback(&self, callback: Callback) {
        RunLoop::enqueue_callback(self, callback);
    }
}

struct DispatchToken<'a>(&'a AtomicBool);

impl Drop for DispatchToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
