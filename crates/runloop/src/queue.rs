//! Multi-producer, single-consumer event queue.
//!
//! One mutex guards the pending events and one condition variable wakes the
//! consumer when the queue goes from empty to non-empty. Nothing here ever
//! runs a callback: the consumer pops an event, the guard is released, and
//! only then is the event dispatched.

use core::time::Duration;
use std::collections::VecDeque;
use std::time::Instant;

use crate::event::Event;
use crate::fatal::{fatal, Component};
use crate::sync::{Condvar, Mutex};

struct QueueState {
    events: VecDeque<Event>,
    backlogged: bool,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed {
    /// Queue length including the new event.
    pub depth: usize,
    /// `true` if this push took the queue past the backlog threshold.
    pub crossed_backlog: bool,
}

/// FIFO of pending events.
pub struct EventQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    backlog_warning: Option<usize>,
}

impl EventQueue {
    pub fn new(backlog_warning: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                backlogged: false,
            }),
            ready: Condvar::new(),
            backlog_warning,
        }
    }

    /// Appends an event at the tail and wakes the consumer.
    ///
    /// Running out of memory for the new slot is fatal.
    pub fn push(&self, event: Event) -> Pushed {
        let mut state = self.state.lock();
        if let Err(err) = state.events.try_reserve(1) {
            drop(state);
            fatal(Component::RunLoop, format_args!("cannot allocate event: {err}"));
        }
        state.events.push_back(event);
        let depth = state.events.len();

        let over = self.backlog_warning.is_some_and(|limit| depth > limit);
        let crossed_backlog = over && !state.backlogged;
        if crossed_backlog {
            state.backlogged = true;
        }

        self.ready.notify_one();
        Pushed {
            depth,
            crossed_backlog,
        }
    }

    /// Pops the head, blocking while the queue is empty.
    pub fn pop_blocking(&self) -> Event {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = self.take_head(&mut state) {
                return event;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Pops the head, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if let Some(event) = self.take_head(&mut state) {
                return Some(event);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return self.take_head(&mut state);
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Pops the head if there is one.
    pub fn try_pop(&self) -> Option<Event> {
        let mut state = self.state.lock();
        self.take_head(&mut state)
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }

    fn take_head(&self, state: &mut QueueState) -> Option<Event> {
        let event = state.events.pop_front()?;
        if state.backlogged
            && self
                .backlog_warning
                .map_or(true, |limit| state.events.len() <= limit)
        {
            state.backlogged = false;
        }
        Some(event)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(None)
    }
}
