//! Timer engine: turns monotonic deadlines into queued callbacks.
//!
//! Two registration disciplines share one timer thread:
//!
//! - **Periodic** timers are registered on the [`TimerEngine`] before
//!   [`start`](TimerEngine::start). `start` consumes the engine, so late
//!   registration does not compile. Each timer is phase-locked to the base
//!   time captured when the thread starts: its next fire time advances by
//!   exactly one period per fire, never by "now + period", so dispatch
//!   jitter never accumulates.
//! - **One-shot** timers are scheduled through a [`OneShotScheduler`] from
//!   any thread at any time, before or after start, including from inside
//!   callbacks. They fire in deadline order, ties in scheduling order.
//!
//! The periodic set is owned by the timer thread. The one-shot set has its
//! own mutex and condition variable, independent of the event queue's, and
//! the timer thread never holds it while handing a callback to the queue.

use core::cmp::Ordering;
use core::fmt;
use core::time::Duration;
use std::collections::binary_heap::{BinaryHeap, PeekMut};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, trace};

use crate::clock::{span_nanos, Clock, MonotonicClock, Timestamp};
use crate::config::TimerConfig;
use crate::error::TimerError;
use crate::event::Callback;
use crate::fatal::{fatal, Component};
use crate::runloop::EventSink;
use crate::sync::{Arc, Condvar, Mutex, MutexGuard};
use crate::trace::{emit, TraceHook, TraceRecord};

struct PeriodicTimer {
    period: u64,
    next_fire: Timestamp,
    callback: Callback,
}

struct OneShotTimer {
    /// Deadline as an offset from the list's epoch, so heap order is immune to clock wraparound.
    key: u64,
    seq: u64,
    deadline: Timestamp,
    callback: Callback,
}

impl OneShotTimer {
    fn rank(&self) -> (u64, u64) {
        (self.key, self.seq)
    }
}

impl PartialEq for OneShotTimer {
    fn eq(&self, other: &Self) -> bool {
        self.rank() == other.rank()
    }
}

impl Eq for OneShotTimer {}

impl PartialOrd for OneShotTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OneShotTimer {
    // Reversed: `BinaryHeap` is a max-heap and the earliest deadline must sit on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank().cmp(&self.rank())
    }
}

#[derive(Default)]
struct OneShotState {
    pending: BinaryHeap<OneShotTimer>,
    next_seq: u64,
    /// Deadline the timer thread is currently sleeping towards, if it is asleep.
    sleeping_until: Option<Timestamp>,
    stopped: bool,
}

struct OneShotList {
    epoch: Timestamp,
    state: Mutex<OneShotState>,
    wake: Condvar,
}

impl OneShotList {
    fn new(epoch: Timestamp) -> Self {
        Self {
            epoch,
            state: Mutex::new(OneShotState::default()),
            wake: Condvar::new(),
        }
    }

    /// Inserts a timer in deadline order. Returns whether the timer thread was woken.
    fn insert(&self, deadline: Timestamp, callback: Callback) -> bool {
        let mut state = self.state.lock();
        if let Err(err) = state.pending.try_reserve(1) {
            drop(state);
            fatal(
                Component::Timers,
                format_args!("cannot allocate one-shot timer: {err}"),
            );
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(OneShotTimer {
            key: deadline.as_nanos().wrapping_sub(self.epoch.as_nanos()),
            seq,
            deadline,
            callback,
        });

        let sooner = state
            .sleeping_until
            .is_some_and(|until| deadline.until(until) > 0);
        if sooner {
            self.wake.notify_one();
        }
        sooner
    }

    /// Hands every timer due at `now` to `sink`, earliest first.
    ///
    /// The lock is released around each hand-off so producers are never
    /// blocked behind the queue. Returns the re-acquired guard so the caller
    /// can go to sleep without missing an insertion, and lowers `shortest`
    /// to the time left until the next pending deadline.
    fn fire_due(
        &self,
        now: Timestamp,
        shortest: &mut i64,
        sink: &dyn EventSink,
        hook: &Option<TraceHook>,
    ) -> MutexGuard<'_, OneShotState> {
        let mut state = self.state.lock();
        loop {
            let Some(head) = state.pending.peek_mut() else {
                break;
            };
            if !now.has_reached(head.deadline) {
                break;
            }
            let timer = PeekMut::pop(head);
            MutexGuard::unlocked(&mut state, || {
                trace!("one-shot timer due at {} fired at {}", timer.deadline, now);
                sink.enqueue_callback(timer.callback);
                emit(
                    hook,
                    TraceRecord::OneShotFired {
                        deadline: timer.deadline,
                        now,
                    },
                );
            });
        }
        if let Some(head) = state.pending.peek() {
            *shortest = (*shortest).min(now.until(head.deadline));
        }
        state
    }

    fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.wake.notify_one();
    }
}

/// Handle for scheduling one-shot timers. Cheap to clone; safe from any thread.
#[derive(Clone)]
pub struct OneShotScheduler {
    list: Arc<OneShotList>,
    clock: Arc<dyn Clock>,
}

impl OneShotScheduler {
    /// Runs `f` on the dispatcher once `delay` has elapsed.
    pub fn schedule_once<F>(&self, delay: Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_once_callback(delay, Arc::new(f));
    }

    /// Queues `callback` on the dispatcher once `delay` has elapsed.
    ///
    /// Delays longer than about 292 years are clamped.
    pub fn schedule_once_callback(&self, delay: Duration, callback: Callback) {
        let deadline = self.clock.now().after(delay);
        if self.list.insert(deadline, callback) {
            trace!("one-shot timer due at {deadline} woke the timer thread");
        }
    }

    /// Number of one-shot timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.list.len()
    }
}

impl fmt::Debug for OneShotScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Timer engine in its registration phase.
pub struct TimerEngine {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: TimerConfig,
    periodic: Vec<PeriodicTimer>,
    one_shots: Arc<OneShotList>,
    trace: Option<TraceHook>,
}

impl TimerEngine {
    /// Creates an engine delivering to `sink` on the process's monotonic clock.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_config(sink, TimerConfig::default())
    }

    pub fn with_config(sink: Arc<dyn EventSink>, config: TimerConfig) -> Self {
        Self::with_clock(sink, config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(sink: Arc<dyn EventSink>, config: TimerConfig, clock: Arc<dyn Clock>) -> Self {
        let one_shots = Arc::new(OneShotList::new(clock.now()));
        Self {
            sink,
            clock,
            config,
            periodic: Vec::new(),
            one_shots,
            trace: None,
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    /// Registers `f` to run every `period`, starting one period after the engine starts.
    pub fn register_periodic<F>(&mut self, period: Duration, f: F) -> Result<(), TimerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register_periodic_callback(period, Arc::new(f))
    }

    pub fn register_periodic_callback(
        &mut self,
        period: Duration,
        callback: Callback,
    ) -> Result<(), TimerError> {
        let period = span_nanos(period);
        if period == 0 {
            return Err(TimerError::ZeroPeriod);
        }
        debug!(
            "registered periodic timer #{} every {}ns",
            self.periodic.len(),
            period
        );
        self.periodic.push(PeriodicTimer {
            period,
            next_fire: Timestamp::ZERO,
            callback,
        });
        Ok(())
    }

    /// Number of periodic timers registered so far.
    pub fn periodic_count(&self) -> usize {
        self.periodic.len()
    }

    /// Returns a handle for scheduling one-shot timers.
    ///
    /// Timers scheduled before [`start`](Self::start) fire once the thread is running.
    pub fn scheduler(&self) -> OneShotScheduler {
        OneShotScheduler {
            list: Arc::clone(&self.one_shots),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn schedule_once<F>(&self, delay: Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.scheduler().schedule_once(delay, f);
    }

    /// Spawns the timer thread. The periodic set is frozen from here on.
    pub fn start(self) -> Result<TimerHandle, TimerError> {
        self.config.validate()?;
        let scheduler = self.scheduler();
        let thread_name = self.config.thread_name.clone();
        let core = self.into_core();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || core.run())
            .map_err(TimerError::Spawn)?;
        info!("{thread_name}: timer thread started");
        Ok(TimerHandle { scheduler, thread })
    }

    fn into_core(self) -> TimerCore {
        TimerCore {
            sink: self.sink,
            clock: self.clock,
            periodic: self.periodic,
            one_shots: self.one_shots,
            max_sleep: span_nanos(self.config.max_sleep) as i64,
            trace: self.trace,
        }
    }
}

/// A running timer engine.
pub struct TimerHandle {
    scheduler: OneShotScheduler,
    thread: JoinHandle<()>,
}

impl TimerHandle {
    pub fn scheduler(&self) -> OneShotScheduler {
        self.scheduler.clone()
    }

    pub fn schedule_once<F>(&self, delay: Duration, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.scheduler.schedule_once(delay, f);
    }

    /// Stops the timer thread and waits for it to exit.
    ///
    /// One-shot timers still pending are dropped without firing. Callbacks
    /// already handed to the run loop are unaffected.
    pub fn shutdown(self) {
        self.scheduler.list.stop();
        if self.thread.join().is_err() {
            error!("timer thread panicked before shutdown");
        }
    }
}

/// State owned by the timer thread.
struct TimerCore {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    periodic: Vec<PeriodicTimer>,
    one_shots: Arc<OneShotList>,
    max_sleep: i64,
    trace: Option<TraceHook>,
}

impl TimerCore {
    fn run(mut self) {
        let base = self.clock.now();
        self.seed(base);
        emit(&self.trace, TraceRecord::TimerStarted { base });

        loop {
            let now = self.clock.now();
            emit(&self.trace, TraceRecord::TimerWoke { now });

            let mut shortest = self.max_sleep;
            self.fire_periodic(now, &mut shortest);
            let mut state =
                self.one_shots
                    .fire_due(now, &mut shortest, self.sink.as_ref(), &self.trace);
            if state.stopped {
                break;
            }

            let elapsed = self.clock.now().saturating_since(now);
            if let Some(sleep) = remaining_sleep(shortest, elapsed) {
                state.sleeping_until = Some(now.add_nanos(shortest as u64));
                self.one_shots
                    .wake
                    .wait_for(&mut state, Duration::from_nanos(sleep));
                state.sleeping_until = None;
                if state.stopped {
                    break;
                }
            }
        }
        info!("timer thread stopped");
    }

    /// Anchors every periodic timer one period after `base`.
    fn seed(&mut self, base: Timestamp) {
        for timer in &mut self.periodic {
            timer.next_fire = base.add_nanos(timer.period);
        }
    }

    /// Fires each periodic timer that is due, once, and lowers `shortest`
    /// to the time left until the nearest next fire.
    ///
    /// A timer that has fallen more than a period behind fires again on the
    /// next pass, which follows immediately because its remaining time is
    /// negative.
    fn fire_periodic(&mut self, now: Timestamp, shortest: &mut i64) {
        for (index, timer) in self.periodic.iter_mut().enumerate() {
            let mut remaining = now.until(timer.next_fire);
            if remaining <= 0 {
                let scheduled = timer.next_fire;
                self.sink.enqueue_callback(Arc::clone(&timer.callback));
                trace!("periodic timer #{index} slot {scheduled} fired at {now}");
                emit(
                    &self.trace,
                    TraceRecord::PeriodicFired {
                        index,
                        scheduled,
                        now,
                    },
                );
                timer.next_fire = timer.next_fire.add_nanos(timer.period);
                remaining = now.until(timer.next_fire);
            }
            *shortest = (*shortest).min(remaining);
        }
    }

    /// One full pass without sleeping. Returns the time until the next deadline.
    #[cfg(test)]
    fn poll(&mut self, now: Timestamp) -> i64 {
        let mut shortest = self.max_sleep;
        self.fire_periodic(now, &mut shortest);
        drop(
            self.one_shots
                .fire_due(now, &mut shortest, self.sink.as_ref(), &self.trace),
        );
        shortest
    }
}

/// How long to sleep given the time left at the start of a pass and the
/// time the pass itself took. `None` means go round again immediately.
fn remaining_sleep(shortest: i64, elapsed: u64) -> Option<u64> {
    let elapsed = i64::try_from(elapsed).unwrap_or(i64::MAX);
    let remaining = shortest.saturating_sub(elapsed);
    (remaining > 0).then_some(remaining as u64)
}
