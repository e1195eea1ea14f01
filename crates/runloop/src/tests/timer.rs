use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TimerConfig;
use crate::runloop::RunLoop;
use crate::timer::TimerEngine;
use crate::trace::TraceRecord;

fn spawn_dispatcher() -> Arc<RunLoop> {
    let run_loop = Arc::new(RunLoop::default());
    let dispatcher = run_loop.clone();
    thread::spawn(move || dispatcher.run_forever(|| {}));
    run_loop
}

fn signal() -> (Mutex<mpsc::Sender<&'static str>>, mpsc::Receiver<&'static str>) {
    let (tx, rx) = mpsc::channel();
    (Mutex::new(tx), rx)
}

#[test]
fn one_shot_scheduled_before_start_fires_after_start() {
    let run_loop = spawn_dispatcher();
    let engine = TimerEngine::new(run_loop.clone());
    let (tx, rx) = signal();
    engine.schedule_once(Duration::from_millis(5), move || {
        let _ = tx.lock().unwrap().send("fired");
    });

    let timers = engine.start().unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok("fired"));
    assert_eq!(timers.scheduler().pending(), 0);
    timers.shutdown();
}

#[test]
fn callbacks_can_schedule_more_one_shots() {
    let run_loop = spawn_dispatcher();
    let timers = TimerEngine::new(run_loop.clone()).start().unwrap();
    let scheduler = timers.scheduler();
    let (tx, rx) = signal();
    let tx = Arc::new(tx);

    let inner = scheduler.clone();
    let loop_handle = run_loop.clone();
    scheduler.schedule_once(Duration::from_millis(2), move || {
        let tx = tx.clone();
        let again = tx.clone();
        inner.schedule_once(Duration::from_millis(2), move || {
            let _ = tx.lock().unwrap().send("timer");
        });
        loop_handle.enqueue(move || {
            let _ = again.lock().unwrap().send("queue");
        });
    });

    let mut got = vec![
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
        rx.recv_timeout(Duration::from_secs(10)).unwrap(),
    ];
    got.sort_unstable();
    assert_eq!(got, vec!["queue", "timer"]);
    timers.shutdown();
}

#[test]
fn idle_timer_thread_wakes_within_ceiling() {
    let run_loop = Arc::new(RunLoop::default());
    let wakes = Arc::new(AtomicUsize::new(0));
    let probe = wakes.clone();

    let timers = TimerEngine::with_config(
        run_loop,
        TimerConfig::builder()
            .max_sleep(Duration::from_millis(20))
            .build(),
    )
    .with_trace_hook(Arc::new(move |record: &TraceRecord| {
        if matches!(record, TraceRecord::TimerWoke { .. }) {
            probe.fetch_add(1, Ordering::SeqCst);
        }
    }))
    .start()
    .unwrap();

    thread::sleep(Duration::from_millis(200));
    timers.shutdown();

    assert!(
        wakes.load(Ordering::SeqCst) >= 3,
        "timer thread parked: {} wakes",
        wakes.load(Ordering::SeqCst)
    );
}

#[test]
fn sooner_one_shot_interrupts_long_sleep() {
    let run_loop = spawn_dispatcher();
    let timers = TimerEngine::new(run_loop.clone()).start().unwrap();
    let (tx, rx) = signal();

    timers.schedule_once(Duration::from_secs(5), || {});
    thread::sleep(Duration::from_millis(20));

    let started = Instant::now();
    timers.schedule_once(Duration::from_millis(10), move || {
        let _ = tx.lock().unwrap().send("soon");
    });

    assert_eq!(rx.recv_timeout(Duration::from_secs(4)), Ok("soon"));
    assert!(started.elapsed() < Duration::from_secs(4));
    timers.shutdown();
}

#[test]
fn shutdown_drops_pending_one_shots() {
    let run_loop = Arc::new(RunLoop::default());
    let timers = TimerEngine::new(run_loop.clone()).start().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let probe = fired.clone();

    timers.schedule_once(Duration::from_secs(30), move || {
        probe.fetch_add(1, Ordering::SeqCst);
    });

    let started = Instant::now();
    timers.shutdown();
    assert!(started.elapsed() < Duration::from_secs(5));

    run_loop.run_until_idle();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
