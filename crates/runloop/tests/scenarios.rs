//! End-to-end scenarios: real threads, real clock, dispatcher running forever.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use runloop::{RunLoop, TimerEngine, Timestamp, TraceRecord};

const MS: u64 = 1_000_000;

fn spawn_dispatcher() -> Arc<RunLoop> {
    let run_loop = Arc::new(RunLoop::default());
    let dispatcher = run_loop.clone();
    thread::spawn(move || dispatcher.run_forever(|| {}));
    run_loop
}

fn flush(run_loop: &RunLoop) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    run_loop.enqueue(move || {
        let _ = tx.lock().unwrap().send(());
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap();
}

#[test]
fn periodic_timer_fires_once_per_period_phase_locked_to_start() {
    let run_loop = spawn_dispatcher();
    let fires = Arc::new(Mutex::new(Vec::<(Timestamp, Timestamp)>::new()));
    let base = Arc::new(Mutex::new(None));
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let fires_probe = fires.clone();
    let base_probe = base.clone();
    let hook = move |record: &TraceRecord| {
        match *record {
            TraceRecord::TimerStarted { base } => *base_probe.lock().unwrap() = Some(base),
            TraceRecord::PeriodicFired { scheduled, now, .. } => {
                let mut fires = fires_probe.lock().unwrap();
                fires.push((scheduled, now));
                if fires.len() == 11 {
                    let _ = tx.lock().unwrap().send(());
                }
            }
            _ => {}
        }
    };
    let mut engine = TimerEngine::new(run_loop.clone()).with_trace_hook(Arc::new(hook));

    let counter_a = Arc::new(AtomicUsize::new(0));
    let counter = counter_a.clone();
    engine
        .register_periodic(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let timers = engine.start().unwrap();
    rx.recv_timeout(Duration::from_secs(10))
        .expect("periodic timer stopped firing");
    timers.shutdown();
    flush(&run_loop);

    let base = base.lock().unwrap().expect("timer thread never started");
    let fires = fires.lock().unwrap();

    for (i, (scheduled, now)) in fires.iter().enumerate() {
        let slot = base.add_nanos((i as u64 + 1) * 10 * MS);
        assert_eq!(*scheduled, slot, "fire {i} drifted off its slot");
        assert!(now.has_reached(*scheduled), "fire {i} ran early");
    }
    assert_eq!(counter_a.load(Ordering::SeqCst), fires.len());
}

#[test]
fn periodic_timer_fires_ten_or_eleven_times_in_105ms() {
    let run_loop = spawn_dispatcher();
    for round in 0..5 {
        let mut engine = TimerEngine::new(run_loop.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        engine
            .register_periodic(Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let started = Instant::now();
        let timers = engine.start().unwrap();
        thread::sleep(Duration::from_millis(105).saturating_sub(started.elapsed()));
        let fired = count.load(Ordering::SeqCst);
        timers.shutdown();

        assert!(
            (10..=11).contains(&fired),
            "round {round}: counter fired {fired} times in 105ms"
        );
    }
}

#[test]
fn one_shots_from_three_threads_fire_in_deadline_order() {
    let run_loop = spawn_dispatcher();
    let timers = TimerEngine::new(run_loop.clone()).start().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = mpsc::channel();
    let start = Arc::new(Barrier::new(3));

    let producers: Vec<_> = [30u64, 10, 20]
        .into_iter()
        .map(|delay| {
            let scheduler = timers.scheduler();
            let order = order.clone();
            let tx = Mutex::new(tx.clone());
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                scheduler.schedule_once(Duration::from_millis(delay), move || {
                    order.lock().unwrap().push(delay);
                    let _ = tx.lock().unwrap().send(());
                });
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    for _ in 0..3 {
        rx.recv_timeout(Duration::from_secs(10)).unwrap();
    }
    thread::sleep(Duration::from_millis(20));
    timers.shutdown();
    flush(&run_loop);

    assert_eq!(*order.lock().unwrap(), vec![10, 20, 30]);
    assert!(rx.try_recv().is_err(), "a one-shot fired twice");
}

#[test]
fn timers_and_producers_share_one_dispatcher() {
    let run_loop = spawn_dispatcher();
    let mut engine = TimerEngine::new(run_loop.clone());
    let in_callback = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let work = {
        let in_callback = in_callback.clone();
        let overlaps = overlaps.clone();
        let total = total.clone();
        Arc::new(move || {
            if in_callback.fetch_add(1, Ordering::SeqCst) != 0 {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            thread::yield_now();
            total.fetch_add(1, Ordering::SeqCst);
            in_callback.fetch_sub(1, Ordering::SeqCst);
        })
    };

    engine
        .register_periodic_callback(Duration::from_millis(1), work.clone())
        .unwrap();
    let timers = engine.start().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|_| {
            let run_loop = run_loop.clone();
            let scheduler = timers.scheduler();
            let work = work.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    run_loop.enqueue_callback(work.clone());
                    if i % 10 == 0 {
                        scheduler.schedule_once_callback(Duration::from_micros(i * 5), work.clone());
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    thread::sleep(Duration::from_millis(50));
    timers.shutdown();
    flush(&run_loop);

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(total.load(Ordering::SeqCst) >= 4 * 200 + 4 * 20);
}
