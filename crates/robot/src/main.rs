//! Simulated robot controller.
//!
//! Bootstraps the run loop with a driver station, a debounced ball sensor
//! and a tank-drive control loop, then hands the main thread to the
//! dispatcher for the rest of the process.

mod control;
mod hal;
mod robot;

use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::info;
use parking_lot::Mutex;
use runloop::{
    callback, Component, OrFatal, RunLoop, RunLoopConfig, TimerConfig, TimerEngine, TraceHook,
    TraceRecord,
};
use tracing_subscriber::EnvFilter;

use crate::control::{PwmSpec, SERVO, TALON_SR, VICTOR_SP};
use crate::hal::{DriverStation, GpioInput, MatchSchedule, SimulatedSignal};
use crate::robot::{Robot, RobotSettings};

const BALL_SENSOR_PIN: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Controller {
    TalonSr,
    VictorSp,
    Servo,
}

impl Controller {
    fn spec(self) -> PwmSpec {
        match self {
            Self::TalonSr => TALON_SR,
            Self::VictorSp => VICTOR_SP,
            Self::Servo => SERVO,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Simulated robot controller on the runloop core")]
struct Opts {
    /// Control loop period.
    #[arg(long = "control-period", default_value_t = 10, value_name = "MS")]
    control_period_ms: u64,

    /// Driver-station packet period.
    #[arg(long = "ds-period", default_value_t = 20, value_name = "MS")]
    ds_period_ms: u64,

    /// Longest the timer thread sleeps without re-checking its timers.
    #[arg(long = "max-sleep", default_value_t = 10_000, value_name = "MS")]
    max_sleep_ms: u64,

    /// Queue depth that triggers a backlog warning (0 disables it).
    #[arg(long = "backlog-warning", default_value_t = 1024, value_name = "EVENTS")]
    backlog_warning: usize,

    #[arg(long = "debounce", default_value_t = 5, value_name = "MS")]
    debounce_ms: u64,

    #[arg(long = "disabled-for", default_value_t = 1_000, value_name = "MS")]
    disabled_ms: u64,

    #[arg(long = "auto-for", default_value_t = 3_000, value_name = "MS")]
    auto_ms: u64,

    /// Ball sensor toggle interval.
    #[arg(long = "ball-every", default_value_t = 1_500, value_name = "MS")]
    ball_every_ms: u64,

    /// Speed controller on both drive channels.
    #[arg(long, value_enum, default_value_t = Controller::TalonSr)]
    controller: Controller,

    /// Exit cleanly after this long.
    #[arg(long = "run-for", value_name = "MS")]
    run_for_ms: Option<u64>,
}

impl Opts {
    fn run_loop_config(&self) -> RunLoopConfig {
        let builder = RunLoopConfig::builder().name("robot");
        let builder = match self.backlog_warning {
            0 => builder.no_backlog_warning(),
            depth => builder.backlog_warning(depth),
        };
        builder.build()
    }

    fn timer_config(&self) -> TimerConfig {
        TimerConfig::builder()
            .thread_name("robot-timers")
            .max_sleep(Duration::from_millis(self.max_sleep_ms))
            .build()
    }

    fn settings(&self) -> RobotSettings {
        RobotSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            ..RobotSettings::default()
        }
    }

    fn schedule(&self) -> MatchSchedule {
        MatchSchedule {
            disabled: Duration::from_millis(self.disabled_ms),
            autonomous: Duration::from_millis(self.auto_ms),
        }
    }

    fn ball_signal(&self) -> SimulatedSignal {
        SimulatedSignal {
            toggle_every: Duration::from_millis(self.ball_every_ms),
            bounces: 4,
            bounce_gap: Duration::from_micros(300),
        }
    }
}

/// Dispatch and timer counts collected through the trace hooks.
#[derive(Default)]
struct Stats {
    dispatched: AtomicU64,
    periodic: AtomicU64,
    one_shot: AtomicU64,
}

impl Stats {
    fn hook(self: &Arc<Self>) -> TraceHook {
        let stats = Arc::clone(self);
        Arc::new(move |record: &TraceRecord| {
            let counter = match record {
                TraceRecord::Dispatched => &stats.dispatched,
                TraceRecord::PeriodicFired { .. } => &stats.periodic,
                TraceRecord::OneShotFired { .. } => &stats.one_shot,
                _ => return,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn log(&self) {
        info!(
            "dispatched {} callbacks ({} periodic, {} one-shot timer fires)",
            self.dispatched.load(Ordering::Relaxed),
            self.periodic.load(Ordering::Relaxed),
            self.one_shot.load(Ordering::Relaxed),
        );
    }
}

/// Everything that starts once the dispatcher is running.
struct Bootstrap {
    timers: TimerEngine,
    ds: Arc<DriverStation>,
    ball_sensor: Arc<GpioInput>,
    ds_period: Duration,
    schedule: MatchSchedule,
    ball_signal: SimulatedSignal,
    run_for: Option<Duration>,
}

impl Bootstrap {
    fn start(self, run_loop: &Arc<RunLoop>, robot: &Arc<Robot>, stats: &Arc<Stats>) {
        let handle = self
            .timers
            .start()
            .or_fatal(Component::Timers, "cannot start timer thread");
        let scheduler = handle.scheduler();
        robot.adopt_timers(handle);

        let on_update = {
            let robot = Arc::clone(robot);
            callback(move || robot.on_driver_station())
        };
        self.ds
            .start(run_loop.clone(), self.ds_period, self.schedule, on_update);

        let on_edge = {
            let robot = Arc::clone(robot);
            callback(move || robot.on_ball_edge())
        };
        self.ball_sensor
            .start_interrupt(run_loop.clone(), self.ball_signal, on_edge);

        if let Some(run_for) = self.run_for {
            let robot = Arc::clone(robot);
            let stats = Arc::clone(stats);
            scheduler.schedule_once(run_for, move || exit_cleanly(&robot, &stats));
        }
        info!("robot: started");
    }
}

fn exit_cleanly(robot: &Robot, stats: &Stats) -> ! {
    robot.shutdown();
    stats.log();
    log::logger().flush();
    process::exit(0)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let timer_config = opts.timer_config();
    timer_config.validate().context("invalid timer options")?;

    let stats = Arc::new(Stats::default());
    let run_loop = Arc::new(RunLoop::new(opts.run_loop_config()).with_trace_hook(stats.hook()));
    let mut timers =
        TimerEngine::with_config(run_loop.clone(), timer_config).with_trace_hook(stats.hook());

    let ds = Arc::new(DriverStation::new());
    let ball_sensor = Arc::new(GpioInput::new(BALL_SENSOR_PIN));
    let robot = Arc::new(Robot::new(
        ds.clone(),
        ball_sensor.clone(),
        opts.controller.spec(),
        timers.scheduler(),
        opts.settings(),
    ));

    {
        let robot = Arc::clone(&robot);
        timers
            .register_periodic(Duration::from_millis(opts.control_period_ms), move || {
                robot.control_tick()
            })
            .context("cannot register control loop")?;
    }

    {
        let run_loop = Arc::clone(&run_loop);
        let robot = Arc::clone(&robot);
        let stats = Arc::clone(&stats);
        ctrlc::set_handler(move || {
            let robot = Arc::clone(&robot);
            let stats = Arc::clone(&stats);
            run_loop.enqueue(move || exit_cleanly(&robot, &stats));
        })
        .context("cannot install Ctrl-C handler")?;
    }

    let bootstrap = Mutex::new(Some(Bootstrap {
        timers,
        ds,
        ball_sensor,
        ds_period: Duration::from_millis(opts.ds_period_ms),
        schedule: opts.schedule(),
        ball_signal: opts.ball_signal(),
        run_for: opts.run_for_ms.map(Duration::from_millis),
    }));

    let entry = {
        let run_loop = Arc::clone(&run_loop);
        move || {
            if let Some(bootstrap) = bootstrap.lock().take() {
                bootstrap.start(&run_loop, &robot, &stats);
            }
        }
    };
    run_loop.run_forever(entry)
}
