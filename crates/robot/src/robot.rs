//! Application logic. Every method here runs on the dispatcher thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use runloop::{OneShotScheduler, TimerHandle};

use crate::control::{choose, deadzone, ramping_update, PwmSpec};
use crate::hal::{DriverStation, GpioInput, PwmOutput, RobotMode};

const LEFT_PWM: u8 = 1;
const RIGHT_PWM: u8 = 2;
const LEFT_AXIS: usize = 1;
const RIGHT_AXIS: usize = 5;
const TURBO_BUTTON: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotSettings {
    pub deadzone: f64,
    /// Largest change in motor speed per control tick.
    pub ramp_per_tick: f64,
    /// Teleop speed scale while the turbo button is released.
    pub cruise_scale: f64,
    pub auto_speed: f64,
    /// How long autonomous drives blind before it starts watching the ball sensor.
    pub auto_drive_for: Duration,
    pub debounce: Duration,
}

impl Default for RobotSettings {
    fn default() -> Self {
        Self {
            deadzone: 0.1,
            ramp_per_tick: 0.05,
            cruise_scale: 0.6,
            auto_speed: 0.5,
            auto_drive_for: Duration::from_millis(500),
            debounce: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum AutoPhase {
    #[default]
    Idle,
    Driving,
    WaitingForBall,
    Done,
}

#[derive(Debug, Default)]
struct DriveState {
    mode: RobotMode,
    auto: AutoPhase,
    left: f64,
    right: f64,
    ball_seen: bool,
    ticks: u64,
}

/// Tank-drive robot with a ball sensor.
pub struct Robot {
    ds: Arc<DriverStation>,
    ball_sensor: Arc<GpioInput>,
    left: PwmOutput,
    right: PwmOutput,
    timers: OneShotScheduler,
    settings: RobotSettings,
    state: Mutex<DriveState>,
    debounce_pending: AtomicBool,
    timer_handle: Mutex<Option<TimerHandle>>,
}

impl Robot {
    pub fn new(
        ds: Arc<DriverStation>,
        ball_sensor: Arc<GpioInput>,
        motors: PwmSpec,
        timers: OneShotScheduler,
        settings: RobotSettings,
    ) -> Self {
        Self {
            ds,
            ball_sensor,
            left: PwmOutput::new(LEFT_PWM, motors),
            right: PwmOutput::new(RIGHT_PWM, motors),
            timers,
            settings,
            state: Mutex::new(DriveState::default()),
            debounce_pending: AtomicBool::new(false),
            timer_handle: Mutex::new(None),
        }
    }

    /// Keeps the running timer engine so [`shutdown`](Self::shutdown) can stop it.
    pub fn adopt_timers(&self, handle: TimerHandle) {
        *self.timer_handle.lock() = Some(handle);
    }

    /// Reacts to a new driver-station packet.
    pub fn on_driver_station(self: &Arc<Self>) {
        let mode = self.ds.mode();
        let mut state = self.state.lock();
        if state.mode == mode {
            return;
        }
        info!("robot: entering {mode:?}");
        state.mode = mode;
        if mode == RobotMode::Autonomous {
            state.auto = AutoPhase::Driving;
            let robot = Arc::clone(self);
            self.timers
                .schedule_once(self.settings.auto_drive_for, move || robot.finish_blind_drive());
        } else {
            state.auto = AutoPhase::Idle;
        }
    }

    fn finish_blind_drive(&self) {
        let mut state = self.state.lock();
        if state.auto != AutoPhase::Driving {
            return;
        }
        state.auto = if state.ball_seen {
            AutoPhase::Done
        } else {
            AutoPhase::WaitingForBall
        };
        debug!("autonomous: blind drive over, now {:?}", state.auto);
    }

    /// Handles one ball-sensor edge.
    ///
    /// Edges within the debounce window collapse into one sample taken once
    /// the window closes.
    pub fn on_ball_edge(self: &Arc<Self>) {
        if self.debounce_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let robot = Arc::clone(self);
        self.timers
            .schedule_once(self.settings.debounce, move || robot.sample_ball_sensor());
    }

    fn sample_ball_sensor(&self) {
        self.debounce_pending.store(false, Ordering::Release);
        let level = self.ball_sensor.poll();
        let mut state = self.state.lock();
        if state.ball_seen == level {
            return;
        }
        state.ball_seen = level;
        debug!("ball sensor on gpio {}: {level}", self.ball_sensor.pin());
        if level && state.auto == AutoPhase::WaitingForBall {
            state.auto = AutoPhase::Done;
            info!("autonomous: ball collected, stopping");
        }
    }

    /// One pass of the periodic control loop.
    pub fn control_tick(&self) {
        let mut state = self.state.lock();
        state.ticks += 1;

        let (left, right) = match state.mode {
            RobotMode::Disabled | RobotMode::Test => {
                state.left = 0.0;
                state.right = 0.0;
                self.drive(0.0, 0.0);
                return;
            }
            RobotMode::Autonomous => {
                let moving = matches!(state.auto, AutoPhase::Driving | AutoPhase::WaitingForBall);
                let speed = choose(moving, self.settings.auto_speed, 0.0);
                (speed, speed)
            }
            RobotMode::Teleop => {
                let scale = choose(
                    self.ds.button(0, TURBO_BUTTON),
                    1.0,
                    self.settings.cruise_scale,
                );
                let zone = self.settings.deadzone;
                (
                    deadzone(-self.ds.axis(0, LEFT_AXIS), zone) * scale,
                    deadzone(-self.ds.axis(0, RIGHT_AXIS), zone) * scale,
                )
            }
        };

        let step = self.settings.ramp_per_tick;
        state.left = ramping_update(state.left, left, step);
        state.right = ramping_update(state.right, right, step);
        self.drive(state.left, state.right);

        if state.ticks % 500 == 0 {
            debug!(
                "tick {}: {:?} left {:.2} ({:.3}ms) right {:.2} ({:.3}ms)",
                state.ticks,
                state.mode,
                state.left,
                self.left.pulse_ms(),
                state.right,
                self.right.pulse_ms()
            );
        }
    }

    fn drive(&self, left: f64, right: f64) {
        self.left.set_speed(left);
        // The right gearbox is mirrored.
        self.right.set_speed(-right);
    }

    /// Disables the outputs and stops every producer thread.
    pub fn shutdown(&self) {
        self.left.set_speed(f64::NAN);
        self.right.set_speed(f64::NAN);
        self.ds.stop();
        self.ball_sensor.stop();
        if let Some(handle) = self.timer_handle.lock().take() {
            handle.shutdown();
        }
        info!(
            "robot: outputs disabled after {} control ticks",
            self.state.lock().ticks
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{pwm_map, TALON_SR};
    use crate::hal::{ControlWord, DsPacket};
    use runloop::{RunLoop, TimerEngine};

    fn robot() -> (Arc<Robot>, TimerEngine) {
        let engine = TimerEngine::new(Arc::new(RunLoop::default()));
        let robot = Robot::new(
            Arc::new(DriverStation::new()),
            Arc::new(GpioInput::new(1)),
            TALON_SR,
            engine.scheduler(),
            RobotSettings {
                ramp_per_tick: 0.25,
                ..RobotSettings::default()
            },
        );
        (Arc::new(robot), engine)
    }

    fn enter(robot: &Arc<Robot>, autonomous: bool, left_raw: i8, right_raw: i8) {
        let mut packet = DsPacket {
            word: ControlWord {
                enabled: true,
                ds_attached: true,
                autonomous,
                ..ControlWord::default()
            },
            ..DsPacket::default()
        };
        packet.sticks[0].axis_count = 6;
        packet.sticks[0].axes[LEFT_AXIS] = left_raw;
        packet.sticks[0].axes[RIGHT_AXIS] = right_raw;
        robot.ds.publish(packet);
        robot.on_driver_station();
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn teleop_ramps_toward_stick() {
        let (robot, _engine) = robot();
        enter(&robot, false, -128, 5);

        robot.control_tick();
        assert!(close(robot.state.lock().left, 0.25));
        assert_eq!(robot.state.lock().right, 0.0);

        for _ in 0..10 {
            robot.control_tick();
        }
        let cruise = robot.settings.cruise_scale;
        assert!(close(robot.state.lock().left, cruise));
        assert!(close(robot.left.pulse_ms(), pwm_map(cruise, &TALON_SR)));
        assert_eq!(robot.right.pulse_ms(), TALON_SR.rest);
    }

    #[test]
    fn disabled_stops_immediately() {
        let (robot, _engine) = robot();
        enter(&robot, false, -128, -128);
        for _ in 0..4 {
            robot.control_tick();
        }

        robot.ds.publish(DsPacket::default());
        robot.on_driver_station();
        robot.control_tick();

        assert_eq!(robot.left.pulse_ms(), TALON_SR.rest);
        assert_eq!(robot.right.pulse_ms(), TALON_SR.rest);
    }

    #[test]
    fn autonomous_drives_until_ball_arrives() {
        let (robot, engine) = robot();
        enter(&robot, true, 0, 0);
        assert_eq!(robot.state.lock().auto, AutoPhase::Driving);
        assert_eq!(engine.scheduler().pending(), 1);

        robot.control_tick();
        robot.control_tick();
        assert!(close(robot.state.lock().left, 0.5));

        robot.finish_blind_drive();
        assert_eq!(robot.state.lock().auto, AutoPhase::WaitingForBall);

        robot.ball_sensor.drive(true);
        robot.sample_ball_sensor();
        assert_eq!(robot.state.lock().auto, AutoPhase::Done);

        robot.control_tick();
        robot.control_tick();
        assert_eq!(robot.state.lock().left, 0.0);
    }

    #[test]
    fn bouncing_edges_share_one_sample() {
        let (robot, engine) = robot();
        for _ in 0..5 {
            robot.on_ball_edge();
        }
        assert_eq!(engine.scheduler().pending(), 1);

        robot.sample_ball_sensor();
        robot.on_ball_edge();
        assert_eq!(engine.scheduler().pending(), 2);
    }

    #[test]
    fn shutdown_disables_outputs() {
        let (robot, _engine) = robot();
        robot.shutdown();
        assert!(robot.left.pulse_ms().is_nan());
        assert!(robot.right.pulse_ms().is_nan());
    }
}
