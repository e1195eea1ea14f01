//! Simulated robot I/O.
//!
//! Every source runs on its own thread and reaches application code only by
//! enqueueing callbacks on the run loop, the way interrupt handlers do on the
//! real controller. Readings are published into shared state first, so a
//! callback always sees the packet that triggered it or a newer one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use parking_lot::Mutex;
use runloop::{callback, fatal, Callback, Component, EventSink, OrFatal};

use crate::control::{axis_from_raw, pwm_map, PwmSpec};

pub const JOYSTICK_COUNT: usize = 6;
pub const AXIS_COUNT: usize = 12;
pub const MAX_BUTTONS: usize = 32;
pub const PWM_COUNT: usize = 20;
pub const GPIO_COUNT: usize = 26;

/// Driver-station control flags for one packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlWord {
    pub enabled: bool,
    pub autonomous: bool,
    pub test: bool,
    pub e_stop: bool,
    pub ds_attached: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RobotMode {
    #[default]
    Disabled,
    Autonomous,
    Teleop,
    Test,
}

impl RobotMode {
    pub fn from_control_word(word: ControlWord) -> Self {
        if !word.enabled || !word.ds_attached || word.e_stop {
            Self::Disabled
        } else if word.test {
            Self::Test
        } else if word.autonomous {
            Self::Autonomous
        } else {
            Self::Teleop
        }
    }
}

/// Raw state of one joystick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Joystick {
    pub axes: [i8; AXIS_COUNT],
    pub axis_count: usize,
    pub buttons: u32,
    pub button_count: usize,
}

/// One driver-station update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DsPacket {
    pub word: ControlWord,
    pub sticks: [Joystick; JOYSTICK_COUNT],
}

/// How long the simulated match spends in each phase before teleop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSchedule {
    pub disabled: Duration,
    pub autonomous: Duration,
}

impl MatchSchedule {
    /// Synthesizes the packet the driver station would send `elapsed` into the match.
    ///
    /// Stick 0 drives a slow tank-drive sweep on axes 1 and 5; button 0 is
    /// held during every other second of teleop.
    pub fn packet_at(&self, elapsed: Duration) -> DsPacket {
        let mut packet = DsPacket::default();
        packet.word.ds_attached = true;
        if elapsed < self.disabled {
            return packet;
        }
        packet.word.enabled = true;
        if elapsed < self.disabled + self.autonomous {
            packet.word.autonomous = true;
            return packet;
        }

        let t = (elapsed - self.disabled - self.autonomous).as_secs_f64();
        let stick = &mut packet.sticks[0];
        stick.axis_count = 6;
        stick.button_count = 12;
        stick.axes[1] = (-(t * 0.8).sin() * 127.0) as i8;
        stick.axes[5] = (-(t * 0.8).cos() * 127.0) as i8;
        if (t as u64) % 2 == 1 {
            stick.buttons = 1;
        }
        packet
    }
}

/// Latest driver-station data plus the thread that polls for it.
pub struct DriverStation {
    packet: Mutex<DsPacket>,
    ready: AtomicBool,
    running: AtomicBool,
}

impl DriverStation {
    pub fn new() -> Self {
        Self {
            packet: Mutex::new(DsPacket::default()),
            ready: AtomicBool::new(true),
            running: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> RobotMode {
        RobotMode::from_control_word(self.packet.lock().word)
    }

    /// Reads an axis in `-1.0..=1.0`. Axes the stick does not report read as zero.
    pub fn axis(&self, stick: usize, axis: usize) -> f64 {
        if stick >= JOYSTICK_COUNT || axis >= AXIS_COUNT {
            fatal(
                Component::Hardware,
                format_args!("joystick {stick} axis {axis} out of range"),
            );
        }
        let joystick = self.packet.lock().sticks[stick];
        if axis >= joystick.axis_count {
            0.0
        } else {
            axis_from_raw(joystick.axes[axis])
        }
    }

    pub fn button(&self, stick: usize, button: usize) -> bool {
        if stick >= JOYSTICK_COUNT || button >= MAX_BUTTONS {
            fatal(
                Component::Hardware,
                format_args!("joystick {stick} button {button} out of range"),
            );
        }
        let joystick = self.packet.lock().sticks[stick];
        button < joystick.button_count && joystick.buttons & (1 << button) != 0
    }

    /// Replaces the current packet.
    pub fn publish(&self, packet: DsPacket) {
        let previous = std::mem::replace(&mut *self.packet.lock(), packet);
        let (before, after) = (
            RobotMode::from_control_word(previous.word),
            RobotMode::from_control_word(packet.word),
        );
        if before != after {
            info!("driver station: {before:?} -> {after:?}");
        }
    }

    /// Starts the polling thread.
    ///
    /// Each new packet is published, then `on_update` is enqueued unless the
    /// previous update has not been dispatched yet. A slow dispatcher
    /// therefore sees the newest data once instead of a backlog of stale
    /// packets.
    pub fn start(
        self: &Arc<Self>,
        sink: Arc<dyn EventSink>,
        period: Duration,
        schedule: MatchSchedule,
        on_update: Callback,
    ) -> JoinHandle<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            fatal(Component::Hardware, "driver station started twice");
        }
        let ds = Arc::clone(self);
        thread::Builder::new()
            .name("driver-station".to_owned())
            .spawn(move || {
                let origin = Instant::now();
                while ds.running.load(Ordering::Acquire) {
                    thread::sleep(period);
                    ds.publish(schedule.packet_at(origin.elapsed()));
                    if ds.ready.swap(false, Ordering::AcqRel) {
                        let ds = Arc::clone(&ds);
                        let on_update = Arc::clone(&on_update);
                        sink.enqueue_callback(callback(move || {
                            ds.ready.store(true, Ordering::Release);
                            on_update();
                        }));
                    }
                }
                debug!("driver station polling stopped");
            })
            .or_fatal(Component::Hardware, "cannot start driver station thread")
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for DriverStation {
    fn default() -> Self {
        Self::new()
    }
}

/// Chatter pattern of the simulated input signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedSignal {
    /// Time between level changes.
    pub toggle_every: Duration,
    /// Extra edges emitted around each level change.
    pub bounces: u32,
    pub bounce_gap: Duration,
}

/// A digital input pin with edge interrupts on both edges.
pub struct GpioInput {
    pin: u8,
    level: AtomicBool,
    running: AtomicBool,
}

impl GpioInput {
    pub fn new(pin: u8) -> Self {
        if usize::from(pin) >= GPIO_COUNT {
            fatal(Component::Hardware, format_args!("gpio pin {pin} out of range"));
        }
        Self {
            pin,
            level: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn poll(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    /// Drives the pin level. Only the simulation calls this.
    pub fn drive(&self, level: bool) {
        self.level.store(level, Ordering::Release);
    }

    /// Starts the interrupt thread, enqueueing `on_edge` for every edge.
    pub fn start_interrupt(
        self: &Arc<Self>,
        sink: Arc<dyn EventSink>,
        signal: SimulatedSignal,
        on_edge: Callback,
    ) -> JoinHandle<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            fatal(
                Component::Hardware,
                format_args!("gpio {} interrupt started twice", self.pin),
            );
        }
        let input = Arc::clone(self);
        thread::Builder::new()
            .name(format!("gpio-{}", self.pin))
            .spawn(move || {
                while input.running.load(Ordering::Acquire) {
                    thread::sleep(signal.toggle_every);
                    let settled = !input.poll();
                    for bounce in 0..signal.bounces {
                        input.drive(if bounce % 2 == 0 { settled } else { !settled });
                        sink.enqueue_callback(Arc::clone(&on_edge));
                        thread::sleep(signal.bounce_gap);
                    }
                    input.drive(settled);
                    trace!("gpio {} settled {}", input.pin, settled);
                    sink.enqueue_callback(Arc::clone(&on_edge));
                }
                debug!("gpio {} interrupt stopped", input.pin);
            })
            .or_fatal(Component::Hardware, "cannot start gpio interrupt thread")
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// A PWM channel driving a speed controller.
pub struct PwmOutput {
    id: u8,
    spec: PwmSpec,
    pulse_ms: Mutex<f64>,
}

impl PwmOutput {
    pub fn new(id: u8, spec: PwmSpec) -> Self {
        if usize::from(id) >= PWM_COUNT {
            fatal(Component::Hardware, format_args!("pwm {id} out of range"));
        }
        debug!(
            "pwm {id}: {:?} frame, {:.3}ms at rest",
            spec.frame(),
            spec.rest
        );
        Self {
            id,
            spec,
            pulse_ms: Mutex::new(spec.rest),
        }
    }

    /// Sets a speed in `-1.0..=1.0`; NaN disables the channel.
    pub fn set_speed(&self, speed: f64) {
        let pulse = pwm_map(speed, &self.spec);
        *self.pulse_ms.lock() = pulse;
        trace!("pwm {}: speed {speed:.3} -> {pulse:.3}ms", self.id);
    }

    /// Current pulse width in milliseconds, NaN while disabled.
    pub fn pulse_ms(&self) -> f64 {
        *self.pulse_ms.lock()
    }
}
