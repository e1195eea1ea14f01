//! Stateless signal helpers used by the control loop.

use std::time::Duration;

/// Pulse-width curve of a speed controller, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmSpec {
    pub rev_max: f64,
    pub rev_min: f64,
    pub rest: f64,
    pub fwd_min: f64,
    pub fwd_max: f64,
    pub frequency_hz: f64,
}

impl PwmSpec {
    /// Time between pulses the controller expects.
    pub fn frame(&self) -> Duration {
        Duration::from_nanos((1e9 / self.frequency_hz).round() as u64)
    }
}

pub const TALON_SR: PwmSpec = PwmSpec {
    rev_max: 0.989,
    rev_min: 1.487,
    rest: 1.513,
    fwd_min: 1.539,
    fwd_max: 2.037,
    frequency_hz: 200.0,
};

pub const VICTOR_SP: PwmSpec = PwmSpec {
    rev_max: 0.997,
    rev_min: 1.48,
    rest: 1.50,
    fwd_min: 1.52,
    fwd_max: 2.004,
    frequency_hz: 200.0,
};

/// Linear over 0.6..2.6 ms.
pub const SERVO: PwmSpec = PwmSpec {
    rev_max: 0.6,
    rev_min: 1.6,
    rest: 1.6,
    fwd_min: 1.6,
    fwd_max: 2.6,
    frequency_hz: 50.0,
};

/// Zeroes `value` when its magnitude is below `zone`.
pub fn deadzone(value: f64, zone: f64) -> f64 {
    if value.abs() >= zone {
        value
    } else {
        0.0
    }
}

pub fn choose(cond: bool, a: f64, b: f64) -> f64 {
    if cond {
        a
    } else {
        b
    }
}

/// Moves `previous` toward `target` by at most `max_change`.
pub fn ramping_update(previous: f64, target: f64, max_change: f64) -> f64 {
    if previous < target {
        target.min(previous + max_change)
    } else {
        target.max(previous - max_change)
    }
}

/// Maps a speed in `-1.0..=1.0` to a pulse width on `spec`'s curve.
///
/// Magnitudes above one saturate. NaN maps to NaN, which the output stage
/// treats as "disable the channel".
pub fn pwm_map(value: f64, spec: &PwmSpec) -> f64 {
    if value < 0.0 {
        (-value).min(1.0) * (spec.rev_max - spec.rev_min) + spec.rev_min
    } else if value > 0.0 {
        value.min(1.0) * (spec.fwd_max - spec.fwd_min) + spec.fwd_min
    } else if value.is_nan() {
        f64::NAN
    } else {
        spec.rest
    }
}

/// Scales a raw joystick reading to `-1.0..=1.0`.
pub fn axis_from_raw(raw: i8) -> f64 {
    if raw < 0 {
        f64::from(raw) / 128.0
    } else {
        f64::from(raw) / 127.0
    }
}
