//! Vehicle control input smoothing
//!
//! Raw driver input (keys or analog axes) is smoothed per channel with
//! independent rise/fall rates, and steering is scaled by a forward-speed
//! sensitivity table. All state lives in a per-vehicle [`VehicleInputContext`].

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// How raw input is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputMode {
    /// Keyboard-style on/off inputs
    #[default]
    Digital,
    /// Gamepad-style analog axes
    Analog,
}

/// Smoothed input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChannel {
    Accel = 0,
    Brake = 1,
    Handbrake = 2,
    SteerLeft = 3,
    SteerRight = 4,
}

/// Rise and fall rates (units per second) for each channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingProfile {
    pub rise_rates: [f32; 5],
    pub fall_rates: [f32; 5],
}

impl SmoothingProfile {
    /// Default profile for digital (key) input
    pub fn keys() -> Self {
        Self {
            rise_rates: [6.0, 6.0, 6.0, 2.5, 2.5],
            fall_rates: [10.0, 10.0, 10.0, 5.0, 5.0],
        }
    }

    /// Default profile for analog (pad) input
    pub fn pad() -> Self {
        Self {
            rise_rates: [6.0, 6.0, 6.0, 2.5, 2.5],
            fall_rates: [10.0, 10.0, 10.0, 5.0, 5.0],
        }
    }

    /// Rise rate of a channel
    pub fn rise(&self, channel: InputChannel) -> f32 {
        self.rise_rates[channel as usize]
    }

    /// Fall rate of a channel
    pub fn fall(&self, channel: InputChannel) -> f32 {
        self.fall_rates[channel as usize]
    }
}

/// Steering sensitivity as a function of absolute forward speed (m/s)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteerSpeedTable {
    points: Vec<(f32, f32)>,
}

impl SteerSpeedTable {
    /// Maximum number of (speed, sensitivity) pairs
    pub const MAX_POINTS: usize = 8;

    /// Build a table from (speed, sensitivity) pairs sorted by speed
    pub fn new(points: Vec<(f32, f32)>) -> Result<Self> {
        let table = Self { points };
        table.validate()?;
        Ok(table)
    }

    /// Check point count and ordering
    pub fn validate(&self) -> Result<()> {
        if self.points.is_empty() || self.points.len() > Self::MAX_POINTS {
            return Err(BridgeError::InvalidConfig(format!(
                "steer table needs 1..={} points, got {}",
                Self::MAX_POINTS,
                self.points.len()
            )));
        }
        if self.points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(BridgeError::InvalidConfig(
                "steer table speeds must be strictly increasing".into(),
            ));
        }
        Ok(())
    }

    /// Sensitivity at `speed`, interpolated and clamped to the end points
    pub fn sample(&self, speed: f32) -> f32 {
        let Some(&(first_x, first_y)) = self.points.first() else {
            return 1.0;
        };
        if speed <= first_x {
            return first_y;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if speed <= x1 {
                let t = (speed - x0) / (x1 - x0);
                return y0 + (y1 - y0) * t;
            }
        }
        self.points.last().map_or(first_y, |&(_, y)| y)
    }
}

impl Default for SteerSpeedTable {
    fn default() -> Self {
        Self {
            points: vec![(0.0, 0.75), (5.0, 0.75), (30.0, 0.125), (120.0, 0.1)],
        }
    }
}

/// Keyboard-style inputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigitalInput {
    pub accel: bool,
    pub brake: bool,
    pub handbrake: bool,
    pub steer_left: bool,
    pub steer_right: bool,
}

/// Analog axes; pedals in [0, 1], steering in [-1, 1] (negative is left)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnalogInput {
    pub accel: f32,
    pub brake: f32,
    pub handbrake: f32,
    pub steer: f32,
}

/// Raw input as last reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawDriveInput {
    pub digital: DigitalInput,
    pub analog: AnalogInput,
}

/// Smoothed inputs applied to the drive for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveInputs {
    pub accel: f32,
    pub brake: f32,
    pub handbrake: f32,
    /// Signed steering, already scaled by speed sensitivity
    pub steer: f32,
}

/// Per-vehicle input state
#[derive(Debug, Clone)]
pub struct VehicleInputContext {
    pub mode: InputMode,
    pub key_smoothing: SmoothingProfile,
    pub pad_smoothing: SmoothingProfile,
    pub steer_table: SteerSpeedTable,
    raw: RawDriveInput,
    smoothed: DriveInputs,
    steer_left: f32,
    steer_right: f32,
}

impl VehicleInputContext {
    /// Create a context with the given profiles
    pub fn new(
        mode: InputMode,
        key_smoothing: SmoothingProfile,
        pad_smoothing: SmoothingProfile,
        steer_table: SteerSpeedTable,
    ) -> Self {
        Self {
            mode,
            key_smoothing,
            pad_smoothing,
            steer_table,
            raw: RawDriveInput::default(),
            smoothed: DriveInputs::default(),
            steer_left: 0.0,
            steer_right: 0.0,
        }
    }

    /// Replace the raw input
    pub fn set_raw(&mut self, raw: RawDriveInput) {
        self.raw = raw;
    }

    /// Current raw input
    pub fn raw(&self) -> &RawDriveInput {
        &self.raw
    }

    /// Inputs produced by the last [`smooth`](Self::smooth)
    pub fn smoothed(&self) -> DriveInputs {
        self.smoothed
    }

    /// Advance smoothing by `dt` and return the inputs to apply.
    ///
    /// `forward_speed` is in m/s; an airborne vehicle steers at full sensitivity.
    pub fn smooth(&mut self, dt: f32, forward_speed: f32, in_air: bool) -> DriveInputs {
        let sensitivity = if in_air {
            1.0
        } else {
            self.steer_table.sample(forward_speed.abs())
        };

        self.smoothed = match self.mode {
            InputMode::Digital => self.smooth_digital(dt, sensitivity),
            InputMode::Analog => self.smooth_analog(dt, sensitivity),
        };
        self.smoothed
    }

    fn smooth_digital(&mut self, dt: f32, sensitivity: f32) -> DriveInputs {
        let profile = self.key_smoothing;
        let keys = self.raw.digital;
        let prev = self.smoothed;

        let digital = |channel: InputChannel, held: bool, value: f32| {
            let next = if held {
                value + profile.rise(channel) * dt
            } else {
                value - profile.fall(channel) * dt
            };
            next.clamp(0.0, 1.0)
        };

        self.steer_left = digital(InputChannel::SteerLeft, keys.steer_left, self.steer_left);
        self.steer_right = digital(InputChannel::SteerRight, keys.steer_right, self.steer_right);

        DriveInputs {
            accel: digital(InputChannel::Accel, keys.accel, prev.accel),
            brake: digital(InputChannel::Brake, keys.brake, prev.brake),
            handbrake: digital(InputChannel::Handbrake, keys.handbrake, prev.handbrake),
            steer: (self.steer_right - self.steer_left) * sensitivity,
        }
    }

    fn smooth_analog(&mut self, dt: f32, sensitivity: f32) -> DriveInputs {
        let profile = self.pad_smoothing;
        let axes = self.raw.analog;
        let prev = self.smoothed;

        let pedal = |channel: InputChannel, raw: f32, value: f32| {
            approach(value, raw.clamp(0.0, 1.0), profile.rise(channel), profile.fall(channel), dt)
        };

        let target = axes.steer.clamp(-1.0, 1.0) * sensitivity;
        let channel = if target < 0.0 {
            InputChannel::SteerLeft
        } else {
            InputChannel::SteerRight
        };
        let away_from_center = target.abs() > prev.steer.abs() && target * prev.steer >= 0.0;
        let rate = if away_from_center {
            profile.rise(channel)
        } else {
            profile.fall(channel)
        };

        DriveInputs {
            accel: pedal(InputChannel::Accel, axes.accel, prev.accel),
            brake: pedal(InputChannel::Brake, axes.brake, prev.brake),
            handbrake: pedal(InputChannel::Handbrake, axes.handbrake, prev.handbrake),
            steer: approach(prev.steer, target, rate, rate, dt),
        }
    }
}

impl Default for VehicleInputContext {
    fn default() -> Self {
        Self::new(
            InputMode::default(),
            SmoothingProfile::keys(),
            SmoothingProfile::pad(),
            SteerSpeedTable::default(),
        )
    }
}

/// Move `value` toward `target` without overshooting
fn approach(value: f32, target: f32, rise: f32, fall: f32, dt: f32) -> f32 {
    if target > value {
        (value + rise * dt).min(target)
    } else {
        (value - fall * dt).max(target)
    }
}
