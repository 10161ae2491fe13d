//! Physics backend configuration

use crate::error::{BridgeError, Result};
use crate::input::{InputMode, SmoothingProfile, SteerSpeedTable};
use crate::units;
use serde::{Deserialize, Serialize};

/// How a character controller treats slopes steeper than its slope limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NonWalkableMode {
    /// Cannot climb, but does not slide down either
    #[default]
    PreventClimbing,
    /// Cannot climb and is pushed down the slope
    PreventClimbingAndForceSliding,
}

/// Defaults applied to every character controller descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerDefaults {
    /// Skin width around the controller shape (engine units)
    pub contact_offset: f32,
    /// Density of the controller's kinematic actor
    pub density: f32,
    /// Behaviour on non-walkable slopes
    pub non_walkable_mode: NonWalkableMode,
}

impl Default for ControllerDefaults {
    fn default() -> Self {
        Self {
            contact_offset: 0.1,
            density: 10.0,
            non_walkable_mode: NonWalkableMode::PreventClimbing,
        }
    }
}

/// Defaults applied to every vehicle's input context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleDefaults {
    /// Initial input mode
    pub input_mode: InputMode,
    /// Smoothing for digital input
    pub key_smoothing: SmoothingProfile,
    /// Smoothing for analog input
    pub pad_smoothing: SmoothingProfile,
    /// Steering sensitivity vs forward speed (m/s)
    pub steer_table: SteerSpeedTable,
}

impl Default for VehicleDefaults {
    fn default() -> Self {
        Self {
            input_mode: InputMode::Digital,
            key_smoothing: SmoothingProfile::keys(),
            pad_smoothing: SmoothingProfile::pad(),
            steer_table: SteerSpeedTable::default(),
        }
    }
}

/// Physics backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Gravity vector in engine units/s² (default: -9.81 m/s² in Y)
    pub gravity: [f32; 3],

    /// Fixed timestep for physics simulation
    pub timestep: f32,

    /// Maximum number of substeps per frame
    pub max_substeps: u32,

    /// Enable continuous collision detection
    pub ccd_enabled: bool,

    /// Solver iterations for velocity
    pub velocity_iterations: usize,

    /// Enable sleeping for inactive bodies
    pub sleeping_enabled: bool,

    /// Record every foreign release (see `RapierEnvironment::release_history`)
    pub track_releases: bool,

    /// Character controller defaults
    pub controller: ControllerDefaults,

    /// Vehicle defaults
    pub vehicle: VehicleDefaults,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let g = units::from_foreign_length(-9.81);
        Self {
            gravity: [0.0, g, 0.0],
            timestep: 1.0 / 60.0,
            max_substeps: 4,
            ccd_enabled: true,
            velocity_iterations: 4,
            sleeping_enabled: true,
            track_releases: false,
            controller: ControllerDefaults::default(),
            vehicle: VehicleDefaults::default(),
        }
    }
}

impl BackendConfig {
    /// Create a configuration for high-precision simulation
    pub fn high_precision() -> Self {
        Self {
            velocity_iterations: 8,
            max_substeps: 8,
            ..Default::default()
        }
    }

    /// Create a configuration for fast simulation (lower quality)
    pub fn fast() -> Self {
        Self {
            velocity_iterations: 2,
            max_substeps: 2,
            ccd_enabled: false,
            ..Default::default()
        }
    }

    /// Set gravity (engine units/s²)
    pub fn with_gravity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.gravity = [x, y, z];
        self
    }

    /// Set timestep
    pub fn with_timestep(mut self, timestep: f32) -> Self {
        self.timestep = timestep;
        self
    }

    /// Record foreign releases
    pub fn with_release_tracking(mut self, enabled: bool) -> Self {
        self.track_releases = enabled;
        self
    }

    /// Check the configuration before a scene is built from it
    pub fn validate(&self) -> Result<()> {
        if !(self.timestep.is_finite() && self.timestep > 0.0) {
            return Err(BridgeError::InvalidConfig(format!(
                "timestep must be positive, got {}",
                self.timestep
            )));
        }
        if self.velocity_iterations == 0 {
            return Err(BridgeError::InvalidConfig(
                "velocity_iterations must be at least 1".into(),
            ));
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(BridgeError::InvalidConfig("gravity must be finite".into()));
        }
        if !(self.controller.contact_offset > 0.0) {
            return Err(BridgeError::InvalidConfig(
                "controller contact_offset must be positive".into(),
            ));
        }
        self.vehicle.steer_table.validate()
    }
}
