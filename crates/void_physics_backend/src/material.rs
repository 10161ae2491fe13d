//! Physics materials and the vehicle tire friction table

use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index of an engine surface material (footsteps, decals, tire friction, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceMaterialId(pub u32);

/// Contact properties of a shape, in the engine's material model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    /// Coulomb friction, clamped to [0, 1]
    pub friction: f32,
    /// Bounciness, clamped to [0, 1]
    pub restitution: f32,
    /// Mass density of the attached geometry (foreign units)
    pub density: f32,
    pub friction_combine: CombineRule,
    pub restitution_combine: CombineRule,
    /// Engine surface material, if any
    pub surface_material: Option<SurfaceMaterialId>,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self::generic()
    }
}

impl PhysicsMaterial {
    /// Material with the given friction and restitution, generic otherwise
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self::generic().with_friction(friction).with_restitution(restitution)
    }

    /// The environment's fallback material, also used by character controllers
    pub fn generic() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            density: 1.0,
            friction_combine: CombineRule::Average,
            restitution_combine: CombineRule::Average,
            surface_material: None,
        }
    }

    /// Generic material tagged with `surface`
    pub fn surface(surface: SurfaceMaterialId) -> Self {
        Self::generic().with_surface_material(surface)
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.clamp(0.0, 1.0);
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution.clamp(0.0, 1.0);
        self
    }

    /// Density is kept strictly positive so mass properties stay defined
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density.max(0.001);
        self
    }

    /// Tag the material with an engine surface material
    pub fn with_surface_material(mut self, surface: SurfaceMaterialId) -> Self {
        self.surface_material = Some(surface);
        self
    }

    /// Apply friction, restitution and density to a collider builder
    pub(crate) fn apply(&self, builder: rapier::ColliderBuilder) -> rapier::ColliderBuilder {
        builder
            .friction(self.friction)
            .restitution(self.restitution)
            .density(self.density)
            .friction_combine_rule(self.friction_combine.to_rapier())
            .restitution_combine_rule(self.restitution_combine.to_rapier())
    }
}

/// Rule for combining material properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CombineRule {
    /// Use the average of both values
    #[default]
    Average,
    /// Use the minimum value
    Min,
    /// Use the maximum value
    Max,
    /// Multiply the values
    Multiply,
}

impl CombineRule {
    pub(crate) fn to_rapier(self) -> rapier::CoefficientCombineRule {
        match self {
            Self::Average => rapier::CoefficientCombineRule::Average,
            Self::Min => rapier::CoefficientCombineRule::Min,
            Self::Max => rapier::CoefficientCombineRule::Max,
            Self::Multiply => rapier::CoefficientCombineRule::Multiply,
        }
    }
}

/// Tire friction multiplier per drivable surface material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TireFrictionTable {
    /// Multiplier used for surfaces without an entry (or without a material)
    pub default_friction: f32,
    surfaces: HashMap<SurfaceMaterialId, f32>,
}

impl Default for TireFrictionTable {
    fn default() -> Self {
        Self {
            default_friction: 1.0,
            surfaces: HashMap::new(),
        }
    }
}

impl TireFrictionTable {
    /// Create a table with a fallback multiplier
    pub fn new(default_friction: f32) -> Self {
        Self {
            default_friction: default_friction.max(0.0),
            surfaces: HashMap::new(),
        }
    }

    /// Set the friction multiplier for a surface
    pub fn set(&mut self, surface: SurfaceMaterialId, friction: f32) {
        self.surfaces.insert(surface, friction.max(0.0));
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, surface: SurfaceMaterialId, friction: f32) -> Self {
        self.set(surface, friction);
        self
    }

    /// Friction multiplier for a surface
    pub fn friction(&self, surface: Option<SurfaceMaterialId>) -> f32 {
        surface
            .and_then(|s| self.surfaces.get(&s).copied())
            .unwrap_or(self.default_friction)
    }
}
