//! Character controllers
//!
//! A controller is a composite: the native controller record owns a
//! kinematic actor and its single shape, and releasing the record deletes
//! both. The engine-side [`CollisionObject`] and [`Shape`] built over them
//! are therefore borrowed views; only the controller handle releases
//! anything.

use crate::body::CollisionObject;
use crate::config::{ControllerDefaults, NonWalkableMode};
use crate::error::{BridgeError, Result};
use crate::events::{resolve_collider, ControllerHit, ControllerHitReport};
use crate::material::PhysicsMaterial;
use crate::resource::ForeignHandle;
use crate::scene::{ControllerKey, NativeController, NativeScene};
use crate::shape::{Shape, ShapeKind};
use crate::units;
use parking_lot::Mutex;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::sync::{Arc, Weak};

/// Shape of a character controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeType {
    Capsule,
    Box,
}

/// How eagerly a capsule controller climbs steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClimbingMode {
    /// Climbs any step up to the step offset
    #[default]
    Easy,
    /// Needs a step at least as wide as the capsule radius
    Constrained,
}

/// Kind-specific part of a controller descriptor (Rapier units)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerKindDesc {
    Capsule {
        radius: f32,
        half_height: f32,
        climbing_mode: ClimbingMode,
    },
    Box {
        half_height: f32,
        half_side_extent: f32,
        half_forward_extent: f32,
    },
}

/// Native controller descriptor (Rapier units)
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerDesc {
    /// Center of the controller shape
    pub position: rapier::Point<f32>,
    pub up_direction: rapier::Vector<f32>,
    pub contact_offset: f32,
    pub density: f32,
    pub material: PhysicsMaterial,
    pub non_walkable_mode: NonWalkableMode,
    /// Radians; zero disables slope handling for the controller's lifetime
    pub slope_limit: f32,
    pub step_offset: f32,
    pub kind: ControllerKindDesc,
}

impl ControllerDesc {
    /// Slope limit used at creation so the real limit can be set afterwards
    pub const SLOPE_LIMIT_PLACEHOLDER: f32 = 1.0;

    /// Descriptor for a controller standing at `spawn_position` (engine
    /// units), its center raised by `half_height` along the spawn up axis.
    pub fn from_spawn(
        kind: ControllerKindDesc,
        half_height: f32,
        step_height: f32,
        spawn_position: [f32; 3],
        spawn_rotation: [f32; 4],
        defaults: &ControllerDefaults,
        material: PhysicsMaterial,
    ) -> Self {
        let up = units::to_foreign_rotation(spawn_rotation) * rapier::Vector::y();
        let center = [
            spawn_position[0] + up.x * half_height,
            spawn_position[1] + up.y * half_height,
            spawn_position[2] + up.z * half_height,
        ];
        Self {
            position: units::to_foreign_point(center),
            up_direction: up,
            contact_offset: units::to_foreign_length(defaults.contact_offset),
            density: defaults.density,
            material,
            non_walkable_mode: defaults.non_walkable_mode,
            slope_limit: Self::SLOPE_LIMIT_PLACEHOLDER,
            step_offset: units::to_foreign_length(step_height),
            kind,
        }
    }

    /// Whether Rapier can build a controller from this descriptor
    pub fn is_valid(&self) -> bool {
        let positive = |x: f32| x.is_finite() && x > 0.0;
        let dims_ok = match self.kind {
            ControllerKindDesc::Capsule { radius, half_height, .. } => positive(radius) && positive(half_height),
            ControllerKindDesc::Box {
                half_height,
                half_side_extent,
                half_forward_extent,
            } => positive(half_height) && positive(half_side_extent) && positive(half_forward_extent),
        };
        dims_ok
            && positive(self.contact_offset)
            && positive(self.density)
            && self.step_offset.is_finite()
            && self.step_offset >= 0.0
            && self.slope_limit.is_finite()
            && (0.0..FRAC_PI_2).contains(&self.slope_limit)
            && self.position.coords.iter().all(|c| c.is_finite())
            && self.up_direction.norm() > f32::EPSILON
    }
}

/// Outcome of [`CharacterController::move_by`] (engine units)
#[derive(Debug, Clone)]
pub struct ControllerMove {
    /// Translation actually applied
    pub translation: [f32; 3],
    /// Standing on walkable ground after the move
    pub grounded: bool,
    /// Being pushed down a non-walkable slope
    pub sliding_down_slope: bool,
    /// Shapes hit on the way
    pub hits: Vec<ControllerHit>,
}

/// Engine character controller
pub struct CharacterController {
    object: Arc<CollisionObject>,
    record: ForeignHandle<ControllerKey, NativeScene>,
    shape_type: ShapeType,
    half_extents: [f32; 3],
    scene: Weak<Mutex<NativeScene>>,
    hit_report: Mutex<Option<Arc<dyn ControllerHitReport>>>,
}

impl CharacterController {
    /// Build the engine composite over a freshly created native controller.
    ///
    /// Returns `None` if the controller has no shape or its shape is
    /// neither a box nor a capsule; the handle is dropped in that case,
    /// which releases the native controller with everything it created.
    pub(crate) fn create(
        scene: &Arc<Mutex<NativeScene>>,
        handle: ForeignHandle<ControllerKey, NativeScene>,
        half_extents: [f32; 3],
        shape_type: ShapeType,
    ) -> Option<Arc<Self>> {
        // 1. The controller's attached shape
        let (collider, actor, material, geometry) = handle
            .with(|scene, key| {
                let record = scene.controller(key)?;
                let geometry = scene.shape_geometry(record.shape)?;
                Some((record.shape, record.actor, record.material, geometry))
            })
            .flatten()?;

        // 2. Only boxes and capsules
        let kind = if geometry.as_cuboid().is_some() {
            ShapeKind::Box
        } else if geometry.as_capsule().is_some() {
            ShapeKind::Capsule
        } else {
            log::debug!("controller shape {:?} is neither a box nor a capsule", geometry.shape_type());
            return None;
        };

        // 3. The shape (and its geometry) belong to the controller
        let shape = Shape::borrowed(scene, collider, kind, material);

        // 4. So does the actor
        let object = CollisionObject::borrowed(scene, actor);
        object.adopt_shape(&shape);

        // 5. Composite, with the actor pointing back at it
        let key = handle.key();
        let controller = Arc::new(Self {
            object,
            record: handle,
            shape_type,
            half_extents,
            scene: Arc::downgrade(scene),
            hit_report: Mutex::new(None),
        });
        controller.object.set_controller(Arc::downgrade(&controller));

        // 6. Native controller back to the composite
        scene
            .lock()
            .backrefs
            .controllers
            .register(key, Arc::downgrade(&controller));
        Some(controller)
    }

    fn with_record<R>(&self, f: impl FnOnce(&mut NativeController, &mut rapier::RigidBodySet) -> R) -> Result<R> {
        self.record
            .with(|scene, key| {
                let (record, bodies) = scene.controller_parts_mut(key)?;
                Some(f(record, bodies))
            })
            .flatten()
            .ok_or(BridgeError::ObjectReleased("controller"))
    }

    /// Controller shape type
    pub fn shape_type(&self) -> ShapeType {
        self.shape_type
    }

    /// Half extents the controller was created with (engine units)
    pub fn half_extents(&self) -> [f32; 3] {
        self.half_extents
    }

    /// Collision object driven by the controller
    pub fn collision_object(&self) -> &Arc<CollisionObject> {
        &self.object
    }

    /// The controller's shape
    pub fn shape(&self) -> Option<Arc<Shape>> {
        self.object.shapes().into_iter().next()
    }

    /// Install the hit report callback
    pub fn set_hit_report(&self, report: Option<Arc<dyn ControllerHitReport>>) {
        *self.hit_report.lock() = report;
    }

    /// Move by `displacement` (engine units) over `dt` seconds.
    ///
    /// Hits are resolved to engine objects and reported after the scene is
    /// unlocked.
    pub fn move_by(&self, displacement: [f32; 3], dt: f32) -> Result<ControllerMove> {
        let desired = units::to_foreign_vector(displacement);
        let (translation, grounded, sliding, resolved) = self
            .record
            .with(|scene, key| {
                let (translation, grounded, sliding, collisions) = scene.move_controller(key, desired, dt)?;
                let resolved: Vec<_> = collisions
                    .iter()
                    .map(|c| {
                        let (shape, object) = resolve_collider(scene, c.handle);
                        (shape, object, c.hit.witness1, c.hit.normal1.into_inner())
                    })
                    .collect();
                Some((translation, grounded, sliding, resolved))
            })
            .flatten()
            .ok_or(BridgeError::ObjectReleased("controller"))?;

        let length = units::from_foreign_length(desired.norm());
        let direction = units::from_foreign_normal(&desired);
        let hits: Vec<ControllerHit> = resolved
            .into_iter()
            .map(|(shape, object, point, normal)| ControllerHit {
                shape,
                object,
                point: units::from_foreign_point(&point),
                normal: units::from_foreign_normal(&normal),
                direction,
                length,
            })
            .collect();

        let report = self.hit_report.lock().clone();
        if let Some(report) = report {
            for hit in &hits {
                report.on_shape_hit(self, hit);
            }
        }

        Ok(ControllerMove {
            translation: units::from_foreign_vector(&translation),
            grounded,
            sliding_down_slope: sliding,
            hits,
        })
    }

    /// Whether the last move ended on walkable ground
    pub fn is_grounded(&self) -> Result<bool> {
        self.with_record(|record, _| record.grounded)
    }

    /// Up direction
    pub fn up_direction(&self) -> Result<[f32; 3]> {
        self.with_record(|record, _| units::from_foreign_normal(&record.up))
    }

    /// Center of the controller shape (engine units)
    pub fn position(&self) -> Result<[f32; 3]> {
        self.object.position()
    }

    /// Teleport the shape's center (engine units)
    pub fn set_position(&self, position: [f32; 3]) -> Result<()> {
        self.object.set_position(position)
    }

    /// Bottom of the controller, contact offset included (engine units)
    pub fn foot_position(&self) -> Result<[f32; 3]> {
        self.with_record(|record, bodies| {
            let center = bodies.get(record.actor)?.translation();
            Some(units::from_foreign_vector(&(center - record.up * record.foot_offset)))
        })?
        .ok_or(BridgeError::ObjectReleased("actor"))
    }

    /// Teleport so the controller's bottom is at `position` (engine units)
    pub fn set_foot_position(&self, position: [f32; 3]) -> Result<()> {
        self.with_record(|record, bodies| {
            let center = units::to_foreign_vector(position) + record.up * record.foot_offset;
            bodies.get_mut(record.actor).map(|body| body.set_translation(center, true))
        })?
        .ok_or(BridgeError::ObjectReleased("actor"))
    }

    /// Maximum climbable slope, in degrees
    pub fn slope_limit(&self) -> Result<f32> {
        self.with_record(|record, _| {
            if record.slope_limit_enabled {
                record.slope_limit.to_degrees()
            } else {
                0.0
            }
        })
    }

    /// Set the maximum climbable slope, in degrees.
    ///
    /// Ignored if the controller was created with slope handling disabled.
    pub fn set_slope_limit(&self, degrees: f32) -> Result<()> {
        self.with_record(|record, _| {
            if !record.slope_limit_enabled {
                log::warn!("slope limit change ignored: controller was created without a slope limit");
                return;
            }
            record.slope_limit = degrees.to_radians();
            record.apply_slope_limit();
        })
    }

    /// Non-walkable slope behaviour
    pub fn non_walkable_mode(&self) -> Result<NonWalkableMode> {
        self.with_record(|record, _| record.non_walkable_mode)
    }

    /// Set the non-walkable slope behaviour
    pub fn set_non_walkable_mode(&self, mode: NonWalkableMode) -> Result<()> {
        self.with_record(|record, _| {
            record.non_walkable_mode = mode;
            record.apply_slope_limit();
        })
    }

    /// Maximum step height (engine units)
    pub fn step_height(&self) -> Result<f32> {
        self.with_record(|record, _| units::from_foreign_length(record.step_offset()))
    }

    /// Set the maximum step height (engine units)
    pub fn set_step_height(&self, height: f32) -> Result<()> {
        self.with_record(|record, _| record.apply_step_offset(units::to_foreign_length(height.max(0.0))))
    }
}

impl Drop for CharacterController {
    fn drop(&mut self) {
        if let Some(scene) = self.scene.upgrade() {
            scene.lock().backrefs.controllers.invalidate(self.record.key());
        }
    }
}

impl std::fmt::Debug for CharacterController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacterController")
            .field("key", &self.record.key())
            .field("shape_type", &self.shape_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::scene::ReleaseRecord;
    use approx::assert_relative_eq;

    fn capsule_desc(radius: f32, half_height: f32) -> ControllerDesc {
        ControllerDesc::from_spawn(
            ControllerKindDesc::Capsule {
                radius: units::to_foreign_length(radius),
                half_height: units::to_foreign_length(half_height),
                climbing_mode: ClimbingMode::Easy,
            },
            half_height,
            5.0,
            [0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            &ControllerDefaults::default(),
            PhysicsMaterial::default(),
        )
    }

    #[test]
    fn test_spawn_offset_along_up() {
        let desc = capsule_desc(30.0, 40.0);
        assert_relative_eq!(desc.position.y, units::to_foreign_length(40.0), epsilon = 1.0e-6);
        assert_relative_eq!(desc.up_direction.y, 1.0, epsilon = 1.0e-6);
        assert_eq!(desc.slope_limit, ControllerDesc::SLOPE_LIMIT_PLACEHOLDER);
        assert!(desc.is_valid());

        // Rolled 90 degrees about Z: up becomes -X
        let s = std::f32::consts::FRAC_1_SQRT_2;
        let desc = ControllerDesc::from_spawn(
            desc.kind,
            40.0,
            5.0,
            [0.0, 0.0, 0.0],
            [0.0, 0.0, s, s],
            &ControllerDefaults::default(),
            PhysicsMaterial::default(),
        );
        assert_relative_eq!(desc.up_direction.x, -1.0, epsilon = 1.0e-5);
        assert_relative_eq!(desc.position.x, -units::to_foreign_length(40.0), epsilon = 1.0e-5);
    }

    #[test]
    fn test_invalid_descriptor() {
        let mut desc = capsule_desc(30.0, 40.0);
        desc.contact_offset = 0.0;
        assert!(!desc.is_valid());

        let mut desc = capsule_desc(30.0, 40.0);
        desc.slope_limit = 2.0;
        assert!(!desc.is_valid());
    }

    #[test]
    fn test_disabled_slope_limit_stays_disabled() {
        let scene = Arc::new(Mutex::new(NativeScene::new(&BackendConfig::default())));
        let mut desc = capsule_desc(30.0, 40.0);
        desc.slope_limit = 0.0;
        let key = scene.lock().create_controller(&desc);
        let handle = ForeignHandle::wrap(key, &scene, NativeScene::release_controller).unwrap();
        let controller = CharacterController::create(&scene, handle, [30.0, 40.0, 30.0], ShapeType::Capsule).unwrap();

        controller.set_slope_limit(45.0).unwrap();
        assert_eq!(controller.slope_limit().unwrap(), 0.0);
    }

    #[test]
    fn test_unsupported_geometry_releases_everything() {
        let config = BackendConfig::default().with_release_tracking(true);
        let scene = Arc::new(Mutex::new(NativeScene::new(&config)));
        let key = scene.lock().create_controller(&capsule_desc(30.0, 40.0));
        let (collider, actor) = {
            let mut native = scene.lock();
            let record = native.controller(key.unwrap()).unwrap();
            let (collider, actor) = (record.shape, record.actor);
            native
                .colliders
                .get_mut(collider)
                .unwrap()
                .set_shape(rapier::SharedShape::ball(0.5));
            (collider, actor)
        };
        let handle = ForeignHandle::wrap(key, &scene, NativeScene::release_controller).unwrap();

        assert!(CharacterController::create(&scene, handle, [30.0, 40.0, 30.0], ShapeType::Capsule).is_none());

        let native = scene.lock();
        assert_eq!(native.controller_count(), 0);
        assert_eq!(native.actor_count(), 0);
        assert_eq!(native.shape_count(), 0);
        assert_eq!(
            native.release_history(),
            &[
                ReleaseRecord::Shape(collider),
                ReleaseRecord::Actor(actor),
                ReleaseRecord::Controller(key.unwrap()),
            ]
        );
    }

    #[test]
    fn test_foot_position_round_trip() {
        let scene = Arc::new(Mutex::new(NativeScene::new(&BackendConfig::default())));
        let key = scene.lock().create_controller(&capsule_desc(30.0, 40.0));
        let handle = ForeignHandle::wrap(key, &scene, NativeScene::release_controller).unwrap();
        let controller = CharacterController::create(&scene, handle, [30.0, 40.0, 30.0], ShapeType::Capsule).unwrap();

        // Center sits 40 above the spawn; the bottom is a radius and a skin further down
        let foot = controller.foot_position().unwrap();
        assert_relative_eq!(foot[1], 40.0 - 40.0 - 30.0 - 0.1, epsilon = 1.0e-3);

        controller.set_foot_position([80.0, 0.0, 0.0]).unwrap();
        let foot = controller.foot_position().unwrap();
        assert_relative_eq!(foot[0], 80.0, epsilon = 1.0e-3);
        assert_relative_eq!(foot[1], 0.0, epsilon = 1.0e-3);
    }
}
