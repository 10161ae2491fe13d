//! Rigid body types and the collision-object wrapper

use crate::controller::CharacterController;
use crate::error::{BridgeError, Result};
use crate::resource::{ForeignHandle, ForeignLink, ForeignRef};
use crate::scene::NativeScene;
use crate::shape::Shape;
use crate::units;
use parking_lot::Mutex;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Foreign binding of a collision object: owned, or borrowed from a composite
pub(crate) type BodyBinding = ForeignLink<rapier::RigidBodyHandle, NativeScene>;

/// Type of rigid body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RigidBodyType {
    /// Static body - never moves, infinite mass
    Static,
    /// Dynamic body - fully simulated
    #[default]
    Dynamic,
    /// Kinematic position-based - moved by user, affects dynamic bodies
    KinematicPositionBased,
    /// Kinematic velocity-based - velocity set by user
    KinematicVelocityBased,
}

impl From<RigidBodyType> for rapier::RigidBodyType {
    fn from(t: RigidBodyType) -> Self {
        match t {
            RigidBodyType::Static => rapier::RigidBodyType::Fixed,
            RigidBodyType::Dynamic => rapier::RigidBodyType::Dynamic,
            RigidBodyType::KinematicPositionBased => rapier::RigidBodyType::KinematicPositionBased,
            RigidBodyType::KinematicVelocityBased => rapier::RigidBodyType::KinematicVelocityBased,
        }
    }
}

impl From<rapier::RigidBodyType> for RigidBodyType {
    fn from(t: rapier::RigidBodyType) -> Self {
        match t {
            rapier::RigidBodyType::Fixed => RigidBodyType::Static,
            rapier::RigidBodyType::Dynamic => RigidBodyType::Dynamic,
            rapier::RigidBodyType::KinematicPositionBased => RigidBodyType::KinematicPositionBased,
            rapier::RigidBodyType::KinematicVelocityBased => RigidBodyType::KinematicVelocityBased,
        }
    }
}

/// Description for creating a rigid body (engine units)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigidBodyDesc {
    /// Type of rigid body
    pub body_type: RigidBodyType,
    /// Initial position
    pub position: [f32; 3],
    /// Initial rotation (quaternion: x, y, z, w)
    pub rotation: [f32; 4],
    /// Initial linear velocity
    pub linear_velocity: [f32; 3],
    /// Gravity scale (0 = no gravity, 1 = normal, 2 = double)
    pub gravity_scale: f32,
    /// Linear damping (air resistance)
    pub linear_damping: f32,
    /// Angular damping (rotational resistance)
    pub angular_damping: f32,
    /// Enable continuous collision detection
    pub ccd_enabled: bool,
    /// Can this body sleep when inactive
    pub can_sleep: bool,
    /// Is this body currently sleeping
    pub sleeping: bool,
}

impl Default for RigidBodyDesc {
    fn default() -> Self {
        Self {
            body_type: RigidBodyType::Dynamic,
            position: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            linear_velocity: [0.0, 0.0, 0.0],
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            ccd_enabled: false,
            can_sleep: true,
            sleeping: false,
        }
    }
}

impl RigidBodyDesc {
    /// Create a static body description
    pub fn fixed() -> Self {
        Self {
            body_type: RigidBodyType::Static,
            ..Default::default()
        }
    }

    /// Create a dynamic body description
    pub fn dynamic() -> Self {
        Self {
            body_type: RigidBodyType::Dynamic,
            ..Default::default()
        }
    }

    /// Create a kinematic body description
    pub fn kinematic() -> Self {
        Self {
            body_type: RigidBodyType::KinematicPositionBased,
            ..Default::default()
        }
    }

    /// Set position
    pub fn with_position(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = [x, y, z];
        self
    }

    /// Set rotation from euler angles (radians)
    pub fn with_rotation_euler(mut self, x: f32, y: f32, z: f32) -> Self {
        let q = rapier3d::na::UnitQuaternion::from_euler_angles(x, y, z);
        self.rotation = units::from_foreign_rotation(&q);
        self
    }

    /// Set linear velocity
    pub fn with_linear_velocity(mut self, x: f32, y: f32, z: f32) -> Self {
        self.linear_velocity = [x, y, z];
        self
    }

    /// Set gravity scale
    pub fn with_gravity_scale(mut self, scale: f32) -> Self {
        self.gravity_scale = scale;
        self
    }

    /// Start asleep
    pub fn with_sleeping(mut self, sleeping: bool) -> Self {
        self.sleeping = sleeping;
        self
    }

    /// Enable CCD
    pub fn with_ccd(mut self, enabled: bool) -> Self {
        self.ccd_enabled = enabled;
        self
    }

    /// Build a Rapier rigid body builder
    pub(crate) fn to_rapier_builder(&self) -> rapier::RigidBodyBuilder {
        let mut builder = rapier::RigidBodyBuilder::new(self.body_type.into())
            .position(units::to_foreign_isometry(self.position, self.rotation))
            .linvel(units::to_foreign_vector(self.linear_velocity))
            .gravity_scale(self.gravity_scale)
            .linear_damping(self.linear_damping)
            .angular_damping(self.angular_damping)
            .ccd_enabled(self.ccd_enabled)
            .can_sleep(self.can_sleep);

        if self.sleeping {
            builder = builder.sleeping(true);
        }

        builder
    }
}

struct BodyInner {
    shapes: Vec<Arc<Shape>>,
    controller: Weak<CharacterController>,
}

/// Engine collision object wrapping a Rapier rigid body
pub struct CollisionObject {
    binding: BodyBinding,
    this: Weak<CollisionObject>,
    scene: Weak<Mutex<NativeScene>>,
    inner: Mutex<BodyInner>,
}

impl CollisionObject {
    /// Create a collision object that owns its actor
    pub(crate) fn create(scene: &Arc<Mutex<NativeScene>>, desc: &RigidBodyDesc) -> Option<Arc<Self>> {
        let key = scene.lock().create_actor(desc.to_rapier_builder());
        let handle = ForeignHandle::wrap(key, scene, NativeScene::release_actor)?;
        Some(Self::bound(scene, ForeignLink::Owned(handle)))
    }

    /// Wrap an actor owned by a composite (character controller)
    pub(crate) fn borrowed(scene: &Arc<Mutex<NativeScene>>, key: rapier::RigidBodyHandle) -> Arc<Self> {
        Self::bound(scene, ForeignLink::Borrowed(ForeignRef::new(key, scene)))
    }

    fn bound(scene: &Arc<Mutex<NativeScene>>, binding: BodyBinding) -> Arc<Self> {
        let key = binding.key();
        let object = Arc::new_cyclic(|this| Self {
            binding,
            this: this.clone(),
            scene: Arc::downgrade(scene),
            inner: Mutex::new(BodyInner {
                shapes: Vec::new(),
                controller: Weak::new(),
            }),
        });
        scene.lock().backrefs.objects.register(key, Arc::downgrade(&object));
        object
    }

    pub(crate) fn actor_key(&self) -> rapier::RigidBodyHandle {
        self.binding.key()
    }

    /// Whether the wrapper owns its actor (as opposed to a composite)
    pub fn owns_foreign(&self) -> bool {
        self.binding.is_owned()
    }

    fn with_actor<R>(&self, f: impl FnOnce(&mut rapier::RigidBody) -> R) -> Result<R> {
        self.binding
            .with(|scene, key| scene.actor_mut(key).map(f))
            .flatten()
            .ok_or(BridgeError::ObjectReleased("actor"))
    }

    // ==================== Shapes ====================

    /// Attach a finalized shape
    pub fn attach_shape(&self, shape: &Arc<Shape>) -> Result<()> {
        let key = shape.ready_key()?;
        if shape.attached_object().is_some() {
            return Err(BridgeError::ShapeAlreadyAttached);
        }
        let flags = shape.flags();
        let pose = shape.foreign_local_pose();
        let attached = self
            .binding
            .with(|scene, actor| scene.attach_shape(key, actor, flags, pose))
            .unwrap_or(false);
        if !attached {
            return Err(BridgeError::ObjectReleased("actor"));
        }
        self.adopt_shape(shape);
        Ok(())
    }

    /// Record a shape the foreign side already attached
    pub(crate) fn adopt_shape(&self, shape: &Arc<Shape>) {
        shape.set_attached(Some(self.this.clone()));
        self.inner.lock().shapes.push(shape.clone());
    }

    /// Detach a shape attached to this object
    pub fn detach_shape(&self, shape: &Arc<Shape>) -> Result<()> {
        let removed = {
            let mut inner = self.inner.lock();
            let before = inner.shapes.len();
            inner.shapes.retain(|s| !Arc::ptr_eq(s, shape));
            before != inner.shapes.len()
        };
        if !removed {
            return Err(BridgeError::ShapeNotAttached);
        }
        shape.set_attached(None);
        if let Some(key) = shape.collider_key() {
            let flags = shape.flags();
            self.binding.with(|scene, _| scene.detach_shape(key, flags));
        }
        Ok(())
    }

    /// Shapes attached to this object
    pub fn shapes(&self) -> Vec<Arc<Shape>> {
        self.inner.lock().shapes.clone()
    }

    // ==================== Controller back-reference ====================

    /// Character controller driving this object, if any
    pub fn controller(&self) -> Option<Arc<CharacterController>> {
        self.inner.lock().controller.upgrade()
    }

    pub(crate) fn set_controller(&self, controller: Weak<CharacterController>) {
        self.inner.lock().controller = controller;
    }

    // ==================== State ====================

    /// Body type
    pub fn body_type(&self) -> Result<RigidBodyType> {
        self.with_actor(|body| body.body_type().into())
    }

    /// World position (engine units)
    pub fn position(&self) -> Result<[f32; 3]> {
        self.with_actor(|body| units::from_foreign_vector(body.translation()))
    }

    /// Teleport to a world position (engine units)
    pub fn set_position(&self, position: [f32; 3]) -> Result<()> {
        self.with_actor(|body| body.set_translation(units::to_foreign_vector(position), true))
    }

    /// World rotation (quaternion: x, y, z, w)
    pub fn rotation(&self) -> Result<[f32; 4]> {
        self.with_actor(|body| units::from_foreign_rotation(body.rotation()))
    }

    /// Set world rotation (quaternion: x, y, z, w)
    pub fn set_rotation(&self, rotation: [f32; 4]) -> Result<()> {
        self.with_actor(|body| body.set_rotation(units::to_foreign_rotation(rotation), true))
    }

    /// Linear velocity (engine units/s)
    pub fn linear_velocity(&self) -> Result<[f32; 3]> {
        self.with_actor(|body| units::from_foreign_vector(body.linvel()))
    }

    /// Set linear velocity (engine units/s)
    pub fn set_linear_velocity(&self, velocity: [f32; 3]) -> Result<()> {
        self.with_actor(|body| body.set_linvel(units::to_foreign_vector(velocity), true))
    }

    /// Mass in kg
    pub fn mass(&self) -> Result<f32> {
        self.with_actor(|body| body.mass())
    }

    /// Whether the actor is asleep
    pub fn is_asleep(&self) -> Result<bool> {
        self.with_actor(|body| body.is_sleeping())
    }

    /// Put the actor to sleep
    pub fn sleep(&self) -> Result<()> {
        self.with_actor(|body| body.sleep())
    }

    /// Wake the actor up
    pub fn wake(&self) -> Result<()> {
        self.with_actor(|body| body.wake_up(true))
    }
}

impl Drop for CollisionObject {
    fn drop(&mut self) {
        if let Some(scene) = self.scene.upgrade() {
            scene.lock().backrefs.objects.invalidate(self.binding.key());
        }
        // Shapes go before the actor
        let shapes = std::mem::take(&mut self.inner.get_mut().shapes);
        let mut detached = Vec::with_capacity(shapes.len());
        for shape in &shapes {
            shape.set_attached(None);
            if let Some(key) = shape.collider_key() {
                detached.push((key, shape.flags()));
            }
        }
        // Surviving shapes leave the world with their actor. Composites
        // tear down their own.
        if self.binding.is_owned() && !detached.is_empty() {
            self.binding.with(|scene, _| {
                for (key, flags) in detached {
                    scene.detach_shape(key, flags);
                }
            });
        }
        drop(shapes);
    }
}

impl std::fmt::Debug for CollisionObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollisionObject")
            .field("actor", &self.binding.key())
            .field("owned", &self.binding.is_owned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::material::PhysicsMaterial;
    use crate::scene::ReleaseRecord;
    use crate::shape::{PrimitiveShape, ShapeKind};
    use approx::assert_relative_eq;

    fn scene() -> Arc<Mutex<NativeScene>> {
        let config = BackendConfig::default().with_release_tracking(true);
        Arc::new(Mutex::new(NativeScene::new(&config)))
    }

    fn ball(scene: &Arc<Mutex<NativeScene>>) -> Arc<Shape> {
        let shape = Shape::primitive(scene, &PrimitiveShape::Sphere { radius: 10.0 }, PhysicsMaterial::default())
            .unwrap();
        shape.initialize(false);
        shape
    }

    #[test]
    fn test_position_in_engine_units() {
        let scene = scene();
        let object = CollisionObject::create(&scene, &RigidBodyDesc::dynamic().with_position(40.0, 80.0, 0.0))
            .unwrap();
        let position = object.position().unwrap();
        assert_relative_eq!(position[0], 40.0, max_relative = 1.0e-5);
        assert_relative_eq!(position[1], 80.0, max_relative = 1.0e-5);
        assert_eq!(object.body_type().unwrap(), RigidBodyType::Dynamic);
    }

    #[test]
    fn test_attach_rules() {
        let scene = scene();
        let a = CollisionObject::create(&scene, &RigidBodyDesc::dynamic()).unwrap();
        let b = CollisionObject::create(&scene, &RigidBodyDesc::dynamic()).unwrap();
        let shape = ball(&scene);

        a.attach_shape(&shape).unwrap();
        assert!(matches!(b.attach_shape(&shape), Err(BridgeError::ShapeAlreadyAttached)));
        assert!(matches!(b.detach_shape(&shape), Err(BridgeError::ShapeNotAttached)));
        assert!(Arc::ptr_eq(&shape.attached_object().unwrap(), &a));

        let hull = Shape::incremental(&scene, ShapeKind::ConvexHull, PhysicsMaterial::default()).unwrap();
        assert!(matches!(a.attach_shape(&hull), Err(BridgeError::ShapeNotFinalized)));

        a.detach_shape(&shape).unwrap();
        assert!(shape.attached_object().is_none());
        b.attach_shape(&shape).unwrap();
    }

    #[test]
    fn test_drop_releases_shapes_before_actor() {
        let scene = scene();
        let object = CollisionObject::create(&scene, &RigidBodyDesc::dynamic()).unwrap();
        let shape = ball(&scene);
        object.attach_shape(&shape).unwrap();
        let shape_key = shape.collider_key().unwrap();
        let actor_key = object.actor_key();
        drop(shape);

        drop(object);
        assert_eq!(
            scene.lock().release_history(),
            &[ReleaseRecord::Shape(shape_key), ReleaseRecord::Actor(actor_key)]
        );
    }

    #[test]
    fn test_shape_outlives_object() {
        let scene = scene();
        let object = CollisionObject::create(&scene, &RigidBodyDesc::dynamic()).unwrap();
        let shape = ball(&scene);
        object.attach_shape(&shape).unwrap();

        let key = shape.collider_key().unwrap();
        drop(object);
        assert!(shape.attached_object().is_none());
        let native = scene.lock();
        assert_eq!(native.shape_count(), 1);
        let collider = native.colliders.get(key).unwrap();
        assert!(collider.parent().is_none());
        assert!(!collider.is_enabled());
    }

    #[test]
    fn test_sleep_and_wake() {
        let scene = scene();
        let object = CollisionObject::create(&scene, &RigidBodyDesc::dynamic()).unwrap();
        object.sleep().unwrap();
        assert!(object.is_asleep().unwrap());
        object.wake().unwrap();
        assert!(!object.is_asleep().unwrap());
    }
}
