//! The engine's physics abstraction, as implemented by this backend
//!
//! The engine talks to physics objects through these capability traits and
//! never sees Rapier types. Code that needs the backend's own types gets
//! them back with the `resolve` functions, which return `None` for objects
//! created by some other backend.

use crate::body::{CollisionObject, RigidBodyDesc, RigidBodyType};
use crate::controller::{CharacterController, ControllerMove, ShapeType};
use crate::error::Result;
use crate::input::RawDriveInput;
use crate::material::{PhysicsMaterial, SurfaceMaterialId};
use crate::shape::{GeometryDesc, PrimitiveShape, Shape, ShapeKind};
use crate::vehicle::{Vehicle, VehicleDesc, Wheel};
use std::any::Any;
use std::sync::Arc;

/// Engine view of a collision shape
pub trait EngineShape: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn kind(&self) -> ShapeKind;
    fn geometry(&self) -> Option<GeometryDesc>;
    fn surface_material(&self) -> Option<SurfaceMaterialId>;
    fn is_finalized(&self) -> bool;
}

/// Engine view of a collision object
pub trait EngineCollisionObject: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn body_type(&self) -> Result<RigidBodyType>;
    fn position(&self) -> Result<[f32; 3]>;
    fn set_position(&self, position: [f32; 3]) -> Result<()>;
    fn is_asleep(&self) -> Result<bool>;
    fn shape_count(&self) -> usize;
}

/// Engine view of a character controller
pub trait EngineController: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn shape_type(&self) -> ShapeType;
    fn half_extents(&self) -> [f32; 3];
    fn move_by(&self, displacement: [f32; 3], dt: f32) -> Result<ControllerMove>;
    fn foot_position(&self) -> Result<[f32; 3]>;
    fn set_foot_position(&self, position: [f32; 3]) -> Result<()>;
    fn slope_limit(&self) -> Result<f32>;
    fn set_slope_limit(&self, degrees: f32) -> Result<()>;
    fn step_height(&self) -> Result<f32>;
    fn set_step_height(&self, height: f32) -> Result<()>;
    fn is_grounded(&self) -> Result<bool>;
}

/// Engine view of a vehicle
pub trait EngineVehicle: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn wheel_count(&self) -> usize;
    fn wheel(&self, index: usize) -> Option<Arc<dyn EngineWheel>>;
    fn set_input(&self, input: RawDriveInput);
    fn is_in_air(&self) -> bool;
    fn forward_speed(&self) -> f32;
    fn sideways_speed(&self) -> f32;
}

/// Engine view of a single wheel
pub trait EngineWheel: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn index(&self) -> usize;
    fn is_in_air(&self) -> bool;
    fn tire_friction(&self) -> f32;
}

/// Physics environment as seen by the engine
pub trait PhysicsBackend {
    fn create_shape(&self, request: &PrimitiveShape, material: &PhysicsMaterial) -> Option<Arc<dyn EngineShape>>;
    fn create_collision_object(
        &self,
        desc: &RigidBodyDesc,
        shapes: &[Arc<Shape>],
    ) -> Option<Arc<dyn EngineCollisionObject>>;
    fn create_capsule_controller(
        &self,
        half_width: f32,
        half_height: f32,
        step_height: f32,
        slope_limit: f32,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Option<Arc<dyn EngineController>>;
    fn create_box_controller(
        &self,
        half_extents: [f32; 3],
        step_height: f32,
        slope_limit: f32,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Option<Arc<dyn EngineController>>;
    fn create_vehicle(&self, chassis: &Arc<CollisionObject>, desc: &VehicleDesc) -> Option<Arc<dyn EngineVehicle>>;
    fn simulate(&self, delta_time: f32);
    fn gravity(&self) -> [f32; 3];
    fn set_gravity(&self, gravity: [f32; 3]);
}

// ==================== Resolution ====================

impl Shape {
    /// Backend shape behind an engine handle
    pub fn resolve(shape: &dyn EngineShape) -> Option<&Shape> {
        shape.as_any().downcast_ref()
    }
}

impl CollisionObject {
    /// Backend collision object behind an engine handle
    pub fn resolve(object: &dyn EngineCollisionObject) -> Option<&CollisionObject> {
        object.as_any().downcast_ref()
    }
}

impl CharacterController {
    /// Backend controller behind an engine handle
    pub fn resolve(controller: &dyn EngineController) -> Option<&CharacterController> {
        controller.as_any().downcast_ref()
    }
}

impl Vehicle {
    /// Backend vehicle behind an engine handle
    pub fn resolve(vehicle: &dyn EngineVehicle) -> Option<&Vehicle> {
        vehicle.as_any().downcast_ref()
    }
}

impl Wheel {
    /// Backend wheel behind an engine handle
    pub fn resolve(wheel: &dyn EngineWheel) -> Option<&Wheel> {
        wheel.as_any().downcast_ref()
    }
}

// ==================== Capabilities ====================

impl EngineShape for Shape {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind(&self) -> ShapeKind {
        Shape::kind(self)
    }

    fn geometry(&self) -> Option<GeometryDesc> {
        Shape::geometry(self)
    }

    fn surface_material(&self) -> Option<SurfaceMaterialId> {
        Shape::surface_material(self)
    }

    fn is_finalized(&self) -> bool {
        Shape::is_finalized(self)
    }
}

impl EngineCollisionObject for CollisionObject {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn body_type(&self) -> Result<RigidBodyType> {
        CollisionObject::body_type(self)
    }

    fn position(&self) -> Result<[f32; 3]> {
        CollisionObject::position(self)
    }

    fn set_position(&self, position: [f32; 3]) -> Result<()> {
        CollisionObject::set_position(self, position)
    }

    fn is_asleep(&self) -> Result<bool> {
        CollisionObject::is_asleep(self)
    }

    fn shape_count(&self) -> usize {
        self.shapes().len()
    }
}

impl EngineController for CharacterController {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn shape_type(&self) -> ShapeType {
        CharacterController::shape_type(self)
    }

    fn half_extents(&self) -> [f32; 3] {
        CharacterController::half_extents(self)
    }

    fn move_by(&self, displacement: [f32; 3], dt: f32) -> Result<ControllerMove> {
        CharacterController::move_by(self, displacement, dt)
    }

    fn foot_position(&self) -> Result<[f32; 3]> {
        CharacterController::foot_position(self)
    }

    fn set_foot_position(&self, position: [f32; 3]) -> Result<()> {
        CharacterController::set_foot_position(self, position)
    }

    fn slope_limit(&self) -> Result<f32> {
        CharacterController::slope_limit(self)
    }

    fn set_slope_limit(&self, degrees: f32) -> Result<()> {
        CharacterController::set_slope_limit(self, degrees)
    }

    fn step_height(&self) -> Result<f32> {
        CharacterController::step_height(self)
    }

    fn set_step_height(&self, height: f32) -> Result<()> {
        CharacterController::set_step_height(self, height)
    }

    fn is_grounded(&self) -> Result<bool> {
        CharacterController::is_grounded(self)
    }
}

impl EngineVehicle for Vehicle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn wheel_count(&self) -> usize {
        Vehicle::wheel_count(self)
    }

    fn wheel(&self, index: usize) -> Option<Arc<dyn EngineWheel>> {
        Vehicle::wheel(self, index).map(|w| w as Arc<dyn EngineWheel>)
    }

    fn set_input(&self, input: RawDriveInput) {
        Vehicle::set_input(self, input)
    }

    fn is_in_air(&self) -> bool {
        Vehicle::is_in_air(self)
    }

    fn forward_speed(&self) -> f32 {
        Vehicle::forward_speed(self)
    }

    fn sideways_speed(&self) -> f32 {
        Vehicle::sideways_speed(self)
    }
}

impl EngineWheel for Wheel {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn index(&self) -> usize {
        Wheel::index(self)
    }

    fn is_in_air(&self) -> bool {
        Wheel::is_in_air(self)
    }

    fn tire_friction(&self) -> f32 {
        Wheel::tire_friction(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OtherShape;

    impl EngineShape for OtherShape {
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn kind(&self) -> ShapeKind {
            ShapeKind::Sphere
        }
        fn geometry(&self) -> Option<GeometryDesc> {
            None
        }
        fn surface_material(&self) -> Option<SurfaceMaterialId> {
            None
        }
        fn is_finalized(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_foreign_backend_objects_do_not_resolve() {
        let other: Arc<dyn EngineShape> = Arc::new(OtherShape);
        assert!(Shape::resolve(other.as_ref()).is_none());
    }
}
