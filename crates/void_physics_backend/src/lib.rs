//! Void Physics Backend - Rapier 3D behind the engine's physics abstraction
//!
//! This crate implements the engine's physics interfaces on top of Rapier 3D.
//! Engine code holds `Arc` handles to shapes, collision objects, character
//! controllers and vehicles; each handle owns (or borrows, for parts of a
//! composite) exactly one foreign Rapier object and releases it exactly once.
//!
//! # Features
//!
//! - Engine units in, Rapier meters out (one engine unit is 2.5 cm)
//! - Primitive shapes, plus two-phase convex hulls, triangle meshes and compounds
//! - Capsule and box character controllers with hit reports
//! - Four-wheel raycast vehicles with smoothed digital or analog input
//! - Collision events resolved back to engine objects
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │               RapierEnvironment                  │
//! │  ┌─────────────┐  ┌──────────┐  ┌─────────────┐  │
//! │  │ Controllers │  │ Vehicles │  │   Events    │  │
//! │  └─────────────┘  └──────────┘  └─────────────┘  │
//! │  ┌──────────────────────────────────────────────┐│
//! │  │      Arc<Mutex<NativeScene>> (Rapier)        ││
//! │  │  bodies, colliders, controllers, drives,     ││
//! │  │  batch queries, back-reference tables        ││
//! │  └──────────────────────────────────────────────┘│
//! └──────────────────────────────────────────────────┘
//!                        │
//!         ┌──────────────┼──────────────┐
//!         ▼              ▼              ▼
//!    ┌─────────┐  ┌───────────────┐  ┌─────────┐
//!    │  Shape  │  │CollisionObject│  │ Vehicle │
//!    │         │  │ (+Controller) │  │ + Wheel │
//!    └─────────┘  └───────────────┘  └─────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use void_physics_backend::prelude::*;
//!
//! let env = RapierEnvironment::new(BackendConfig::default())?;
//!
//! // A falling box
//! let shape = env.create_box_shape([20.0, 20.0, 20.0], &PhysicsMaterial::default()).unwrap();
//! let body = env
//!     .create_rigid_body(&RigidBodyDesc::dynamic().with_position(0.0, 400.0, 0.0), &[shape])
//!     .unwrap();
//!
//! // A character standing at the origin
//! let player = env
//!     .create_capsule_controller(30.0, 40.0, 5.0, 45.0, [0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0])
//!     .unwrap();
//! player.move_by([10.0, 0.0, 0.0], 1.0 / 60.0)?;
//!
//! env.simulate(1.0 / 60.0);
//! ```

pub mod backref;
pub mod body;
pub mod config;
pub mod controller;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod filter;
pub mod input;
pub mod material;
pub mod query;
pub mod resource;
pub mod scene;
pub mod shape;
pub mod units;
pub mod vehicle;

pub mod prelude {
    //! Common imports for the physics backend
    pub use crate::body::{CollisionObject, RigidBodyDesc, RigidBodyType};
    pub use crate::config::{BackendConfig, ControllerDefaults, NonWalkableMode, VehicleDefaults};
    pub use crate::controller::{CharacterController, ControllerMove, ShapeType};
    pub use crate::engine::{
        EngineCollisionObject, EngineController, EngineShape, EngineVehicle, EngineWheel, PhysicsBackend,
    };
    pub use crate::environment::RapierEnvironment;
    pub use crate::error::{BridgeError, Result};
    pub use crate::events::{CollisionEvent, CollisionEventType, ControllerHit, ControllerHitReport};
    pub use crate::filter::{CollisionGroups, FilterData};
    pub use crate::input::{InputMode, RawDriveInput};
    pub use crate::material::{PhysicsMaterial, SurfaceMaterialId, TireFrictionTable};
    pub use crate::query::{RaycastHit, RaycastOptions};
    pub use crate::shape::{GeometryDesc, PrimitiveShape, Shape, ShapeFlags, ShapeKind};
    pub use crate::vehicle::{Vehicle, VehicleDesc, Wheel, WheelDesc};
}

pub use prelude::*;
