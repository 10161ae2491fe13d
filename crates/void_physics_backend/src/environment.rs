//! Physics environment - owns the scene and the engine objects living in it

use crate::body::{CollisionObject, RigidBodyDesc};
use crate::config::BackendConfig;
use crate::controller::{CharacterController, ClimbingMode, ControllerDesc, ControllerKindDesc, ShapeType};
use crate::engine::{EngineCollisionObject, EngineController, EngineShape, EngineVehicle, PhysicsBackend};
use crate::error::Result;
use crate::events::{resolve_collider, CollisionEvent, ControllerHitReport, EventCollector};
use crate::material::PhysicsMaterial;
use crate::query::{RaycastHit, RaycastOptions};
use crate::resource::ForeignHandle;
use crate::scene::{NativeScene, ReleaseRecord};
use crate::shape::{HeightfieldDesc, PrimitiveShape, Shape, ShapeKind};
use crate::units;
use crate::vehicle::{Vehicle, VehicleDesc};
use parking_lot::Mutex;
use rapier3d::prelude as rapier;
use std::sync::Arc;

/// The physics environment.
///
/// Engine collections are declared before the scene so that they are
/// dropped first.
pub struct RapierEnvironment {
    /// Controllers registered with the environment
    controllers: Mutex<Vec<Arc<CharacterController>>>,

    /// Vehicles ticked by [`simulate`](Self::simulate)
    vehicles: Mutex<Vec<Arc<Vehicle>>>,

    /// Collision events from the last simulate call
    events: Mutex<EventCollector>,

    /// Hit report installed on every controller created here
    hit_report: Mutex<Option<Arc<dyn ControllerHitReport>>>,

    /// Material for controllers
    generic_material: PhysicsMaterial,

    config: BackendConfig,

    scene: Arc<Mutex<NativeScene>>,
}

impl RapierEnvironment {
    /// Create an environment with an empty scene
    pub fn new(config: BackendConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: BackendConfig) -> Self {
        let scene = Arc::new(Mutex::new(NativeScene::new(&config)));
        log::debug!("created physics environment (timestep {})", config.timestep);
        Self {
            controllers: Mutex::new(Vec::new()),
            vehicles: Mutex::new(Vec::new()),
            events: Mutex::new(EventCollector::new()),
            hit_report: Mutex::new(None),
            generic_material: PhysicsMaterial::generic(),
            config,
            scene,
        }
    }

    /// Get the backend configuration
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Material shared by character controllers
    pub fn generic_material(&self) -> &PhysicsMaterial {
        &self.generic_material
    }

    /// Set gravity (engine units/s²)
    pub fn set_gravity(&self, gravity: [f32; 3]) {
        self.scene.lock().set_gravity(units::to_foreign_vector(gravity));
    }

    /// Get gravity (engine units/s²)
    pub fn gravity(&self) -> [f32; 3] {
        units::from_foreign_vector(&self.scene.lock().gravity())
    }

    // ==================== Shapes ====================

    /// Create a primitive shape with default flags and an identity pose.
    ///
    /// `None` for cylinders, heightfields and invalid dimensions.
    pub fn create_primitive_shape(&self, request: &PrimitiveShape, material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        let Some(shape) = Shape::primitive(&self.scene, request, *material) else {
            log::debug!("primitive shape request {:?} produced no shape", request.kind());
            return None;
        };
        shape.initialize(false);
        Some(shape)
    }

    /// Create a box shape
    pub fn create_box_shape(&self, half_extents: [f32; 3], material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        self.create_primitive_shape(&PrimitiveShape::Box { half_extents }, material)
    }

    /// Create a sphere shape
    pub fn create_sphere_shape(&self, radius: f32, material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        self.create_primitive_shape(&PrimitiveShape::Sphere { radius }, material)
    }

    /// Create a Y-aligned capsule shape
    pub fn create_capsule_shape(&self, half_width: f32, half_height: f32, material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        self.create_primitive_shape(
            &PrimitiveShape::Capsule {
                radius: half_width,
                half_height,
            },
            material,
        )
    }

    /// Cylinders are not supported; always `None`
    pub fn create_cylinder_shape(&self, radius: f32, half_height: f32, material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        self.create_primitive_shape(&PrimitiveShape::Cylinder { radius, half_height }, material)
    }

    /// Heightfield terrain is not supported; always `None`
    pub fn create_heightfield_terrain_shape(
        &self,
        desc: HeightfieldDesc,
        material: &PhysicsMaterial,
    ) -> Option<Arc<Shape>> {
        self.create_primitive_shape(&PrimitiveShape::Heightfield(desc), material)
    }

    /// Create an empty convex hull. Add points, then [`Shape::finalize`].
    pub fn create_convex_hull_shape(&self, material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        Shape::incremental(&self.scene, ShapeKind::ConvexHull, *material)
    }

    /// Create an empty triangle mesh. Add triangles, then [`Shape::finalize`].
    pub fn create_triangle_shape(&self, material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        Shape::incremental(&self.scene, ShapeKind::TriangleMesh, *material)
    }

    /// Create a compound over existing shapes, each placed at its own local
    /// pose. The children are referenced, not owned. More children can be
    /// added before [`Shape::finalize`].
    pub fn create_compound_shape(&self, children: &[Arc<Shape>], material: &PhysicsMaterial) -> Option<Arc<Shape>> {
        let compound = Shape::incremental(&self.scene, ShapeKind::Compound, *material)?;
        for child in children {
            let (position, rotation) = child.local_pose();
            if let Err(err) = compound.add_child(child, position, rotation) {
                log::debug!("compound shape rejected a child: {}", err);
                return None;
            }
        }
        Some(compound)
    }

    /// Apply default flags (and, unless `basic_only`, an identity pose)
    pub fn initialize_shape(&self, shape: &Shape, basic_only: bool) {
        shape.initialize(basic_only);
    }

    // ==================== Collision objects ====================

    /// Create a collision object and attach `shapes` to it.
    ///
    /// `None` if the actor cannot be created or a shape cannot be attached;
    /// nothing created here outlives the failure.
    pub fn create_rigid_body(&self, desc: &RigidBodyDesc, shapes: &[Arc<Shape>]) -> Option<Arc<CollisionObject>> {
        let Some(object) = CollisionObject::create(&self.scene, desc) else {
            log::debug!("rigid body creation failed");
            return None;
        };
        for shape in shapes {
            if let Err(err) = object.attach_shape(shape) {
                log::debug!("rigid body creation failed: {}", err);
                for attached in object.shapes() {
                    let _ = object.detach_shape(&attached);
                }
                return None;
            }
        }
        Some(object)
    }

    // ==================== Character controllers ====================

    /// Install a hit report on every controller created from now on
    pub fn set_controller_hit_report(&self, report: Option<Arc<dyn ControllerHitReport>>) {
        *self.hit_report.lock() = report;
    }

    /// Create a controller from a native descriptor. The controller is not
    /// registered with the environment.
    pub fn create_controller(
        &self,
        desc: &ControllerDesc,
        half_extents: [f32; 3],
        shape_type: ShapeType,
    ) -> Option<Arc<CharacterController>> {
        if !desc.is_valid() {
            log::debug!("invalid controller descriptor: {:?}", desc.kind);
            return None;
        }
        let key = self.scene.lock().create_controller(desc);
        let handle = ForeignHandle::wrap(key, &self.scene, NativeScene::release_controller)?;
        let controller = CharacterController::create(&self.scene, handle, half_extents, shape_type)?;
        controller.set_hit_report(self.hit_report.lock().clone());
        Some(controller)
    }

    /// Create and register a capsule controller standing at `position`.
    /// `slope_limit` is in degrees.
    pub fn create_capsule_controller(
        &self,
        half_width: f32,
        half_height: f32,
        step_height: f32,
        slope_limit: f32,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Option<Arc<CharacterController>> {
        let kind = ControllerKindDesc::Capsule {
            radius: units::to_foreign_length(half_width),
            half_height: units::to_foreign_length(half_height),
            climbing_mode: ClimbingMode::Easy,
        };
        let desc = ControllerDesc::from_spawn(
            kind,
            half_height,
            step_height,
            position,
            rotation,
            &self.config.controller,
            self.generic_material,
        );
        let controller = self.create_controller(&desc, [half_width, half_height, half_width], ShapeType::Capsule)?;
        self.finish_controller(&controller, slope_limit);
        Some(controller)
    }

    /// Create and register a box controller standing at `position`.
    ///
    /// `half_extents` is (side, height, forward); `slope_limit` is in degrees.
    pub fn create_box_controller(
        &self,
        half_extents: [f32; 3],
        step_height: f32,
        slope_limit: f32,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Option<Arc<CharacterController>> {
        let [side, height, forward] = half_extents;
        let kind = ControllerKindDesc::Box {
            half_height: units::to_foreign_length(height),
            half_side_extent: units::to_foreign_length(side),
            half_forward_extent: units::to_foreign_length(forward),
        };
        let desc = ControllerDesc::from_spawn(
            kind,
            height,
            step_height,
            position,
            rotation,
            &self.config.controller,
            self.generic_material,
        );
        let controller = self.create_controller(&desc, half_extents, ShapeType::Box)?;
        self.finish_controller(&controller, slope_limit);
        Some(controller)
    }

    fn finish_controller(&self, controller: &Arc<CharacterController>, slope_limit: f32) {
        if let Err(err) = controller.set_slope_limit(slope_limit) {
            log::warn!("could not set controller slope limit: {}", err);
        }
        self.add_controller(controller);
    }

    /// Register a controller. Registering twice is a no-op.
    pub fn add_controller(&self, controller: &Arc<CharacterController>) {
        let mut controllers = self.controllers.lock();
        if !controllers.iter().any(|c| Arc::ptr_eq(c, controller)) {
            controllers.push(controller.clone());
        }
    }

    /// Unregister a controller; returns whether it was registered
    pub fn remove_controller(&self, controller: &Arc<CharacterController>) -> bool {
        let removed = {
            let mut controllers = self.controllers.lock();
            controllers
                .iter()
                .position(|c| Arc::ptr_eq(c, controller))
                .map(|i| controllers.swap_remove(i))
        };
        removed.is_some()
    }

    /// Registered controllers
    pub fn controllers(&self) -> Vec<Arc<CharacterController>> {
        self.controllers.lock().clone()
    }

    // ==================== Vehicles ====================

    /// Create, initialize and register a vehicle driving `chassis`.
    ///
    /// `None` if the chassis is not dynamic or the descriptor is invalid.
    pub fn create_vehicle(&self, chassis: &Arc<CollisionObject>, desc: &VehicleDesc) -> Option<Arc<Vehicle>> {
        let drive = desc.to_foreign();
        let key = self.scene.lock().create_drive(chassis.actor_key(), &drive);
        let Some(handle) = ForeignHandle::wrap(key, &self.scene, NativeScene::release_drive) else {
            log::debug!("vehicle creation failed: drive rejected");
            return None;
        };
        let vehicle = Vehicle::create(&self.scene, handle, chassis.clone(), &self.config.vehicle);
        if let Err(err) = vehicle.initialize() {
            log::debug!("vehicle creation failed: {}", err);
            return None;
        }
        self.add_vehicle(&vehicle);
        Some(vehicle)
    }

    /// Register a vehicle. Registering twice is a no-op.
    pub fn add_vehicle(&self, vehicle: &Arc<Vehicle>) {
        let mut vehicles = self.vehicles.lock();
        if !vehicles.iter().any(|v| Arc::ptr_eq(v, vehicle)) {
            vehicles.push(vehicle.clone());
        }
    }

    /// Unregister a vehicle; returns whether it was registered
    pub fn remove_vehicle(&self, vehicle: &Arc<Vehicle>) -> bool {
        let removed = {
            let mut vehicles = self.vehicles.lock();
            vehicles
                .iter()
                .position(|v| Arc::ptr_eq(v, vehicle))
                .map(|i| vehicles.remove(i))
        };
        removed.is_some()
    }

    /// Registered vehicles
    pub fn vehicles(&self) -> Vec<Arc<Vehicle>> {
        self.vehicles.lock().clone()
    }

    // ==================== Simulation ====================

    /// Advance the environment: vehicles first, then the fixed-timestep
    /// scene step, then collision event resolution.
    pub fn simulate(&self, delta_time: f32) {
        let vehicles = self.vehicles();
        for vehicle in &vehicles {
            if vehicle.is_initialized() {
                vehicle.simulate(delta_time);
            } else {
                log::warn!("skipping uninitialized vehicle");
            }
        }
        drop(vehicles);

        let collision_events: Vec<CollisionEvent> = {
            let mut scene = self.scene.lock();
            let raw = scene.step(delta_time);
            raw.iter().map(|event| CollisionEvent::resolve(&scene, event)).collect()
        };
        self.events.lock().collision_events = collision_events;
    }

    /// Collision events from the last [`simulate`](Self::simulate)
    pub fn collision_events(&self) -> Vec<CollisionEvent> {
        self.events.lock().collision_events.clone()
    }

    /// Take the collected events, leaving the buffer empty
    pub fn take_events(&self) -> EventCollector {
        std::mem::take(&mut *self.events.lock())
    }

    // ==================== Queries ====================

    /// Cast a ray (engine units) against every solid shape
    pub fn raycast(&self, origin: [f32; 3], direction: [f32; 3], options: &RaycastOptions) -> Option<RaycastHit> {
        let dir = units::to_foreign_normal(direction);
        let ray = rapier::Ray::new(units::to_foreign_point(origin), dir);
        let max_toi = units::to_foreign_length(options.max_distance);

        let mut scene = self.scene.lock();
        let (collider, hit) = scene.cast_ray(&ray, max_toi, options.filter)?;
        let (shape, object) = resolve_collider(&scene, collider);
        let filter_data = scene.shape_filter_data(collider).unwrap_or_default();
        drop(scene);

        Some(RaycastHit {
            shape,
            object,
            point: units::from_foreign_point(&ray.point_at(hit.time_of_impact)),
            normal: units::from_foreign_normal(&hit.normal),
            distance: units::from_foreign_length(hit.time_of_impact),
            filter_data,
        })
    }

    // ==================== Debug ====================

    /// Number of foreign actors
    pub fn actor_count(&self) -> usize {
        self.scene.lock().actor_count()
    }

    /// Number of foreign shapes
    pub fn shape_count(&self) -> usize {
        self.scene.lock().shape_count()
    }

    /// Number of foreign controllers (registered or not)
    pub fn controller_count(&self) -> usize {
        self.scene.lock().controller_count()
    }

    /// Number of foreign vehicle drives
    pub fn drive_count(&self) -> usize {
        self.scene.lock().drive_count()
    }

    /// Number of foreign batched queries
    pub fn batch_query_count(&self) -> usize {
        self.scene.lock().batch_query_count()
    }

    /// Foreign releases so far, oldest first. Empty unless
    /// [`BackendConfig::track_releases`] is set.
    pub fn release_history(&self) -> Vec<ReleaseRecord> {
        self.scene.lock().release_history().to_vec()
    }

    /// Forget the recorded releases
    pub fn clear_release_history(&self) {
        self.scene.lock().clear_release_history();
    }
}

impl Default for RapierEnvironment {
    fn default() -> Self {
        Self::with_valid_config(BackendConfig::default())
    }
}

impl PhysicsBackend for RapierEnvironment {
    fn create_shape(&self, request: &PrimitiveShape, material: &PhysicsMaterial) -> Option<Arc<dyn EngineShape>> {
        self.create_primitive_shape(request, material)
            .map(|s| s as Arc<dyn EngineShape>)
    }

    fn create_collision_object(
        &self,
        desc: &RigidBodyDesc,
        shapes: &[Arc<Shape>],
    ) -> Option<Arc<dyn EngineCollisionObject>> {
        self.create_rigid_body(desc, shapes)
            .map(|o| o as Arc<dyn EngineCollisionObject>)
    }

    fn create_capsule_controller(
        &self,
        half_width: f32,
        half_height: f32,
        step_height: f32,
        slope_limit: f32,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Option<Arc<dyn EngineController>> {
        RapierEnvironment::create_capsule_controller(
            self,
            half_width,
            half_height,
            step_height,
            slope_limit,
            position,
            rotation,
        )
        .map(|c| c as Arc<dyn EngineController>)
    }

    fn create_box_controller(
        &self,
        half_extents: [f32; 3],
        step_height: f32,
        slope_limit: f32,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Option<Arc<dyn EngineController>> {
        RapierEnvironment::create_box_controller(self, half_extents, step_height, slope_limit, position, rotation)
            .map(|c| c as Arc<dyn EngineController>)
    }

    fn create_vehicle(&self, chassis: &Arc<CollisionObject>, desc: &VehicleDesc) -> Option<Arc<dyn EngineVehicle>> {
        RapierEnvironment::create_vehicle(self, chassis, desc).map(|v| v as Arc<dyn EngineVehicle>)
    }

    fn simulate(&self, delta_time: f32) {
        RapierEnvironment::simulate(self, delta_time)
    }

    fn gravity(&self) -> [f32; 3] {
        RapierEnvironment::gravity(self)
    }

    fn set_gravity(&self, gravity: [f32; 3]) {
        RapierEnvironment::set_gravity(self, gravity)
    }
}
