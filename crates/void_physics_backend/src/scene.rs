//! Native scene - the Rapier side of the bridge
//!
//! `NativeScene` owns every foreign object: Rapier's body/collider sets and
//! pipelines, plus the objects Rapier has no container for (character
//! controllers, vehicle drives, batched suspension queries). Allocation
//! functions return `Option<Key>`; release functions have the
//! [`ReleaseFn`](crate::resource::ReleaseFn) shape so engine wrappers can own
//! keys through [`ForeignHandle`](crate::resource::ForeignHandle).

use crate::backref::BackRefTable;
use crate::body::CollisionObject;
use crate::config::{BackendConfig, NonWalkableMode};
use crate::controller::{CharacterController, ClimbingMode, ControllerDesc, ControllerKindDesc};
use crate::filter::{FilterData, PreFilterFn, QueryHitType};
use crate::input::DriveInputs;
use crate::material::{SurfaceMaterialId, TireFrictionTable};
use crate::query::{SuspensionHit, WheelQueryResult};
use crate::shape::{Shape, ShapeFlags};
use crate::vehicle::{DriveDesc, Vehicle, WHEEL_COUNT};
use rapier3d::control::{
    CharacterAutostep, CharacterCollision, CharacterLength, DynamicRayCastVehicleController,
    KinematicCharacterController, WheelTuning,
};
use rapier3d::na::{Unit, UnitQuaternion};
use rapier3d::prelude as rapier;
use std::collections::HashMap;
use std::f32::consts::{FRAC_PI_2, PI};
use std::num::NonZeroUsize;

/// Key of a character controller record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerKey(u64);

/// Key of a vehicle drive record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DriveKey(u64);

/// Key of a batched scene query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchQueryKey(u64);

/// One foreign release, as recorded by the release journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseRecord {
    Shape(rapier::ColliderHandle),
    Actor(rapier::RigidBodyHandle),
    Controller(ControllerKey),
    Drive(DriveKey),
    BatchQuery(BatchQueryKey),
}

/// Character controller record: Rapier's controller plus the kinematic
/// actor and shape it drives. Releasing the record deletes both.
pub(crate) struct NativeController {
    pub(crate) kcc: KinematicCharacterController,
    pub(crate) actor: rapier::RigidBodyHandle,
    pub(crate) shape: rapier::ColliderHandle,
    pub(crate) material: crate::material::PhysicsMaterial,
    pub(crate) up: rapier::Vector<f32>,
    pub(crate) foot_offset: f32,
    pub(crate) slope_limit: f32,
    pub(crate) slope_limit_enabled: bool,
    pub(crate) non_walkable_mode: NonWalkableMode,
    pub(crate) min_step_width: f32,
    pub(crate) grounded: bool,
}

/// Vehicle drive record. The chassis actor is referenced, not owned.
pub(crate) struct NativeDrive {
    pub(crate) controller: DynamicRayCastVehicleController,
    pub(crate) desc: DriveDesc,
}

/// Batched suspension query: capacity plus the pre-filter it runs
pub(crate) struct NativeBatchQuery {
    pub(crate) max_raycasts: usize,
    pub(crate) pre_filter: PreFilterFn,
    pub(crate) query_data: FilterData,
}

/// Back-references from foreign keys to engine wrappers
#[derive(Default)]
pub(crate) struct SceneBackRefs {
    pub(crate) shapes: BackRefTable<rapier::ColliderHandle, Shape>,
    pub(crate) objects: BackRefTable<rapier::RigidBodyHandle, CollisionObject>,
    pub(crate) controllers: BackRefTable<ControllerKey, CharacterController>,
    pub(crate) vehicles: BackRefTable<DriveKey, Vehicle>,
}

/// A collision event as reported by Rapier, before back-reference resolution
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawCollisionEvent {
    pub(crate) collider1: rapier::ColliderHandle,
    pub(crate) collider2: rapier::ColliderHandle,
    pub(crate) started: bool,
    pub(crate) is_sensor: bool,
}

/// The foreign world
pub struct NativeScene {
    gravity: rapier::Vector<f32>,
    timestep: f32,
    max_substeps: u32,
    ccd_enabled: bool,
    sleeping_enabled: bool,
    integration_params: rapier::IntegrationParameters,
    pipeline: rapier::PhysicsPipeline,
    islands: rapier::IslandManager,
    broad_phase: rapier::DefaultBroadPhase,
    narrow_phase: rapier::NarrowPhase,
    impulse_joints: rapier::ImpulseJointSet,
    multibody_joints: rapier::MultibodyJointSet,
    ccd_solver: rapier::CCDSolver,
    query_pipeline: rapier::QueryPipeline,
    pub(crate) bodies: rapier::RigidBodySet,
    pub(crate) colliders: rapier::ColliderSet,
    controllers: HashMap<ControllerKey, NativeController>,
    drives: HashMap<DriveKey, NativeDrive>,
    batch_queries: HashMap<BatchQueryKey, NativeBatchQuery>,
    next_key: u64,
    pub(crate) backrefs: SceneBackRefs,
    release_log: Option<Vec<ReleaseRecord>>,
    accumulated_time: f32,
}

impl NativeScene {
    /// Create an empty scene
    pub fn new(config: &BackendConfig) -> Self {
        let mut integration_params = rapier::IntegrationParameters::default();
        integration_params.dt = config.timestep;
        integration_params.num_solver_iterations =
            NonZeroUsize::new(config.velocity_iterations).unwrap_or(NonZeroUsize::MIN);

        Self {
            gravity: crate::units::to_foreign_vector(config.gravity),
            timestep: config.timestep,
            max_substeps: config.max_substeps,
            ccd_enabled: config.ccd_enabled,
            sleeping_enabled: config.sleeping_enabled,
            integration_params,
            pipeline: rapier::PhysicsPipeline::new(),
            islands: rapier::IslandManager::new(),
            broad_phase: rapier::DefaultBroadPhase::new(),
            narrow_phase: rapier::NarrowPhase::new(),
            impulse_joints: rapier::ImpulseJointSet::new(),
            multibody_joints: rapier::MultibodyJointSet::new(),
            ccd_solver: rapier::CCDSolver::new(),
            query_pipeline: rapier::QueryPipeline::new(),
            bodies: rapier::RigidBodySet::new(),
            colliders: rapier::ColliderSet::new(),
            controllers: HashMap::new(),
            drives: HashMap::new(),
            batch_queries: HashMap::new(),
            next_key: 0,
            backrefs: SceneBackRefs::default(),
            release_log: config.track_releases.then(Vec::new),
            accumulated_time: 0.0,
        }
    }

    fn next_key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }

    fn record(&mut self, released: ReleaseRecord) {
        log::trace!("released {:?}", released);
        if let Some(log) = self.release_log.as_mut() {
            log.push(released);
        }
    }

    /// Gravity in Rapier units
    pub fn gravity(&self) -> rapier::Vector<f32> {
        self.gravity
    }

    /// Set gravity in Rapier units
    pub fn set_gravity(&mut self, gravity: rapier::Vector<f32>) {
        self.gravity = gravity;
    }

    // ==================== Shapes ====================

    /// Bind a geometry and a material into a standalone shape.
    ///
    /// The shape takes part in nothing until flags are applied and it is
    /// attached to an actor.
    pub(crate) fn create_shape(
        &mut self,
        geometry: rapier::SharedShape,
        material: &crate::material::PhysicsMaterial,
        filter: FilterData,
    ) -> Option<rapier::ColliderHandle> {
        let builder = material
            .apply(rapier::ColliderBuilder::new(geometry))
            .user_data(filter.to_bits())
            .enabled(false);
        Some(self.colliders.insert(builder))
    }

    /// Release a shape
    pub(crate) fn release_shape(scene: &mut NativeScene, handle: rapier::ColliderHandle) {
        if scene
            .colliders
            .remove(handle, &mut scene.islands, &mut scene.bodies, true)
            .is_some()
        {
            scene.record(ReleaseRecord::Shape(handle));
        }
    }

    /// Geometry currently held by a shape
    pub(crate) fn shape_geometry(&self, handle: rapier::ColliderHandle) -> Option<rapier::SharedShape> {
        self.colliders.get(handle).map(|c| c.shared_shape().clone())
    }

    /// Filter data stored on a shape
    pub(crate) fn shape_filter_data(&self, handle: rapier::ColliderHandle) -> Option<FilterData> {
        self.colliders.get(handle).map(|c| FilterData::from_bits(c.user_data))
    }

    /// Overwrite a shape's filter data
    pub(crate) fn set_shape_filter_data(&mut self, handle: rapier::ColliderHandle, filter: FilterData) -> bool {
        self.colliders
            .get_mut(handle)
            .map(|c| c.user_data = filter.to_bits())
            .is_some()
    }

    /// Apply simulation flags and, optionally, a local pose
    pub(crate) fn apply_shape_flags(
        &mut self,
        handle: rapier::ColliderHandle,
        flags: ShapeFlags,
        local_pose: Option<rapier::Isometry<f32>>,
    ) -> bool {
        let Some(collider) = self.colliders.get_mut(handle) else {
            return false;
        };
        let attached = collider.parent().is_some();
        collider.set_enabled((flags.simulation || flags.scene_query) && attached);
        collider.set_sensor(!flags.simulation);
        collider.set_active_events(if flags.simulation {
            rapier::ActiveEvents::COLLISION_EVENTS
        } else {
            rapier::ActiveEvents::empty()
        });
        if let Some(pose) = local_pose {
            if attached {
                collider.set_position_wrt_parent(pose);
            } else {
                collider.set_position(pose);
            }
        }
        true
    }

    /// Attach a shape to an actor at `local_pose`
    pub(crate) fn attach_shape(
        &mut self,
        shape: rapier::ColliderHandle,
        actor: rapier::RigidBodyHandle,
        flags: ShapeFlags,
        local_pose: rapier::Isometry<f32>,
    ) -> bool {
        let Some(actor_pose) = self.bodies.get(actor).map(|body| *body.position()) else {
            return false;
        };
        if !self.colliders.contains(shape) {
            return false;
        }
        self.colliders.set_parent(shape, Some(actor), &mut self.bodies);
        if let Some(collider) = self.colliders.get_mut(shape) {
            // World pose is otherwise only refreshed by the next step
            collider.set_position(actor_pose * local_pose);
        }
        self.apply_shape_flags(shape, flags, Some(local_pose))
    }

    /// Detach a shape from its actor
    pub(crate) fn detach_shape(&mut self, shape: rapier::ColliderHandle, flags: ShapeFlags) -> bool {
        if !self.colliders.contains(shape) {
            return false;
        }
        self.colliders.set_parent(shape, None, &mut self.bodies);
        self.apply_shape_flags(shape, flags, None)
    }

    /// Actor a shape is attached to
    pub(crate) fn shape_parent(&self, shape: rapier::ColliderHandle) -> Option<rapier::RigidBodyHandle> {
        self.colliders.get(shape).and_then(|c| c.parent())
    }

    // ==================== Actors ====================

    /// Create an actor from a builder
    pub(crate) fn create_actor(&mut self, builder: rapier::RigidBodyBuilder) -> Option<rapier::RigidBodyHandle> {
        let builder = if self.sleeping_enabled { builder } else { builder.can_sleep(false) };
        let mut body = builder.build();
        if !self.ccd_enabled {
            body.enable_ccd(false);
        }
        Some(self.bodies.insert(body))
    }

    /// Release an actor. Attached shapes are detached, not deleted: they
    /// belong to their own wrappers.
    pub(crate) fn release_actor(scene: &mut NativeScene, handle: rapier::RigidBodyHandle) {
        if scene
            .bodies
            .remove(
                handle,
                &mut scene.islands,
                &mut scene.colliders,
                &mut scene.impulse_joints,
                &mut scene.multibody_joints,
                false,
            )
            .is_some()
        {
            scene.record(ReleaseRecord::Actor(handle));
        }
    }

    /// Read access to an actor
    pub(crate) fn actor(&self, handle: rapier::RigidBodyHandle) -> Option<&rapier::RigidBody> {
        self.bodies.get(handle)
    }

    /// Write access to an actor
    pub(crate) fn actor_mut(&mut self, handle: rapier::RigidBodyHandle) -> Option<&mut rapier::RigidBody> {
        self.bodies.get_mut(handle)
    }

    // ==================== Character controllers ====================

    /// Create a character controller with its kinematic actor and shape
    pub(crate) fn create_controller(&mut self, desc: &ControllerDesc) -> Option<ControllerKey> {
        if !desc.is_valid() {
            log::debug!("rejected invalid controller descriptor: {:?}", desc);
            return None;
        }

        let up = desc.up_direction.normalize();
        let rotation = UnitQuaternion::rotation_between(&rapier::Vector::y(), &up)
            .unwrap_or_else(|| UnitQuaternion::from_axis_angle(&rapier::Vector::x_axis(), PI));
        let position = rapier::Isometry::from_parts(rapier::Translation::from(desc.position.coords), rotation);

        let (geometry, foot_offset, min_step_width) = match desc.kind {
            ControllerKindDesc::Capsule {
                radius,
                half_height,
                climbing_mode,
            } => {
                let min_width = match climbing_mode {
                    ClimbingMode::Easy => 0.5 * radius,
                    ClimbingMode::Constrained => radius,
                };
                (
                    rapier::SharedShape::capsule_y(half_height, radius),
                    half_height + radius + desc.contact_offset,
                    min_width,
                )
            }
            ControllerKindDesc::Box {
                half_height,
                half_side_extent,
                half_forward_extent,
            } => (
                rapier::SharedShape::cuboid(half_forward_extent, half_height, half_side_extent),
                half_height + desc.contact_offset,
                half_side_extent.min(half_forward_extent),
            ),
        };

        let actor = self.create_actor(rapier::RigidBodyBuilder::kinematic_position_based().position(position))?;
        let collider = desc
            .material
            .apply(rapier::ColliderBuilder::new(geometry))
            .density(desc.density)
            .user_data(
                FilterData::default()
                    .with_surface_material(desc.material.surface_material.map(|s| s.0))
                    .to_bits(),
            )
            .active_events(rapier::ActiveEvents::COLLISION_EVENTS);
        let shape = self.colliders.insert_with_parent(collider, actor, &mut self.bodies);

        let slope_limit_enabled = desc.slope_limit > 0.0;
        let mut record = NativeController {
            kcc: KinematicCharacterController {
                up: Unit::new_normalize(up),
                offset: CharacterLength::Absolute(desc.contact_offset),
                slide: true,
                ..Default::default()
            },
            actor,
            shape,
            material: desc.material,
            up,
            foot_offset,
            slope_limit: desc.slope_limit,
            slope_limit_enabled,
            non_walkable_mode: desc.non_walkable_mode,
            min_step_width,
            grounded: false,
        };
        record.apply_step_offset(desc.step_offset);
        record.apply_slope_limit();

        let key = ControllerKey(self.next_key());
        self.controllers.insert(key, record);
        Some(key)
    }

    /// Release a controller together with the shape and actor it created,
    /// shape first, then actor, then the controller itself.
    pub(crate) fn release_controller(scene: &mut NativeScene, key: ControllerKey) {
        let Some(record) = scene.controllers.remove(&key) else {
            return;
        };
        NativeScene::release_shape(scene, record.shape);
        NativeScene::release_actor(scene, record.actor);
        scene.record(ReleaseRecord::Controller(key));
    }

    pub(crate) fn controller(&self, key: ControllerKey) -> Option<&NativeController> {
        self.controllers.get(&key)
    }

    /// A controller record together with the body set its actor lives in
    pub(crate) fn controller_parts_mut(
        &mut self,
        key: ControllerKey,
    ) -> Option<(&mut NativeController, &mut rapier::RigidBodySet)> {
        let record = self.controllers.get_mut(&key)?;
        Some((record, &mut self.bodies))
    }

    /// Move a controller by `displacement` (Rapier units).
    ///
    /// Returns the applied translation, whether the controller ended up
    /// grounded or sliding, and every collision found on the way.
    pub(crate) fn move_controller(
        &mut self,
        key: ControllerKey,
        displacement: rapier::Vector<f32>,
        dt: f32,
    ) -> Option<(rapier::Vector<f32>, bool, bool, Vec<CharacterCollision>)> {
        self.query_pipeline.update(&self.colliders);

        let record = self.controllers.get_mut(&key)?;
        let mut collisions = Vec::new();
        let movement = {
            let body = self.bodies.get(record.actor)?;
            let collider = self.colliders.get(record.shape)?;
            let filter = rapier::QueryFilter::default()
                .exclude_rigid_body(record.actor)
                .exclude_sensors();
            record.kcc.move_shape(
                dt,
                &self.bodies,
                &self.colliders,
                &self.query_pipeline,
                collider.shape(),
                body.position(),
                displacement,
                filter,
                |collision| collisions.push(collision),
            )
        };
        record.grounded = movement.grounded;

        let body = self.bodies.get_mut(record.actor)?;
        let target = body.translation() + movement.translation;
        body.set_translation(target, true);

        Some((
            movement.translation,
            movement.grounded,
            movement.is_sliding_down_slope,
            collisions,
        ))
    }

    // ==================== Vehicle drives ====================

    /// Create a drive for a dynamic chassis actor
    pub(crate) fn create_drive(&mut self, chassis: rapier::RigidBodyHandle, desc: &DriveDesc) -> Option<DriveKey> {
        let body = self.bodies.get(chassis)?;
        if !body.is_dynamic() || !desc.is_valid() {
            log::debug!("rejected drive for chassis {:?}", chassis);
            return None;
        }

        let mut controller = DynamicRayCastVehicleController::new(chassis);
        for wheel in &desc.wheels {
            let tuning = WheelTuning {
                max_suspension_travel: wheel.max_suspension_travel,
                friction_slip: wheel.friction_slip,
                ..WheelTuning::default()
            };
            controller.add_wheel(
                wheel.connection_point,
                wheel.direction,
                wheel.axle,
                wheel.rest_length,
                wheel.radius,
                &tuning,
            );
        }

        let key = DriveKey(self.next_key());
        self.drives.insert(
            key,
            NativeDrive {
                controller,
                desc: desc.clone(),
            },
        );
        Some(key)
    }

    /// Release a drive. The chassis actor stays alive.
    pub(crate) fn release_drive(scene: &mut NativeScene, key: DriveKey) {
        if scene.drives.remove(&key).is_some() {
            scene.record(ReleaseRecord::Drive(key));
        }
    }

    /// Chassis actor driven by a drive
    pub(crate) fn drive_chassis(&self, key: DriveKey) -> Option<rapier::RigidBodyHandle> {
        self.drives.get(&key).map(|d| d.controller.chassis)
    }

    /// Push smoothed inputs into the drive's wheels
    pub(crate) fn set_drive_inputs(&mut self, key: DriveKey, inputs: &DriveInputs) -> bool {
        let Some(drive) = self.drives.get_mut(&key) else {
            return false;
        };
        let desc = &drive.desc;
        for (wheel, wheel_desc) in drive.controller.wheels_mut().iter_mut().zip(desc.wheels.iter()) {
            wheel.engine_force = if wheel_desc.driven {
                inputs.accel * desc.max_engine_force
            } else {
                0.0
            };
            let handbrake = if wheel_desc.handbrake {
                inputs.handbrake * desc.max_handbrake_force
            } else {
                0.0
            };
            wheel.brake = inputs.brake * desc.max_brake_force + handbrake;
            wheel.steering = if wheel_desc.steered {
                -inputs.steer * desc.max_steer_angle
            } else {
                0.0
            };
        }
        true
    }

    /// Forward and sideways speed of a drive's chassis (Rapier units)
    pub(crate) fn drive_speeds(&self, key: DriveKey) -> Option<(f32, f32)> {
        let drive = self.drives.get(&key)?;
        let body = self.bodies.get(drive.controller.chassis)?;
        let side = body.position().rotation * rapier::Vector::z();
        Some((drive.controller.current_vehicle_speed, body.linvel().dot(&side)))
    }

    // ==================== Batched queries ====================

    /// Create a batched raycast query
    pub(crate) fn create_batch_query(
        &mut self,
        max_raycasts: usize,
        pre_filter: PreFilterFn,
        query_data: FilterData,
    ) -> Option<BatchQueryKey> {
        if max_raycasts == 0 {
            return None;
        }
        let key = BatchQueryKey(self.next_key());
        self.batch_queries.insert(
            key,
            NativeBatchQuery {
                max_raycasts,
                pre_filter,
                query_data,
            },
        );
        Some(key)
    }

    /// Release a batched query
    pub(crate) fn release_batch_query(scene: &mut NativeScene, key: BatchQueryKey) {
        if scene.batch_queries.remove(&key).is_some() {
            scene.record(ReleaseRecord::BatchQuery(key));
        }
    }

    /// Cast one suspension ray per wheel and write the hits into `results`.
    ///
    /// Returns `false` if the batch or drive has been released. Panics if
    /// `results` or the batch cannot hold one slot per wheel.
    pub(crate) fn suspension_raycasts(
        &mut self,
        batch: BatchQueryKey,
        drive: DriveKey,
        results: &mut [SuspensionHit],
    ) -> bool {
        self.query_pipeline.update(&self.colliders);

        let (Some(query), Some(drive)) = (self.batch_queries.get(&batch), self.drives.get(&drive)) else {
            return false;
        };
        assert!(
            results.len() >= drive.desc.wheels.len() && query.max_raycasts >= drive.desc.wheels.len(),
            "suspension raycast buffers are smaller than the wheel count"
        );

        let chassis = drive.controller.chassis;
        let Some(body) = self.bodies.get(chassis) else {
            results.iter_mut().for_each(|slot| *slot = SuspensionHit::default());
            return true;
        };
        let pose = *body.position();

        let pre_filter = query.pre_filter;
        let query_data = query.query_data;
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            pre_filter(query_data, FilterData::from_bits(collider.user_data)) == QueryHitType::Block
        };
        let filter = rapier::QueryFilter::default()
            .exclude_rigid_body(chassis)
            .exclude_sensors()
            .predicate(&predicate);

        for (slot, wheel) in results.iter_mut().zip(drive.desc.wheels.iter()) {
            let origin = pose * wheel.connection_point;
            let direction = pose.rotation * wheel.direction;
            let max_toi = wheel.rest_length + wheel.max_suspension_travel + wheel.radius;
            let ray = rapier::Ray::new(origin, direction);

            *slot = match self.query_pipeline.cast_ray_and_get_normal(
                &self.bodies,
                &self.colliders,
                &ray,
                max_toi,
                true,
                filter,
            ) {
                Some((collider, hit)) => SuspensionHit {
                    collider: Some(collider),
                    distance: hit.time_of_impact,
                    point: ray.point_at(hit.time_of_impact),
                    normal: hit.normal,
                    filter_data: self.shape_filter_data(collider).unwrap_or_default(),
                },
                None => SuspensionHit::default(),
            };
        }
        true
    }

    /// Run the drive's suspension/tire update for `dt` and read back one
    /// result per wheel.
    ///
    /// Tire friction for each wheel comes from `friction` keyed by the
    /// surface material under that wheel in `hits`. Returns `false` if the
    /// batch or drive has been released.
    pub(crate) fn update_drive(
        &mut self,
        batch: BatchQueryKey,
        key: DriveKey,
        dt: f32,
        friction: &TireFrictionTable,
        hits: &[SuspensionHit],
        out: &mut [WheelQueryResult],
    ) -> bool {
        let (Some(query), Some(drive)) = (self.batch_queries.get(&batch), self.drives.get_mut(&key)) else {
            return false;
        };
        let chassis = drive.controller.chassis;
        if !self.bodies.contains(chassis) {
            out.iter_mut().for_each(|slot| *slot = WheelQueryResult::default());
            return true;
        }

        let mut multipliers = [0.0f32; WHEEL_COUNT];
        for ((wheel, wheel_desc), (hit, multiplier)) in drive
            .controller
            .wheels_mut()
            .iter_mut()
            .zip(drive.desc.wheels.iter())
            .zip(hits.iter().zip(multipliers.iter_mut()))
        {
            *multiplier = friction.friction(hit.surface_material());
            wheel.friction_slip = wheel_desc.friction_slip * *multiplier;
        }

        let pre_filter = query.pre_filter;
        let query_data = query.query_data;
        let predicate = |_: rapier::ColliderHandle, collider: &rapier::Collider| {
            pre_filter(query_data, FilterData::from_bits(collider.user_data)) == QueryHitType::Block
        };
        let filter = rapier::QueryFilter::default()
            .exclude_rigid_body(chassis)
            .exclude_sensors()
            .predicate(&predicate);

        drive
            .controller
            .update_vehicle(dt, &mut self.bodies, &self.colliders, &self.query_pipeline, filter);

        for ((slot, wheel), multiplier) in out
            .iter_mut()
            .zip(drive.controller.wheels().iter())
            .zip(multipliers.iter())
        {
            let info = wheel.raycast_info();
            let contact = info.ground_object.filter(|_| info.is_in_contact);
            let filter_data = contact
                .and_then(|c| self.colliders.get(c))
                .map(|c| FilterData::from_bits(c.user_data))
                .unwrap_or_default();
            *slot = WheelQueryResult {
                in_air: contact.is_none(),
                tire_friction: if contact.is_some() { *multiplier } else { 0.0 },
                surface_material: filter_data.surface_material().map(SurfaceMaterialId),
                contact_shape: contact,
                contact_actor: contact.and_then(|c| self.colliders.get(c)).and_then(|c| c.parent()),
                suspension_length: info.suspension_length,
            };
        }
        true
    }

    // ==================== Simulation ====================

    /// Step the simulation with a fixed timestep and return the collision
    /// events it produced.
    pub(crate) fn step(&mut self, delta_time: f32) -> Vec<RawCollisionEvent> {
        self.accumulated_time += delta_time;

        let mut events = Vec::new();
        let mut steps = 0;
        while self.accumulated_time >= self.timestep && steps < self.max_substeps {
            self.step_internal(&mut events);
            self.accumulated_time -= self.timestep;
            steps += 1;
        }

        // Update query pipeline after stepping
        self.query_pipeline.update(&self.colliders);
        events
    }

    /// Sync the query pipeline with the current colliders
    pub fn sync_query_pipeline(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    fn step_internal(&mut self, events: &mut Vec<RawCollisionEvent>) {
        let (collision_send, collision_recv) = crossbeam_channel::unbounded();
        let event_handler = ChannelEventCollector {
            collision_events: collision_send,
        };

        self.pipeline.step(
            &self.gravity,
            &self.integration_params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &event_handler,
        );

        while let Ok(event) = collision_recv.try_recv() {
            let (collider1, collider2, started) = match event {
                rapier::CollisionEvent::Started(h1, h2, _) => (h1, h2, true),
                rapier::CollisionEvent::Stopped(h1, h2, _) => (h1, h2, false),
            };
            let is_sensor = [collider1, collider2]
                .iter()
                .any(|h| self.colliders.get(*h).map_or(false, |c| c.is_sensor()));
            events.push(RawCollisionEvent {
                collider1,
                collider2,
                started,
                is_sensor,
            });
        }
    }

    /// Cast a ray against every solid shape (Rapier units)
    pub(crate) fn cast_ray(
        &mut self,
        ray: &rapier::Ray,
        max_toi: f32,
        groups: crate::filter::CollisionGroups,
    ) -> Option<(rapier::ColliderHandle, rapier::RayIntersection)> {
        self.query_pipeline.update(&self.colliders);
        let filter = rapier::QueryFilter::default()
            .groups(groups.to_rapier())
            .exclude_sensors();
        self.query_pipeline
            .cast_ray_and_get_normal(&self.bodies, &self.colliders, ray, max_toi, true, filter)
    }

    // ==================== Diagnostics ====================

    /// Number of actors
    pub fn actor_count(&self) -> usize {
        self.bodies.len()
    }

    /// Number of shapes
    pub fn shape_count(&self) -> usize {
        self.colliders.len()
    }

    /// Number of character controllers
    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    /// Number of vehicle drives
    pub fn drive_count(&self) -> usize {
        self.drives.len()
    }

    /// Number of batched queries
    pub fn batch_query_count(&self) -> usize {
        self.batch_queries.len()
    }

    /// Releases recorded so far (empty unless tracking is enabled)
    pub fn release_history(&self) -> &[ReleaseRecord] {
        self.release_log.as_deref().unwrap_or(&[])
    }

    /// Clear the release journal
    pub fn clear_release_history(&mut self) {
        if let Some(log) = self.release_log.as_mut() {
            log.clear();
        }
    }
}

impl NativeController {
    pub(crate) fn apply_step_offset(&mut self, step_offset: f32) {
        self.kcc.autostep = (step_offset > 0.0).then(|| CharacterAutostep {
            max_height: CharacterLength::Absolute(step_offset),
            min_width: CharacterLength::Absolute(self.min_step_width),
            include_dynamic_bodies: true,
        });
        self.kcc.snap_to_ground = (step_offset > 0.0).then_some(CharacterLength::Absolute(step_offset));
    }

    pub(crate) fn step_offset(&self) -> f32 {
        match self.kcc.autostep {
            Some(CharacterAutostep {
                max_height: CharacterLength::Absolute(h),
                ..
            }) => h,
            _ => 0.0,
        }
    }

    pub(crate) fn apply_slope_limit(&mut self) {
        let limit = if self.slope_limit_enabled {
            self.slope_limit.clamp(0.0, FRAC_PI_2)
        } else {
            FRAC_PI_2
        };
        self.kcc.max_slope_climb_angle = limit;
        self.kcc.min_slope_slide_angle = match self.non_walkable_mode {
            NonWalkableMode::PreventClimbing => FRAC_PI_2,
            NonWalkableMode::PreventClimbingAndForceSliding => limit,
        };
    }
}

/// Channel-based event collector for Rapier
struct ChannelEventCollector {
    collision_events: crossbeam_channel::Sender<rapier::CollisionEvent>,
}

impl rapier::EventHandler for ChannelEventCollector {
    fn handle_collision_event(
        &self,
        _bodies: &rapier::RigidBodySet,
        _colliders: &rapier::ColliderSet,
        event: rapier::CollisionEvent,
        _contact_pair: Option<&rapier::ContactPair>,
    ) {
        let _ = self.collision_events.send(event);
    }

    fn handle_contact_force_event(
        &self,
        _dt: f32,
        _bodies: &rapier::RigidBodySet,
        _colliders: &rapier::ColliderSet,
        _contact_pair: &rapier::ContactPair,
        _total_force_magnitude: f32,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::PhysicsMaterial;

    fn tracked_scene() -> NativeScene {
        NativeScene::new(&BackendConfig::default().with_release_tracking(true))
    }

    #[test]
    fn test_shape_release_is_journaled() {
        let mut scene = tracked_scene();
        let shape = scene
            .create_shape(rapier::SharedShape::ball(0.5), &PhysicsMaterial::default(), FilterData::default())
            .unwrap();
        assert_eq!(scene.shape_count(), 1);

        NativeScene::release_shape(&mut scene, shape);
        NativeScene::release_shape(&mut scene, shape);
        assert_eq!(scene.shape_count(), 0);
        assert_eq!(scene.release_history(), &[ReleaseRecord::Shape(shape)]);
    }

    #[test]
    fn test_actor_release_detaches_shapes() {
        let mut scene = tracked_scene();
        let actor = scene.create_actor(rapier::RigidBodyBuilder::dynamic()).unwrap();
        let shape = scene
            .create_shape(rapier::SharedShape::ball(0.5), &PhysicsMaterial::default(), FilterData::default())
            .unwrap();
        assert!(scene.attach_shape(shape, actor, ShapeFlags::default(), rapier::Isometry::identity()));
        assert_eq!(scene.shape_parent(shape), Some(actor));

        NativeScene::release_actor(&mut scene, actor);
        assert_eq!(scene.actor_count(), 0);
        assert_eq!(scene.shape_count(), 1);
        assert_eq!(scene.shape_parent(shape), None);
    }

    #[test]
    fn test_batch_query_needs_capacity() {
        let mut scene = tracked_scene();
        let pre_filter: PreFilterFn = crate::filter::undrivable_pre_filter;
        assert!(scene.create_batch_query(0, pre_filter, FilterData::default()).is_none());

        let key = scene.create_batch_query(4, pre_filter, FilterData::default()).unwrap();
        assert_eq!(scene.batch_query_count(), 1);
        NativeScene::release_batch_query(&mut scene, key);
        assert_eq!(scene.release_history(), &[ReleaseRecord::BatchQuery(key)]);
    }
}
