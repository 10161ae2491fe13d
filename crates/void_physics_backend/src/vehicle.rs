//! Raycast vehicles
//!
//! A [`Vehicle`] owns a native drive and references the collision object
//! acting as its chassis. [`Vehicle::simulate`] runs one tick in a fixed
//! phase order:
//!
//! 1. input smoothing (per-vehicle [`VehicleInputContext`])
//! 2. one batched suspension raycast per wheel
//! 3. the drive's suspension and tire update
//! 4. read-back of airborne state, tire friction and ground contact
//!
//! The chassis must be a dynamic collision object. Forward is +X in chassis
//! space, up is +Y.

use crate::body::CollisionObject;
use crate::config::VehicleDefaults;
use crate::error::{BridgeError, Result};
use crate::filter::{undrivable_pre_filter, FilterData};
use crate::input::{InputMode, RawDriveInput, VehicleInputContext};
use crate::material::{SurfaceMaterialId, TireFrictionTable};
use crate::query::{BatchQueryState, WheelQueryResult};
use crate::resource::ForeignHandle;
use crate::scene::{DriveKey, NativeScene};
use crate::units;
use parking_lot::Mutex;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Number of wheels of every vehicle
pub const WHEEL_COUNT: usize = 4;

/// Wheel layout and tuning (engine units unless noted)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelDesc {
    /// Suspension attachment point in chassis space
    pub connection_point: [f32; 3],
    /// Suspension direction in chassis space
    pub direction: [f32; 3],
    /// Wheel axle in chassis space
    pub axle: [f32; 3],
    pub suspension_rest_length: f32,
    pub max_suspension_travel: f32,
    pub radius: f32,
    /// Base tire friction, scaled per surface by the tire friction table
    pub friction_slip: f32,
    pub steered: bool,
    pub driven: bool,
    pub handbrake: bool,
}

impl WheelDesc {
    /// A wheel hanging straight down from `connection_point`
    pub fn at(connection_point: [f32; 3]) -> Self {
        Self {
            connection_point,
            direction: [0.0, -1.0, 0.0],
            axle: [0.0, 0.0, -1.0],
            suspension_rest_length: 12.0,
            max_suspension_travel: 8.0,
            radius: 14.0,
            friction_slip: 10.5,
            steered: false,
            driven: false,
            handbrake: false,
        }
    }

    /// Mark as a steered wheel
    pub fn steered(mut self) -> Self {
        self.steered = true;
        self
    }

    /// Mark as a driven wheel with a handbrake
    pub fn driven(mut self) -> Self {
        self.driven = true;
        self.handbrake = true;
        self
    }

    fn to_foreign(self) -> ForeignWheel {
        ForeignWheel {
            connection_point: units::to_foreign_point(self.connection_point),
            direction: units::to_foreign_normal(self.direction),
            axle: units::to_foreign_normal(self.axle),
            rest_length: units::to_foreign_length(self.suspension_rest_length),
            max_suspension_travel: units::to_foreign_length(self.max_suspension_travel),
            radius: units::to_foreign_length(self.radius),
            friction_slip: self.friction_slip,
            steered: self.steered,
            driven: self.driven,
            handbrake: self.handbrake,
        }
    }
}

/// Vehicle description: four wheels plus drive tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleDesc {
    /// Front left, front right, rear left, rear right
    pub wheels: [WheelDesc; WHEEL_COUNT],
    /// Engine force at full throttle (N), shared by driven wheels
    pub max_engine_force: f32,
    /// Brake force at full brake (N)
    pub max_brake_force: f32,
    /// Handbrake force at full handbrake (N)
    pub max_handbrake_force: f32,
    /// Steering angle at full lock (radians)
    pub max_steer_angle: f32,
}

impl Default for VehicleDesc {
    fn default() -> Self {
        Self::four_wheel(32.0, 50.0, -10.0)
    }
}

impl VehicleDesc {
    /// Front-steered, rear-driven layout with wheels at
    /// (±half_wheelbase, height, ±half_track) in chassis space
    pub fn four_wheel(half_track: f32, half_wheelbase: f32, height: f32) -> Self {
        Self {
            wheels: [
                WheelDesc::at([half_wheelbase, height, -half_track]).steered(),
                WheelDesc::at([half_wheelbase, height, half_track]).steered(),
                WheelDesc::at([-half_wheelbase, height, -half_track]).driven(),
                WheelDesc::at([-half_wheelbase, height, half_track]).driven(),
            ],
            max_engine_force: 200.0,
            max_brake_force: 15.0,
            max_handbrake_force: 30.0,
            max_steer_angle: 0.5,
        }
    }

    pub(crate) fn to_foreign(&self) -> DriveDesc {
        DriveDesc {
            wheels: self.wheels.map(WheelDesc::to_foreign),
            max_engine_force: self.max_engine_force,
            max_brake_force: self.max_brake_force,
            max_handbrake_force: self.max_handbrake_force,
            max_steer_angle: self.max_steer_angle,
        }
    }
}

/// Native wheel layout (Rapier units)
#[derive(Debug, Clone, Copy)]
pub(crate) struct ForeignWheel {
    pub(crate) connection_point: rapier::Point<f32>,
    pub(crate) direction: rapier::Vector<f32>,
    pub(crate) axle: rapier::Vector<f32>,
    pub(crate) rest_length: f32,
    pub(crate) max_suspension_travel: f32,
    pub(crate) radius: f32,
    pub(crate) friction_slip: f32,
    pub(crate) steered: bool,
    pub(crate) driven: bool,
    pub(crate) handbrake: bool,
}

/// Native drive descriptor (Rapier units)
#[derive(Debug, Clone)]
pub(crate) struct DriveDesc {
    pub(crate) wheels: [ForeignWheel; WHEEL_COUNT],
    pub(crate) max_engine_force: f32,
    pub(crate) max_brake_force: f32,
    pub(crate) max_handbrake_force: f32,
    pub(crate) max_steer_angle: f32,
}

impl DriveDesc {
    pub(crate) fn is_valid(&self) -> bool {
        let non_negative = |x: f32| x.is_finite() && x >= 0.0;
        self.wheels.iter().all(|w| {
            w.radius.is_finite()
                && w.radius > 0.0
                && non_negative(w.rest_length)
                && non_negative(w.max_suspension_travel)
                && non_negative(w.friction_slip)
                && w.connection_point.coords.iter().all(|c| c.is_finite())
        }) && non_negative(self.max_engine_force)
            && non_negative(self.max_brake_force)
            && non_negative(self.max_handbrake_force)
            && non_negative(self.max_steer_angle)
    }
}

struct VehicleState {
    input: VehicleInputContext,
    friction: TireFrictionTable,
    batch: Option<BatchQueryState>,
    wheels: [Option<Arc<Wheel>>; WHEEL_COUNT],
    in_air: bool,
    wheels_in_air: usize,
    average_tire_friction: f32,
    contact_object: Weak<CollisionObject>,
    /// Rapier units
    forward_speed: f32,
    sideways_speed: f32,
}

/// Engine vehicle
pub struct Vehicle {
    state: Mutex<VehicleState>,
    drive: ForeignHandle<DriveKey, NativeScene>,
    chassis: Arc<CollisionObject>,
    scene: Weak<Mutex<NativeScene>>,
    this: Weak<Vehicle>,
}

impl Vehicle {
    /// Wheel count of every vehicle
    pub const WHEEL_COUNT: usize = WHEEL_COUNT;

    /// Build the engine vehicle over a native drive and its chassis
    pub(crate) fn create(
        scene: &Arc<Mutex<NativeScene>>,
        drive: ForeignHandle<DriveKey, NativeScene>,
        chassis: Arc<CollisionObject>,
        defaults: &VehicleDefaults,
    ) -> Arc<Self> {
        let key = drive.key();
        let vehicle = Arc::new_cyclic(|this| Self {
            state: Mutex::new(VehicleState {
                input: VehicleInputContext::new(
                    defaults.input_mode,
                    defaults.key_smoothing,
                    defaults.pad_smoothing,
                    defaults.steer_table.clone(),
                ),
                friction: TireFrictionTable::default(),
                batch: None,
                wheels: Default::default(),
                in_air: false,
                wheels_in_air: 0,
                average_tire_friction: 0.0,
                contact_object: Weak::new(),
                forward_speed: 0.0,
                sideways_speed: 0.0,
            }),
            drive,
            chassis,
            scene: Arc::downgrade(scene),
            this: this.clone(),
        });
        scene.lock().backrefs.vehicles.register(key, Arc::downgrade(&vehicle));
        vehicle
    }

    /// Size the per-wheel buffers and create the batched suspension query
    pub fn initialize(&self) -> Result<()> {
        let scene = self.scene.upgrade().ok_or(BridgeError::ObjectReleased("scene"))?;
        let key = scene
            .lock()
            .create_batch_query(WHEEL_COUNT, undrivable_pre_filter, FilterData::default());
        let query = ForeignHandle::wrap(key, &scene, NativeScene::release_batch_query)
            .ok_or_else(|| BridgeError::InvalidConfig("batch query allocation failed".into()))?;
        self.state.lock().batch = Some(BatchQueryState::new(query, WHEEL_COUNT));
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) has succeeded
    pub fn is_initialized(&self) -> bool {
        self.state.lock().batch.is_some()
    }

    /// Run one tick.
    ///
    /// # Panics
    ///
    /// Panics if the vehicle has not been initialized.
    pub fn simulate(&self, dt: f32) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let batch = state
            .batch
            .as_mut()
            .unwrap_or_else(|| panic!("Vehicle::simulate called before Vehicle::initialize"));
        assert_eq!(batch.wheel_count(), WHEEL_COUNT, "suspension query buffers were resized");

        // Input
        let inputs = state.input.smooth(dt, state.forward_speed.abs(), state.in_air);

        let prior_in_air: Vec<bool> = batch.wheel_results.iter().map(|r| r.in_air).collect();
        let batch_key = batch.query.key();
        let friction = &state.friction;
        let outcome = self
            .drive
            .with(|scene, key| {
                scene.set_drive_inputs(key, &inputs);
                let chassis = scene.drive_chassis(key)?;
                let sleeping = scene.actor(chassis).map_or(false, |body| body.is_sleeping());

                // Query
                if !scene.suspension_raycasts(batch_key, key, &mut batch.raycast_results) {
                    return None;
                }
                // Dynamics
                if !scene.update_drive(
                    batch_key,
                    key,
                    dt,
                    friction,
                    &batch.raycast_results,
                    &mut batch.wheel_results,
                ) {
                    return None;
                }

                let speeds = scene.drive_speeds(key).unwrap_or_default();
                let contact = batch
                    .wheel_results
                    .iter()
                    .find_map(|r| r.contact_actor)
                    .and_then(|actor| scene.backrefs.objects.resolve(actor))
                    .unwrap_or_default();
                Some((sleeping, speeds, contact))
            })
            .flatten();

        let Some((sleeping, (forward_speed, sideways_speed), contact)) = outcome else {
            log::warn!("vehicle {:?} ticked after its drive was released", self.drive.key());
            return;
        };

        // Read-back
        if sleeping {
            for (result, was_in_air) in batch.wheel_results.iter_mut().zip(prior_in_air) {
                result.in_air = was_in_air;
            }
        }
        let wheels_in_air = batch.wheel_results.iter().filter(|r| r.in_air).count();
        state.wheels_in_air = wheels_in_air;
        state.in_air = !sleeping && wheels_in_air == WHEEL_COUNT;
        state.average_tire_friction =
            batch.wheel_results.iter().map(|r| r.tire_friction).sum::<f32>() / WHEEL_COUNT as f32;
        state.contact_object = contact;
        state.forward_speed = forward_speed;
        state.sideways_speed = sideways_speed;

        log::trace!(
            "vehicle {:?}: {} wheels in air, tire friction {:.3}",
            self.drive.key(),
            wheels_in_air,
            state.average_tire_friction
        );
    }

    // ==================== Read-back ====================

    /// Whether the vehicle is airborne. A sleeping chassis never is.
    pub fn is_in_air(&self) -> bool {
        self.state.lock().in_air
    }

    /// Number of wheels without ground contact after the last tick
    pub fn wheels_in_air(&self) -> usize {
        self.state.lock().wheels_in_air
    }

    /// Tire friction averaged over all wheels after the last tick
    pub fn average_tire_friction(&self) -> f32 {
        self.state.lock().average_tire_friction
    }

    /// Collision object under the first wheel with ground contact
    pub fn contact_object(&self) -> Option<Arc<CollisionObject>> {
        self.state.lock().contact_object.upgrade()
    }

    /// Forward speed (engine units/s)
    pub fn forward_speed(&self) -> f32 {
        units::from_foreign_length(self.state.lock().forward_speed)
    }

    /// Sideways speed (engine units/s)
    pub fn sideways_speed(&self) -> f32 {
        units::from_foreign_length(self.state.lock().sideways_speed)
    }

    /// Chassis collision object
    pub fn chassis(&self) -> &Arc<CollisionObject> {
        &self.chassis
    }

    /// Number of wheels
    pub fn wheel_count(&self) -> usize {
        WHEEL_COUNT
    }

    /// Wheel wrapper for `index`, created on first access
    pub fn wheel(&self, index: usize) -> Option<Arc<Wheel>> {
        if index >= WHEEL_COUNT {
            return None;
        }
        let mut state = self.state.lock();
        let wheel = state.wheels[index].get_or_insert_with(|| {
            Arc::new(Wheel {
                vehicle: self.this.clone(),
                index,
            })
        });
        Some(wheel.clone())
    }

    fn wheel_result(&self, index: usize) -> Option<WheelQueryResult> {
        let state = self.state.lock();
        state.batch.as_ref()?.wheel_results.get(index).copied()
    }

    // ==================== Input ====================

    /// Replace the raw driver input used by the next tick
    pub fn set_input(&self, raw: RawDriveInput) {
        self.state.lock().input.set_raw(raw);
    }

    /// Current input mode
    pub fn input_mode(&self) -> InputMode {
        self.state.lock().input.mode
    }

    /// Switch between digital and analog smoothing
    pub fn set_input_mode(&self, mode: InputMode) {
        self.state.lock().input.mode = mode;
    }

    /// Replace the tire friction table
    pub fn set_tire_friction_table(&self, table: TireFrictionTable) {
        self.state.lock().friction = table;
    }
}

impl Drop for Vehicle {
    fn drop(&mut self) {
        if let Some(scene) = self.scene.upgrade() {
            scene.lock().backrefs.vehicles.invalidate(self.drive.key());
        }
    }
}

impl std::fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vehicle")
            .field("drive", &self.drive.key())
            .field("chassis", &self.chassis)
            .finish()
    }
}

/// One wheel of a vehicle
pub struct Wheel {
    vehicle: Weak<Vehicle>,
    index: usize,
}

impl Wheel {
    /// Wheel index, 0..WHEEL_COUNT
    pub fn index(&self) -> usize {
        self.index
    }

    /// Vehicle the wheel belongs to
    pub fn vehicle(&self) -> Option<Arc<Vehicle>> {
        self.vehicle.upgrade()
    }

    fn result(&self) -> Option<WheelQueryResult> {
        self.vehicle.upgrade()?.wheel_result(self.index)
    }

    /// Whether the wheel had no ground contact after the last tick
    pub fn is_in_air(&self) -> bool {
        self.result().map_or(false, |r| r.in_air)
    }

    /// Tire friction after the last tick
    pub fn tire_friction(&self) -> f32 {
        self.result().map_or(0.0, |r| r.tire_friction)
    }

    /// Suspension length after the last tick (engine units)
    pub fn suspension_length(&self) -> f32 {
        self.result()
            .map_or(0.0, |r| units::from_foreign_length(r.suspension_length))
    }

    /// Surface material under the wheel
    pub fn surface_material(&self) -> Option<SurfaceMaterialId> {
        self.result()?.surface_material
    }

    /// Collision object under the wheel
    pub fn contact_object(&self) -> Option<Arc<CollisionObject>> {
        let vehicle = self.vehicle.upgrade()?;
        let actor = vehicle.wheel_result(self.index)?.contact_actor?;
        let scene = vehicle.scene.upgrade()?;
        let weak = scene.lock().backrefs.objects.resolve(actor)?;
        weak.upgrade()
    }
}

impl std::fmt::Debug for Wheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wheel").field("index", &self.index).finish()
    }
}
