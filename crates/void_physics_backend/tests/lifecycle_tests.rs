//! Ownership and teardown tests for void_physics_backend
//!
//! Every foreign object must be released exactly once, composites must come
//! apart bottom-up, and engine callbacks must be free to drop engine objects.

use parking_lot::Mutex;
use std::sync::Arc;
use void_physics_backend::resource::ForeignHandle;
use void_physics_backend::scene::ReleaseRecord;
use void_physics_backend::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tracked_env() -> RapierEnvironment {
    init_logging();
    RapierEnvironment::new(BackendConfig::default().with_release_tracking(true)).unwrap()
}

const IDENTITY: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn record_release(log: &mut Vec<u32>, key: u32) {
    log.push(key);
}

#[test]
fn test_null_allocation_wraps_to_nothing() {
    let owner = Arc::new(Mutex::new(Vec::new()));
    assert!(ForeignHandle::wrap(None, &owner, record_release).is_none());
    assert!(owner.lock().is_empty());

    let handle = ForeignHandle::wrap(Some(7), &owner, record_release).unwrap();
    assert_eq!(handle.key(), 7);
    drop(handle);
    assert_eq!(*owner.lock(), vec![7]);
}

#[test]
fn test_transferred_handle_is_not_released() {
    let owner = Arc::new(Mutex::new(Vec::new()));
    let handle = ForeignHandle::wrap(Some(3), &owner, record_release).unwrap();
    let view = handle.transfer();
    assert_eq!(view.key(), 3);
    drop(view);
    assert!(owner.lock().is_empty());
}

#[test]
fn test_release_after_owner_is_gone() {
    let owner = Arc::new(Mutex::new(Vec::new()));
    let handle = ForeignHandle::wrap(Some(1), &owner, record_release).unwrap();
    drop(owner);
    assert!(!handle.is_owner_alive());
    assert!(handle.with(|_, _| ()).is_none());
    handle.release();
}

#[test]
fn test_shape_released_once() {
    let env = tracked_env();
    let shape = env
        .create_sphere_shape(10.0, &PhysicsMaterial::default())
        .unwrap();
    let second = shape.clone();

    drop(shape);
    assert!(env.release_history().is_empty());
    drop(second);

    let history = env.release_history();
    assert_eq!(history.len(), 1);
    assert!(matches!(history[0], ReleaseRecord::Shape(_)));
    assert_eq!(env.shape_count(), 0);
}

#[test]
fn test_collision_object_drops_shapes_before_actor() {
    let env = tracked_env();
    let shape = env
        .create_box_shape([10.0, 10.0, 10.0], &PhysicsMaterial::default())
        .unwrap();
    let body = env
        .create_rigid_body(&RigidBodyDesc::dynamic(), &[shape])
        .unwrap();
    assert_eq!(env.actor_count(), 1);
    assert_eq!(env.shape_count(), 1);

    drop(body);

    let history = env.release_history();
    assert_eq!(history.len(), 2);
    assert!(matches!(history[0], ReleaseRecord::Shape(_)));
    assert!(matches!(history[1], ReleaseRecord::Actor(_)));
    assert_eq!(env.actor_count(), 0);
    assert_eq!(env.shape_count(), 0);
}

#[test]
fn test_controller_teardown_is_bottom_up() {
    let env = tracked_env();
    let controller = env
        .create_capsule_controller(30.0, 40.0, 5.0, 45.0, [0.0; 3], IDENTITY)
        .unwrap();
    let shape = controller.shape().unwrap();
    assert!(!shape.owns_foreign());
    assert!(!controller.collision_object().owns_foreign());

    assert!(env.remove_controller(&controller));
    drop(shape);
    assert!(env.release_history().is_empty());

    drop(controller);

    let history = env.release_history();
    assert_eq!(history.len(), 3, "{:?}", history);
    assert!(matches!(history[0], ReleaseRecord::Shape(_)));
    assert!(matches!(history[1], ReleaseRecord::Actor(_)));
    assert!(matches!(history[2], ReleaseRecord::Controller(_)));
    assert_eq!(env.controller_count(), 0);
    assert_eq!(env.actor_count(), 0);
    assert_eq!(env.shape_count(), 0);
}

#[test]
fn test_vehicle_teardown_is_bottom_up() {
    let env = tracked_env();
    let chassis_shape = env
        .create_box_shape([60.0, 10.0, 30.0], &PhysicsMaterial::default())
        .unwrap();
    let chassis = env
        .create_rigid_body(&RigidBodyDesc::dynamic(), &[chassis_shape])
        .unwrap();
    let vehicle = env.create_vehicle(&chassis, &VehicleDesc::default()).unwrap();
    assert_eq!(env.drive_count(), 1);
    assert_eq!(env.batch_query_count(), 1);

    drop(chassis);
    assert!(env.remove_vehicle(&vehicle));
    let wheel = vehicle.wheel(2).unwrap();
    drop(vehicle);

    let history = env.release_history();
    assert_eq!(history.len(), 4, "{:?}", history);
    assert!(matches!(history[0], ReleaseRecord::BatchQuery(_)));
    assert!(matches!(history[1], ReleaseRecord::Drive(_)));
    assert!(matches!(history[2], ReleaseRecord::Shape(_)));
    assert!(matches!(history[3], ReleaseRecord::Actor(_)));

    // Wheels outliving their vehicle read as idle
    assert!(wheel.vehicle().is_none());
    assert!(!wheel.is_in_air());
    assert_eq!(wheel.tire_friction(), 0.0);
}

#[test]
fn test_environment_teardown_releases_registered_objects() {
    let env = tracked_env();
    let controller = env
        .create_box_controller([20.0, 40.0, 30.0], 5.0, 30.0, [0.0; 3], IDENTITY)
        .unwrap();
    let weak = Arc::downgrade(&controller);
    drop(controller);

    // Still registered, so nothing is released yet
    assert!(env.release_history().is_empty());
    assert_eq!(env.controllers().len(), 1);
    assert_eq!(env.controllers()[0].shape_type(), ShapeType::Box);

    drop(env);
    assert!(weak.upgrade().is_none());
}

struct DropOnHit {
    victim: Mutex<Option<Arc<CollisionObject>>>,
    hits: Mutex<usize>,
}

impl ControllerHitReport for DropOnHit {
    fn on_shape_hit(&self, _controller: &CharacterController, hit: &ControllerHit) {
        *self.hits.lock() += 1;
        assert!(hit.length > 0.0);
        // The last strong reference to the hit object goes away here
        drop(self.victim.lock().take());
    }
}

#[test]
fn test_hit_report_may_drop_the_hit_object() {
    let env = tracked_env();
    let wall_shape = env
        .create_box_shape([20.0, 100.0, 200.0], &PhysicsMaterial::default())
        .unwrap();
    let wall = env
        .create_rigid_body(&RigidBodyDesc::fixed().with_position(100.0, 0.0, 0.0), &[wall_shape])
        .unwrap();

    let report = Arc::new(DropOnHit {
        victim: Mutex::new(Some(wall)),
        hits: Mutex::new(0),
    });
    env.set_controller_hit_report(Some(report.clone()));

    let controller = env
        .create_capsule_controller(30.0, 40.0, 5.0, 45.0, [0.0; 3], IDENTITY)
        .unwrap();
    let actors_before = env.actor_count();

    let moved = controller.move_by([200.0, 0.0, 0.0], 1.0 / 60.0).unwrap();

    assert!(*report.hits.lock() >= 1);
    assert!(report.victim.lock().is_none());
    assert_eq!(env.actor_count(), actors_before - 1);
    assert!(!moved.hits.is_empty());
    assert!(moved.hits.iter().all(|h| h.object.upgrade().is_none()));
    assert!(moved.translation[0] < 200.0);
}

#[test]
fn test_released_wrapper_reports_error() {
    let env = tracked_env();
    let body = env.create_rigid_body(&RigidBodyDesc::dynamic(), &[]).unwrap();
    let controller = env
        .create_capsule_controller(30.0, 40.0, 5.0, 45.0, [0.0; 3], IDENTITY)
        .unwrap();
    drop(env);

    assert!(matches!(body.position(), Err(BridgeError::ObjectReleased(_))));
    assert!(matches!(
        controller.move_by([1.0, 0.0, 0.0], 1.0 / 60.0),
        Err(BridgeError::ObjectReleased(_))
    ));
}

#[test]
fn test_surviving_shape_leaves_the_world_with_its_object() {
    let env = tracked_env();
    let slab = env
        .create_box_shape([400.0, 4.0, 400.0], &PhysicsMaterial::default())
        .unwrap();
    let floor = env.create_rigid_body(&RigidBodyDesc::fixed(), &[slab.clone()]).unwrap();
    let down = [0.0, -1.0, 0.0];
    assert!(env.raycast([0.0, 100.0, 0.0], down, &RaycastOptions::default()).is_some());

    drop(floor);
    assert!(slab.attached_object().is_none());
    assert_eq!(env.shape_count(), 1);
    assert!(env.raycast([0.0, 100.0, 0.0], down, &RaycastOptions::default()).is_none());

    // The shape is free to join another object
    let again = env.create_rigid_body(&RigidBodyDesc::fixed(), &[slab.clone()]).unwrap();
    assert!(Arc::ptr_eq(&slab.attached_object().unwrap(), &again));
    assert!(env.raycast([0.0, 100.0, 0.0], down, &RaycastOptions::default()).is_some());
}

#[test]
fn test_failed_rigid_body_leaves_nothing_behind() {
    let env = tracked_env();
    let slab = env
        .create_box_shape([400.0, 4.0, 400.0], &PhysicsMaterial::default())
        .unwrap();
    let hull = env.create_convex_hull_shape(&PhysicsMaterial::default()).unwrap();

    assert!(env
        .create_rigid_body(&RigidBodyDesc::fixed(), &[slab.clone(), hull])
        .is_none());
    assert!(slab.attached_object().is_none());
    assert_eq!(env.actor_count(), 0);

    let ball_shape = env.create_sphere_shape(10.0, &PhysicsMaterial::default()).unwrap();
    let ball = env
        .create_rigid_body(&RigidBodyDesc::dynamic().with_position(0.0, 40.0, 0.0), &[ball_shape])
        .unwrap();
    for _ in 0..120 {
        env.simulate(1.0 / 60.0);
    }
    assert!(ball.position().unwrap()[1] < 0.0);
}
