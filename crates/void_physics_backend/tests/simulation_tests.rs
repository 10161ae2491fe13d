//! Simulation tests for void_physics_backend
//!
//! Shapes, controllers and vehicles driven through the environment, with
//! results checked in engine units.

use approx::assert_relative_eq;
use std::sync::Arc;
use void_physics_backend::*;

const IDENTITY: [f32; 4] = [0.0, 0.0, 0.0, 1.0];
const DT: f32 = 1.0 / 60.0;

fn env() -> RapierEnvironment {
    let _ = env_logger::builder().is_test(true).try_init();
    RapierEnvironment::default()
}

/// A large static slab whose top face is at y = 4
fn ground(env: &RapierEnvironment, material: &PhysicsMaterial) -> Arc<CollisionObject> {
    let slab = env.create_box_shape([2000.0, 4.0, 2000.0], material).unwrap();
    env.create_rigid_body(&RigidBodyDesc::fixed(), &[slab]).unwrap()
}

/// Chassis box on the default four-wheel layout. Wheels hang 10 below the
/// chassis center and their rays reach 26 further.
fn car(env: &RapierEnvironment, height: f32) -> (Arc<CollisionObject>, Arc<Vehicle>) {
    heavy_car(env, height, PhysicsMaterial::default())
}

fn heavy_car(env: &RapierEnvironment, height: f32, material: PhysicsMaterial) -> (Arc<CollisionObject>, Arc<Vehicle>) {
    let body = env.create_box_shape([60.0, 10.0, 30.0], &material).unwrap();
    let chassis = env
        .create_rigid_body(&RigidBodyDesc::dynamic().with_position(0.0, height, 0.0), &[body])
        .unwrap();
    let vehicle = env.create_vehicle(&chassis, &VehicleDesc::default()).unwrap();
    (chassis, vehicle)
}

// ==================== Shapes ====================

#[test]
fn test_primitive_dimensions_round_trip() {
    let env = env();
    let material = PhysicsMaterial::default();

    let cube = env.create_box_shape([10.0, 20.0, 30.0], &material).unwrap();
    match cube.geometry() {
        Some(GeometryDesc::Box { half_extents }) => {
            assert_relative_eq!(half_extents[0], 10.0, max_relative = 1.0e-5);
            assert_relative_eq!(half_extents[1], 20.0, max_relative = 1.0e-5);
            assert_relative_eq!(half_extents[2], 30.0, max_relative = 1.0e-5);
        }
        other => panic!("unexpected geometry {:?}", other),
    }

    let ball = env.create_sphere_shape(12.5, &material).unwrap();
    match ball.geometry() {
        Some(GeometryDesc::Sphere { radius }) => assert_relative_eq!(radius, 12.5, max_relative = 1.0e-5),
        other => panic!("unexpected geometry {:?}", other),
    }

    let pill = env.create_capsule_shape(30.0, 40.0, &material).unwrap();
    match pill.geometry() {
        Some(GeometryDesc::Capsule { radius, half_height }) => {
            assert_relative_eq!(radius, 30.0, max_relative = 1.0e-5);
            assert_relative_eq!(half_height, 40.0, max_relative = 1.0e-5);
        }
        other => panic!("unexpected geometry {:?}", other),
    }

    assert_eq!(cube.kind(), ShapeKind::Box);
    assert_eq!(ball.kind(), ShapeKind::Sphere);
    assert_eq!(pill.kind(), ShapeKind::Capsule);
    assert_eq!(pill.flags(), ShapeFlags::DEFAULT);
    assert_eq!(env.shape_count(), 3);
}

#[test]
fn test_unsupported_shapes_allocate_nothing() {
    let env = env();
    let material = PhysicsMaterial::default();

    assert!(env.create_cylinder_shape(10.0, 20.0, &material).is_none());
    let terrain = shape::HeightfieldDesc {
        rows: 2,
        columns: 2,
        heights: vec![0.0; 4],
        scale: [100.0, 10.0, 100.0],
    };
    assert!(env.create_heightfield_terrain_shape(terrain, &material).is_none());
    assert_eq!(env.shape_count(), 0);
}

#[test]
fn test_incremental_shapes() {
    let env = env();
    let material = PhysicsMaterial::default().with_surface_material(SurfaceMaterialId(2));

    let mesh = env.create_triangle_shape(&material).unwrap();
    mesh.add_triangle([[0.0, 0.0, 0.0], [40.0, 0.0, 0.0], [0.0, 0.0, 40.0]])
        .unwrap();
    mesh.add_triangle([[40.0, 0.0, 0.0], [40.0, 0.0, 40.0], [0.0, 0.0, 40.0]])
        .unwrap();
    assert!(env
        .create_rigid_body(&RigidBodyDesc::fixed(), &[mesh.clone()])
        .is_none());
    mesh.finalize().unwrap();
    assert_eq!(mesh.geometry(), Some(GeometryDesc::TriangleMesh { triangle_count: 2 }));
    assert_eq!(mesh.surface_material(), Some(SurfaceMaterialId(2)));
    assert_eq!(mesh.filter_data().surface_material(), Some(2));

    let a = env.create_sphere_shape(8.0, &material).unwrap();
    let b = env.create_box_shape([4.0, 4.0, 4.0], &material).unwrap();
    b.set_local_pose([0.0, 20.0, 0.0], IDENTITY).unwrap();
    let compound = env.create_compound_shape(&[a.clone(), b.clone()], &material).unwrap();
    compound.finalize().unwrap();
    assert_eq!(compound.geometry(), Some(GeometryDesc::Compound { child_count: 2 }));

    // A compound cannot nest a mesh
    assert!(env.create_compound_shape(&[mesh], &material).unwrap().finalize().is_err());
}

#[test]
fn test_raycast_respects_local_pose() {
    let env = env();
    let plate = env
        .create_box_shape([40.0, 2.0, 40.0], &PhysicsMaterial::default())
        .unwrap();
    plate.set_local_pose([0.0, 50.0, 0.0], IDENTITY).unwrap();
    let body = env
        .create_rigid_body(&RigidBodyDesc::fixed().with_position(0.0, 10.0, 0.0), &[plate.clone()])
        .unwrap();

    let hit = env
        .raycast([0.0, 200.0, 0.0], [0.0, -1.0, 0.0], &RaycastOptions::default())
        .unwrap();
    assert_relative_eq!(hit.point[1], 62.0, epsilon = 1.0e-2);
    assert!(Arc::ptr_eq(&hit.shape.upgrade().unwrap(), &plate));
    assert!(Arc::ptr_eq(&hit.object.upgrade().unwrap(), &body));
}

// ==================== Controllers ====================

#[test]
fn test_capsule_controller_dimensions() {
    let env = env();
    let controller = env
        .create_capsule_controller(30.0, 40.0, 5.0, 45.0, [0.0; 3], IDENTITY)
        .unwrap();

    assert_eq!(controller.shape_type(), ShapeType::Capsule);
    assert_eq!(controller.half_extents(), [30.0, 40.0, 30.0]);

    let shapes = controller.collision_object().shapes();
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].kind(), ShapeKind::Capsule);
    match shapes[0].geometry() {
        Some(GeometryDesc::Capsule { radius, half_height }) => {
            assert_relative_eq!(radius, 30.0, max_relative = 1.0e-4);
            assert_relative_eq!(half_height, 40.0, max_relative = 1.0e-4);
        }
        other => panic!("unexpected geometry {:?}", other),
    }

    assert_relative_eq!(controller.slope_limit().unwrap(), 45.0, epsilon = 1.0e-3);
    assert_relative_eq!(controller.step_height().unwrap(), 5.0, epsilon = 1.0e-3);
    assert_relative_eq!(controller.position().unwrap()[1], 40.0, epsilon = 1.0e-3);
    assert!(Arc::ptr_eq(
        &controller.collision_object().controller().unwrap(),
        &controller
    ));
    assert_eq!(env.controllers().len(), 1);
}

#[test]
fn test_box_controller_is_tagged_box() {
    let env = env();
    let controller = env
        .create_box_controller([20.0, 40.0, 30.0], 5.0, 30.0, [0.0; 3], IDENTITY)
        .unwrap();

    assert_eq!(controller.shape_type(), ShapeType::Box);
    let shape = controller.shape().unwrap();
    assert_eq!(shape.kind(), ShapeKind::Box);
    match shape.geometry() {
        Some(GeometryDesc::Box { half_extents }) => {
            assert_relative_eq!(half_extents[1], 40.0, max_relative = 1.0e-4);
        }
        other => panic!("unexpected geometry {:?}", other),
    }

    // Through the engine abstraction
    let handle: Arc<dyn EngineController> = controller.clone();
    assert_eq!(handle.shape_type(), ShapeType::Box);
    let resolved = CharacterController::resolve(handle.as_ref()).unwrap();
    assert!(std::ptr::eq(resolved, controller.as_ref()));
}

#[test]
fn test_failed_controller_is_not_registered() {
    let env = env();
    assert!(env
        .create_capsule_controller(-1.0, 40.0, 5.0, 45.0, [0.0; 3], IDENTITY)
        .is_none());
    assert!(env.controllers().is_empty());
    assert_eq!(env.controller_count(), 0);
    assert_eq!(env.actor_count(), 0);
}

#[test]
fn test_controller_walks_and_lands() {
    let env = env();
    let floor = ground(&env, &PhysicsMaterial::default());
    let controller = env
        .create_capsule_controller(30.0, 40.0, 5.0, 45.0, [0.0, 50.0, 0.0], IDENTITY)
        .unwrap();

    // Fall onto the floor
    let mut grounded = false;
    for _ in 0..60 {
        let moved = controller.move_by([0.0, -10.0, 0.0], DT).unwrap();
        grounded = moved.grounded;
        if grounded {
            break;
        }
    }
    assert!(grounded);
    assert!(controller.is_grounded().unwrap());
    assert_relative_eq!(controller.foot_position().unwrap()[1], 4.0, epsilon = 1.0);

    let moved = controller.move_by([20.0, -1.0, 0.0], DT).unwrap();
    assert!(moved.translation[0] > 15.0, "moved {:?}", moved.translation);
    assert!(moved
        .hits
        .iter()
        .any(|hit| hit.object.upgrade().map_or(false, |o| Arc::ptr_eq(&o, &floor))));
}

// ==================== Vehicles ====================

#[test]
fn test_vehicle_on_ground_resolves_contacts() {
    let env = env();
    let tarmac = PhysicsMaterial::surface(SurfaceMaterialId(1));
    let floor = ground(&env, &tarmac);
    let (_chassis, vehicle) = car(&env, 30.0);
    vehicle.set_tire_friction_table(TireFrictionTable::new(1.0).with(SurfaceMaterialId(1), 0.8));

    vehicle.simulate(DT);

    assert!(!vehicle.is_in_air());
    assert_eq!(vehicle.wheels_in_air(), 0);
    assert_relative_eq!(vehicle.average_tire_friction(), 0.8, epsilon = 1.0e-5);
    assert!(Arc::ptr_eq(&vehicle.contact_object().unwrap(), &floor));

    for index in 0..vehicle.wheel_count() {
        let wheel = vehicle.wheel(index).unwrap();
        assert!(!wheel.is_in_air());
        assert_eq!(wheel.surface_material(), Some(SurfaceMaterialId(1)));
        assert!(Arc::ptr_eq(&wheel.contact_object().unwrap(), &floor));
        assert!(wheel.suspension_length() > 0.0);
    }
}

#[test]
fn test_airborne_vehicle_without_ground() {
    let env = env();
    let (_chassis, vehicle) = car(&env, 400.0);

    env.simulate(DT);

    assert!(vehicle.is_in_air());
    assert_eq!(vehicle.wheels_in_air(), Vehicle::WHEEL_COUNT);
    assert!(vehicle.contact_object().is_none());
    assert!(vehicle.wheel(0).unwrap().is_in_air());
}

#[test]
fn test_sleeping_vehicle_is_not_airborne() {
    let env = env();
    let (chassis, vehicle) = car(&env, 400.0);

    vehicle.simulate(DT);
    assert!(vehicle.is_in_air());
    assert_eq!(vehicle.wheels_in_air(), 4);

    chassis.sleep().unwrap();
    vehicle.simulate(DT);
    assert!(!vehicle.is_in_air());
    assert_eq!(vehicle.wheels_in_air(), 4);

    chassis.wake().unwrap();
    vehicle.simulate(DT);
    assert!(vehicle.is_in_air());
}

#[test]
fn test_sleeping_vehicle_keeps_prior_wheel_state() {
    let env = env();
    let floor = ground(&env, &PhysicsMaterial::default());
    let (chassis, vehicle) = car(&env, 30.0);

    vehicle.simulate(DT);
    assert_eq!(vehicle.wheels_in_air(), 0);

    // Nothing under the wheels any more, but the chassis is asleep
    chassis.sleep().unwrap();
    drop(floor);
    assert!(env.raycast([500.0, 100.0, 500.0], [0.0, -1.0, 0.0], &RaycastOptions::default()).is_none());

    vehicle.simulate(DT);
    assert_eq!(vehicle.wheels_in_air(), 0);
    assert!(!vehicle.is_in_air());

    chassis.wake().unwrap();
    vehicle.simulate(DT);
    assert_eq!(vehicle.wheels_in_air(), Vehicle::WHEEL_COUNT);
    assert!(vehicle.is_in_air());
}

#[test]
fn test_undrivable_surface_is_ignored() {
    let env = env();
    let slab = env
        .create_box_shape([2000.0, 4.0, 2000.0], &PhysicsMaterial::default())
        .unwrap();
    slab.set_filter_data(FilterData::default().undrivable());
    let _floor = env.create_rigid_body(&RigidBodyDesc::fixed(), &[slab]).unwrap();
    let (_chassis, vehicle) = car(&env, 30.0);

    vehicle.simulate(DT);
    assert_eq!(vehicle.wheels_in_air(), 4);
}

#[test]
fn test_throttle_moves_vehicle_along_its_forward_axis() {
    let env = env();
    let _floor = ground(&env, &PhysicsMaterial::default());
    let (chassis, vehicle) = heavy_car(&env, 30.0, PhysicsMaterial::default().with_density(200.0));
    let start = chassis.position().unwrap();

    let mut input = RawDriveInput::default();
    input.digital.accel = true;
    vehicle.set_input(input);

    for _ in 0..120 {
        env.simulate(DT);
    }

    let travelled = chassis.position().unwrap()[0] - start[0];
    assert!(travelled.abs() > 1.0, "travelled {}", travelled);
    assert_eq!(travelled.signum(), vehicle.forward_speed().signum());
    assert!(!vehicle.is_in_air());
}

#[test]
fn test_vehicle_requires_dynamic_chassis() {
    let env = env();
    let chassis = env.create_rigid_body(&RigidBodyDesc::fixed(), &[]).unwrap();
    assert!(env.create_vehicle(&chassis, &VehicleDesc::default()).is_none());
    assert!(env.vehicles().is_empty());
    assert_eq!(env.drive_count(), 0);
}

// ==================== Events ====================

#[test]
fn test_collision_events_resolve_to_engine_objects() {
    let env = env();
    let floor = ground(&env, &PhysicsMaterial::default());
    let ball_shape = env.create_sphere_shape(20.0, &PhysicsMaterial::default()).unwrap();
    let ball = env
        .create_rigid_body(&RigidBodyDesc::dynamic().with_position(0.0, 40.0, 0.0), &[ball_shape.clone()])
        .unwrap();

    let mut started = None;
    for _ in 0..120 {
        env.simulate(DT);
        started = env.take_events().started_collisions().next().cloned();
        if started.is_some() {
            break;
        }
    }

    let event = started.expect("ball never touched the floor");
    assert!(event.involves(&floor));
    assert!(event.involves(&ball));
    assert!(!event.is_sensor);
    let shapes = [event.shape1.upgrade().unwrap(), event.shape2.upgrade().unwrap()];
    assert!(shapes.iter().any(|s| Arc::ptr_eq(s, &ball_shape)));
}

#[test]
fn test_trigger_shapes_report_sensor_events() {
    let env = env();
    let zone = env
        .create_box_shape([100.0, 100.0, 100.0], &PhysicsMaterial::default())
        .unwrap();
    zone.set_flags(ShapeFlags {
        simulation: false,
        scene_query: true,
        visualization: false,
    })
    .unwrap();
    let _trigger = env.create_rigid_body(&RigidBodyDesc::fixed(), &[zone]).unwrap();

    let ball_shape = env.create_sphere_shape(10.0, &PhysicsMaterial::default()).unwrap();
    let _ball = env
        .create_rigid_body(&RigidBodyDesc::dynamic().with_position(0.0, 200.0, 0.0), &[ball_shape])
        .unwrap();

    let mut entered = false;
    for _ in 0..120 {
        env.simulate(DT);
        if env.take_events().trigger_enters().next().is_some() {
            entered = true;
            break;
        }
    }
    assert!(entered);
}

#[test]
fn test_backend_trait_round_trip() {
    let env = env();
    let backend: &dyn PhysicsBackend = &env;
    let shape = backend
        .create_shape(&PrimitiveShape::Sphere { radius: 10.0 }, &PhysicsMaterial::default())
        .unwrap();
    assert_eq!(shape.kind(), ShapeKind::Sphere);
    assert!(shape.is_finalized());
    assert!(Shape::resolve(shape.as_ref()).is_some());

    backend.set_gravity([0.0, -40.0, 0.0]);
    assert_relative_eq!(backend.gravity()[1], -40.0, epsilon = 1.0e-3);
}
