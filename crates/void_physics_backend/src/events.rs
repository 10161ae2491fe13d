//! Physics events (collisions, triggers, controller hits)
//!
//! Events carry weak references to the engine wrappers involved: an event
//! buffer never keeps a shape or collision object alive.

use crate::body::CollisionObject;
use crate::controller::CharacterController;
use crate::scene::{NativeScene, RawCollisionEvent};
use crate::shape::Shape;
use rapier3d::prelude as rapier;
use std::sync::{Arc, Weak};

/// Type of collision event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionEventType {
    /// Collision started
    Started,
    /// Collision ended
    Stopped,
}

/// A collision event between two shapes
#[derive(Debug, Clone)]
pub struct CollisionEvent {
    /// First shape
    pub shape1: Weak<Shape>,
    /// Second shape
    pub shape2: Weak<Shape>,
    /// Collision object of the first shape
    pub object1: Weak<CollisionObject>,
    /// Collision object of the second shape
    pub object2: Weak<CollisionObject>,
    /// Event type
    pub event_type: CollisionEventType,
    /// Whether this is a sensor event (trigger)
    pub is_sensor: bool,
}

impl CollisionEvent {
    /// Resolve a raw event through the scene's back-references.
    ///
    /// Runs under the scene lock; only weak references are taken.
    pub(crate) fn resolve(scene: &NativeScene, raw: &RawCollisionEvent) -> Self {
        let (shape1, object1) = resolve_collider(scene, raw.collider1);
        let (shape2, object2) = resolve_collider(scene, raw.collider2);
        Self {
            shape1,
            shape2,
            object1,
            object2,
            event_type: if raw.started {
                CollisionEventType::Started
            } else {
                CollisionEventType::Stopped
            },
            is_sensor: raw.is_sensor,
        }
    }

    /// Check if this is a start event
    pub fn is_started(&self) -> bool {
        self.event_type == CollisionEventType::Started
    }

    /// Check if this is a stop event
    pub fn is_stopped(&self) -> bool {
        self.event_type == CollisionEventType::Stopped
    }

    /// Whether `object` is one of the two sides
    pub fn involves(&self, object: &Arc<CollisionObject>) -> bool {
        let target = Arc::downgrade(object);
        self.object1.ptr_eq(&target) || self.object2.ptr_eq(&target)
    }
}

/// Weak shape and collision object registered for a collider
pub(crate) fn resolve_collider(
    scene: &NativeScene,
    collider: rapier::ColliderHandle,
) -> (Weak<Shape>, Weak<CollisionObject>) {
    let shape = scene.backrefs.shapes.resolve(collider).unwrap_or_default();
    let object = scene
        .shape_parent(collider)
        .and_then(|actor| scene.backrefs.objects.resolve(actor))
        .unwrap_or_default();
    (shape, object)
}

/// Collision events produced by the last simulation step
#[derive(Default)]
pub struct EventCollector {
    /// Collision events this frame
    pub collision_events: Vec<CollisionEvent>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all collected events
    pub fn clear(&mut self) {
        self.collision_events.clear();
    }

    /// Get collision start events
    pub fn started_collisions(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.collision_events.iter().filter(|e| e.is_started())
    }

    /// Get collision end events
    pub fn stopped_collisions(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.collision_events.iter().filter(|e| e.is_stopped())
    }

    /// Get sensor/trigger start events
    pub fn trigger_enters(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.collision_events
            .iter()
            .filter(|e| e.is_sensor && e.is_started())
    }

    /// Get sensor/trigger end events
    pub fn trigger_exits(&self) -> impl Iterator<Item = &CollisionEvent> {
        self.collision_events
            .iter()
            .filter(|e| e.is_sensor && e.is_stopped())
    }
}

/// A shape hit by a character controller during a move (engine units)
#[derive(Debug, Clone)]
pub struct ControllerHit {
    /// Shape that was hit
    pub shape: Weak<Shape>,
    /// Collision object the shape belongs to
    pub object: Weak<CollisionObject>,
    /// Contact point in world space
    pub point: [f32; 3],
    /// Contact normal on the hit shape
    pub normal: [f32; 3],
    /// Direction of the requested move
    pub direction: [f32; 3],
    /// Length of the requested move
    pub length: f32,
}

/// Receives controller hits. Called after the scene has been unlocked, so
/// implementations may create or drop physics objects.
pub trait ControllerHitReport: Send + Sync {
    /// Called once per shape hit during a move
    fn on_shape_hit(&self, controller: &CharacterController, hit: &ControllerHit);
}
