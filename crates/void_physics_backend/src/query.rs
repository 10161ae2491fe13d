//! Scene query results (raycasts, batched suspension queries)

use crate::body::CollisionObject;
use crate::filter::{CollisionGroups, FilterData};
use crate::material::SurfaceMaterialId;
use crate::resource::ForeignHandle;
use crate::scene::{BatchQueryKey, NativeScene};
use crate::shape::Shape;
use rapier3d::prelude as rapier;
use std::sync::Weak;

/// Result of an environment raycast, in engine units
#[derive(Debug, Clone)]
pub struct RaycastHit {
    /// Shape that was hit
    pub shape: Weak<Shape>,
    /// Collision object the shape is attached to, if any
    pub object: Weak<CollisionObject>,
    /// Hit point in world space
    pub point: [f32; 3],
    /// Surface normal at hit point
    pub normal: [f32; 3],
    /// Distance from ray origin
    pub distance: f32,
    /// Filter data of the shape that was hit
    pub filter_data: FilterData,
}

/// Options for raycast queries
#[derive(Debug, Clone)]
pub struct RaycastOptions {
    /// Maximum distance for the ray (engine units)
    pub max_distance: f32,
    /// Collision groups filter
    pub filter: CollisionGroups,
}

impl Default for RaycastOptions {
    fn default() -> Self {
        Self {
            max_distance: f32::MAX,
            filter: CollisionGroups::ALL,
        }
    }
}

impl RaycastOptions {
    /// Set maximum distance
    pub fn with_max_distance(mut self, distance: f32) -> Self {
        self.max_distance = distance;
        self
    }

    /// Set collision filter
    pub fn with_filter(mut self, filter: CollisionGroups) -> Self {
        self.filter = filter;
        self
    }
}

/// One suspension raycast result, in Rapier units
#[derive(Debug, Clone, Copy)]
pub(crate) struct SuspensionHit {
    pub(crate) collider: Option<rapier::ColliderHandle>,
    pub(crate) distance: f32,
    pub(crate) point: rapier::Point<f32>,
    pub(crate) normal: rapier::Vector<f32>,
    pub(crate) filter_data: FilterData,
}

impl Default for SuspensionHit {
    fn default() -> Self {
        Self {
            collider: None,
            distance: 0.0,
            point: rapier::Point::origin(),
            normal: rapier::Vector::zeros(),
            filter_data: FilterData::default(),
        }
    }
}

impl SuspensionHit {
    pub(crate) fn surface_material(&self) -> Option<SurfaceMaterialId> {
        self.collider?;
        self.filter_data.surface_material().map(SurfaceMaterialId)
    }
}

/// Per-wheel state produced by the drive update
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WheelQueryResult {
    pub(crate) in_air: bool,
    pub(crate) tire_friction: f32,
    pub(crate) surface_material: Option<SurfaceMaterialId>,
    pub(crate) contact_shape: Option<rapier::ColliderHandle>,
    pub(crate) contact_actor: Option<rapier::RigidBodyHandle>,
    pub(crate) suspension_length: f32,
}

/// Per-vehicle query buffers and the batched query that fills them.
///
/// Sized once from the wheel count; only the contents change afterwards.
pub(crate) struct BatchQueryState {
    pub(crate) query: ForeignHandle<BatchQueryKey, NativeScene>,
    pub(crate) raycast_results: Box<[SuspensionHit]>,
    pub(crate) wheel_results: Box<[WheelQueryResult]>,
}

impl BatchQueryState {
    pub(crate) fn new(query: ForeignHandle<BatchQueryKey, NativeScene>, wheel_count: usize) -> Self {
        Self {
            query,
            raycast_results: vec![SuspensionHit::default(); wheel_count].into_boxed_slice(),
            wheel_results: vec![WheelQueryResult::default(); wheel_count].into_boxed_slice(),
        }
    }

    pub(crate) fn wheel_count(&self) -> usize {
        self.wheel_results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_has_no_surface() {
        let hit = SuspensionHit {
            filter_data: FilterData::default().with_surface_material(Some(3)),
            ..Default::default()
        };
        assert_eq!(hit.surface_material(), None);

        let hit = SuspensionHit {
            collider: Some(rapier::ColliderHandle::invalid()),
            ..hit
        };
        assert_eq!(hit.surface_material(), Some(SurfaceMaterialId(3)));
    }

    #[test]
    fn test_raycast_options_builder() {
        let options = RaycastOptions::default()
            .with_max_distance(10.0)
            .with_filter(CollisionGroups::NONE);
        assert_eq!(options.max_distance, 10.0);
        assert_eq!(options.filter, CollisionGroups::NONE);
    }
}
