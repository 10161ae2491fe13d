//! Collision shapes
//!
//! Primitive shapes (box, sphere, capsule) are bound to a Rapier collider as
//! soon as they are created. Convex hulls, triangle meshes and compounds are
//! built in two phases: the wrapper collects geometry data while
//! [`ShapeState::Building`], and [`Shape::finalize`] turns it into a Rapier
//! collider and applies the shape's flags. Only finalized shapes can be
//! attached to a collision object.

use crate::body::CollisionObject;
use crate::error::{BridgeError, Result};
use crate::filter::FilterData;
use crate::material::{PhysicsMaterial, SurfaceMaterialId};
use crate::resource::{ForeignHandle, ForeignLink, ForeignRef};
use crate::scene::NativeScene;
use crate::units;
use parking_lot::Mutex;
use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// Foreign binding of a shape wrapper: owned, or borrowed from a composite
pub(crate) type ShapeBinding = ForeignLink<rapier::ColliderHandle, NativeScene>;

/// Kind of an engine shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Box,
    Sphere,
    Capsule,
    ConvexHull,
    TriangleMesh,
    Compound,
}

impl ShapeKind {
    /// Whether geometry is added after creation
    pub fn is_incremental(self) -> bool {
        matches!(self, Self::ConvexHull | Self::TriangleMesh | Self::Compound)
    }
}

/// Heightfield terrain request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightfieldDesc {
    pub rows: usize,
    pub columns: usize,
    /// Row-major heights, `rows * columns` samples
    pub heights: Vec<f32>,
    /// Extent of the whole field (engine units)
    pub scale: [f32; 3],
}

/// Request for a shape whose geometry is known up front (engine units)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveShape {
    Box { half_extents: [f32; 3] },
    Sphere { radius: f32 },
    Capsule { radius: f32, half_height: f32 },
    /// Not supported by this backend
    Cylinder { radius: f32, half_height: f32 },
    /// Not supported by this backend
    Heightfield(HeightfieldDesc),
}

impl PrimitiveShape {
    /// Engine kind of the shape this request produces, `None` if unsupported
    pub fn kind(&self) -> Option<ShapeKind> {
        match self {
            Self::Box { .. } => Some(ShapeKind::Box),
            Self::Sphere { .. } => Some(ShapeKind::Sphere),
            Self::Capsule { .. } => Some(ShapeKind::Capsule),
            Self::Cylinder { .. } | Self::Heightfield(_) => None,
        }
    }

    /// Build the Rapier geometry for this request
    pub(crate) fn to_geometry(&self) -> Option<rapier::SharedShape> {
        match *self {
            Self::Box { half_extents } => {
                half_extents.iter().all(|e| valid_extent(*e)).then(|| {
                    let h = units::to_foreign_vector(half_extents);
                    rapier::SharedShape::cuboid(h.x, h.y, h.z)
                })
            }
            Self::Sphere { radius } => {
                valid_extent(radius).then(|| rapier::SharedShape::ball(units::to_foreign_length(radius)))
            }
            Self::Capsule { radius, half_height } => (valid_extent(radius) && valid_extent(half_height)).then(|| {
                rapier::SharedShape::capsule_y(
                    units::to_foreign_length(half_height),
                    units::to_foreign_length(radius),
                )
            }),
            Self::Cylinder { .. } => {
                log::debug!("cylinder shapes are not supported");
                None
            }
            Self::Heightfield(_) => {
                log::debug!("heightfield terrain shapes are not supported");
                None
            }
        }
    }
}

fn valid_extent(x: f32) -> bool {
    x.is_finite() && x > 0.0
}

/// Geometry of a shape as seen by the engine (engine units)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryDesc {
    Box { half_extents: [f32; 3] },
    Sphere { radius: f32 },
    Capsule { radius: f32, half_height: f32 },
    ConvexHull { point_count: usize },
    TriangleMesh { triangle_count: usize },
    Compound { child_count: usize },
}

impl GeometryDesc {
    fn from_foreign(shape: &rapier::SharedShape) -> Option<Self> {
        if let Some(cuboid) = shape.as_cuboid() {
            return Some(Self::Box {
                half_extents: units::from_foreign_vector(&cuboid.half_extents),
            });
        }
        if let Some(ball) = shape.as_ball() {
            return Some(Self::Sphere {
                radius: units::from_foreign_length(ball.radius),
            });
        }
        if let Some(capsule) = shape.as_capsule() {
            return Some(Self::Capsule {
                radius: units::from_foreign_length(capsule.radius),
                half_height: units::from_foreign_length(capsule.half_height()),
            });
        }
        if let Some(hull) = shape.as_convex_polyhedron() {
            return Some(Self::ConvexHull {
                point_count: hull.points().len(),
            });
        }
        if let Some(mesh) = shape.as_trimesh() {
            return Some(Self::TriangleMesh {
                triangle_count: mesh.indices().len(),
            });
        }
        shape.as_compound().map(|compound| Self::Compound {
            child_count: compound.shapes().len(),
        })
    }
}

/// Simulation flags of a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeFlags {
    /// Takes part in contact generation
    pub simulation: bool,
    /// Visible to scene queries
    pub scene_query: bool,
    /// Drawn by debug visualization
    pub visualization: bool,
}

impl ShapeFlags {
    /// Flags of a freshly created shape, before initialization
    pub const NONE: Self = Self {
        simulation: false,
        scene_query: false,
        visualization: false,
    };

    /// Flags applied by shape initialization
    pub const DEFAULT: Self = Self {
        simulation: true,
        scene_query: true,
        visualization: true,
    };
}

impl Default for ShapeFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Geometry collected by an incremental shape before `finalize`
#[derive(Debug)]
pub(crate) enum PendingGeometry {
    ConvexHull {
        points: Vec<rapier::Point<f32>>,
    },
    TriangleMesh {
        vertices: Vec<rapier::Point<f32>>,
        indices: Vec<u32>,
    },
    Compound {
        children: Vec<(Weak<Shape>, rapier::Isometry<f32>)>,
    },
}

impl PendingGeometry {
    fn empty(kind: ShapeKind) -> Option<Self> {
        match kind {
            ShapeKind::ConvexHull => Some(Self::ConvexHull { points: Vec::new() }),
            ShapeKind::TriangleMesh => Some(Self::TriangleMesh {
                vertices: Vec::new(),
                indices: Vec::new(),
            }),
            ShapeKind::Compound => Some(Self::Compound { children: Vec::new() }),
            ShapeKind::Box | ShapeKind::Sphere | ShapeKind::Capsule => None,
        }
    }

    /// Turn the collected data into a Rapier geometry
    fn build(&self) -> Result<rapier::SharedShape> {
        match self {
            Self::ConvexHull { points } => {
                if points.len() < 4 {
                    return Err(BridgeError::InvalidGeometry(format!(
                        "convex hull needs at least 4 points, got {}",
                        points.len()
                    )));
                }
                rapier::SharedShape::convex_hull(points)
                    .ok_or_else(|| BridgeError::InvalidGeometry("degenerate convex hull".into()))
            }
            Self::TriangleMesh { vertices, indices } => {
                if indices.is_empty() || indices.len() % 3 != 0 {
                    return Err(BridgeError::InvalidGeometry(format!(
                        "triangle mesh needs a non-empty multiple of 3 indices, got {}",
                        indices.len()
                    )));
                }
                if let Some(bad) = indices.iter().find(|i| **i as usize >= vertices.len()) {
                    return Err(BridgeError::InvalidGeometry(format!(
                        "index {} out of range for {} vertices",
                        bad,
                        vertices.len()
                    )));
                }
                let triangles = indices.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect();
                Ok(rapier::SharedShape::trimesh(vertices.clone(), triangles))
            }
            Self::Compound { children } => {
                if children.is_empty() {
                    return Err(BridgeError::InvalidGeometry("compound has no children".into()));
                }
                let mut parts = Vec::with_capacity(children.len());
                for (child, pose) in children {
                    let child = child.upgrade().ok_or(BridgeError::ObjectReleased("compound child"))?;
                    if matches!(child.kind(), ShapeKind::TriangleMesh | ShapeKind::Compound) {
                        return Err(BridgeError::InvalidGeometry(format!(
                            "{:?} cannot be a compound child",
                            child.kind()
                        )));
                    }
                    let geometry = child.foreign_geometry()?;
                    parts.push((*pose, geometry));
                }
                Ok(rapier::SharedShape::compound(parts))
            }
        }
    }
}

/// Lifecycle of a shape wrapper
///
/// While building, the wrapper owns the geometry data and no foreign shape
/// exists. Once ready, the foreign shape owns its geometry and is released
/// with it; the wrapper keeps no copy.
pub(crate) enum ShapeState {
    Building(PendingGeometry),
    Ready(ShapeBinding),
    Released,
}

/// Who currently owns a shape's geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryOwner {
    /// Still being built by the engine wrapper
    Wrapper,
    /// Bound into a foreign shape
    Shape,
}

struct ShapeInner {
    state: ShapeState,
    flags: ShapeFlags,
    local_pose: rapier::Isometry<f32>,
    filter: FilterData,
    attached_to: Option<Weak<CollisionObject>>,
}

/// Engine shape wrapping a Rapier collider
pub struct Shape {
    kind: ShapeKind,
    material: PhysicsMaterial,
    scene: Weak<Mutex<NativeScene>>,
    this: Weak<Shape>,
    inner: Mutex<ShapeInner>,
}

impl Shape {
    /// Create a primitive shape. `None` for unsupported kinds, invalid
    /// dimensions or a failed foreign allocation; nothing is left allocated.
    pub(crate) fn primitive(
        scene: &Arc<Mutex<NativeScene>>,
        request: &PrimitiveShape,
        material: PhysicsMaterial,
    ) -> Option<Arc<Self>> {
        let kind = request.kind()?;
        let geometry = request.to_geometry()?;
        let filter = surface_filter(&material);
        let key = scene.lock().create_shape(geometry, &material, filter);
        let handle = ForeignHandle::wrap(key, scene, NativeScene::release_shape)?;
        Some(Self::bound(scene, kind, material, filter, ForeignLink::Owned(handle)))
    }

    /// Create an empty incremental shape (convex hull, triangle mesh or
    /// compound). Nothing is allocated until [`finalize`](Self::finalize).
    pub(crate) fn incremental(scene: &Arc<Mutex<NativeScene>>, kind: ShapeKind, material: PhysicsMaterial) -> Option<Arc<Self>> {
        let pending = PendingGeometry::empty(kind)?;
        let filter = surface_filter(&material);
        Some(Arc::new_cyclic(|this| Self {
            kind,
            material,
            scene: Arc::downgrade(scene),
            this: this.clone(),
            inner: Mutex::new(ShapeInner {
                state: ShapeState::Building(pending),
                flags: ShapeFlags::NONE,
                local_pose: rapier::Isometry::identity(),
                filter,
                attached_to: None,
            }),
        }))
    }

    /// Wrap a collider owned by a composite (character controller)
    pub(crate) fn borrowed(
        scene: &Arc<Mutex<NativeScene>>,
        key: rapier::ColliderHandle,
        kind: ShapeKind,
        material: PhysicsMaterial,
    ) -> Arc<Self> {
        let filter = scene.lock().shape_filter_data(key).unwrap_or_default();
        let shape = Self::bound(
            scene,
            kind,
            material,
            filter,
            ForeignLink::Borrowed(ForeignRef::new(key, scene)),
        );
        shape.inner.lock().flags = ShapeFlags::DEFAULT;
        shape
    }

    fn bound(
        scene: &Arc<Mutex<NativeScene>>,
        kind: ShapeKind,
        material: PhysicsMaterial,
        filter: FilterData,
        binding: ShapeBinding,
    ) -> Arc<Self> {
        let key = binding.key();
        let shape = Arc::new_cyclic(|this| Self {
            kind,
            material,
            scene: Arc::downgrade(scene),
            this: this.clone(),
            inner: Mutex::new(ShapeInner {
                state: ShapeState::Ready(binding),
                flags: ShapeFlags::NONE,
                local_pose: rapier::Isometry::identity(),
                filter,
                attached_to: None,
            }),
        });
        scene.lock().backrefs.shapes.register(key, Arc::downgrade(&shape));
        shape
    }

    /// Shape kind
    pub fn kind(&self) -> ShapeKind {
        self.kind
    }

    /// Material the shape was created with
    pub fn material(&self) -> &PhysicsMaterial {
        &self.material
    }

    /// Surface material carried in the shape's filter data
    pub fn surface_material(&self) -> Option<SurfaceMaterialId> {
        self.inner.lock().filter.surface_material().map(SurfaceMaterialId)
    }

    /// Whether the shape's geometry is complete
    pub fn is_finalized(&self) -> bool {
        matches!(self.inner.lock().state, ShapeState::Ready(_))
    }

    /// Who owns the shape's geometry, `None` once released
    pub fn geometry_owner(&self) -> Option<GeometryOwner> {
        match self.inner.lock().state {
            ShapeState::Building(_) => Some(GeometryOwner::Wrapper),
            ShapeState::Ready(_) => Some(GeometryOwner::Shape),
            ShapeState::Released => None,
        }
    }

    /// Whether the wrapper owns its collider (as opposed to a composite)
    pub fn owns_foreign(&self) -> bool {
        matches!(&self.inner.lock().state, ShapeState::Ready(binding) if binding.is_owned())
    }

    /// Current flags
    pub fn flags(&self) -> ShapeFlags {
        self.inner.lock().flags
    }

    /// Collision object the shape is attached to
    pub fn attached_object(&self) -> Option<Arc<CollisionObject>> {
        self.inner.lock().attached_to.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_attached(&self, object: Option<Weak<CollisionObject>>) {
        self.inner.lock().attached_to = object;
    }

    pub(crate) fn collider_key(&self) -> Option<rapier::ColliderHandle> {
        match &self.inner.lock().state {
            ShapeState::Ready(binding) => Some(binding.key()),
            _ => None,
        }
    }

    /// Key of a finalized shape, for attachment
    pub(crate) fn ready_key(&self) -> Result<rapier::ColliderHandle> {
        match &self.inner.lock().state {
            ShapeState::Ready(binding) => Ok(binding.key()),
            ShapeState::Building(_) => Err(BridgeError::ShapeNotFinalized),
            ShapeState::Released => Err(BridgeError::ObjectReleased("shape")),
        }
    }

    fn with_binding<R>(&self, f: impl FnOnce(&mut NativeScene, rapier::ColliderHandle) -> R) -> Result<R> {
        let inner = self.inner.lock();
        match &inner.state {
            ShapeState::Ready(binding) => binding.with(f).ok_or(BridgeError::ObjectReleased("shape")),
            ShapeState::Building(_) => Err(BridgeError::ShapeNotFinalized),
            ShapeState::Released => Err(BridgeError::ObjectReleased("shape")),
        }
    }

    fn foreign_geometry(&self) -> Result<rapier::SharedShape> {
        self.with_binding(|scene, key| scene.shape_geometry(key))?
            .ok_or(BridgeError::ObjectReleased("shape"))
    }

    /// Geometry in engine units, `None` until finalized
    pub fn geometry(&self) -> Option<GeometryDesc> {
        self.foreign_geometry()
            .ok()
            .and_then(|g| GeometryDesc::from_foreign(&g))
    }

    // ==================== Incremental building ====================

    fn with_pending<R>(&self, f: impl FnOnce(&mut PendingGeometry) -> Result<R>) -> Result<R> {
        let mut inner = self.inner.lock();
        match &mut inner.state {
            ShapeState::Building(pending) => f(pending),
            ShapeState::Ready(_) => Err(BridgeError::ShapeAlreadyFinalized),
            ShapeState::Released => Err(BridgeError::ObjectReleased("shape")),
        }
    }

    /// Add hull points (engine units)
    pub fn add_points(&self, new_points: &[[f32; 3]]) -> Result<()> {
        self.with_pending(|pending| match pending {
            PendingGeometry::ConvexHull { points } => {
                points.extend(new_points.iter().map(|p| units::to_foreign_point(*p)));
                Ok(())
            }
            _ => Err(BridgeError::InvalidGeometry(format!("{:?} does not take hull points", self.kind))),
        })
    }

    /// Add mesh vertices (engine units)
    pub fn add_vertices(&self, new_vertices: &[[f32; 3]]) -> Result<()> {
        self.with_pending(|pending| match pending {
            PendingGeometry::TriangleMesh { vertices, .. } => {
                vertices.extend(new_vertices.iter().map(|p| units::to_foreign_point(*p)));
                Ok(())
            }
            _ => Err(BridgeError::InvalidGeometry(format!("{:?} does not take vertices", self.kind))),
        })
    }

    /// Add mesh indices, three per triangle
    pub fn add_indices(&self, new_indices: &[u32]) -> Result<()> {
        self.with_pending(|pending| match pending {
            PendingGeometry::TriangleMesh { indices, .. } => {
                indices.extend_from_slice(new_indices);
                Ok(())
            }
            _ => Err(BridgeError::InvalidGeometry(format!("{:?} does not take indices", self.kind))),
        })
    }

    /// Add one triangle given by its corners (engine units)
    pub fn add_triangle(&self, corners: [[f32; 3]; 3]) -> Result<()> {
        self.with_pending(|pending| match pending {
            PendingGeometry::TriangleMesh { vertices, indices } => {
                let base = vertices.len() as u32;
                vertices.extend(corners.iter().map(|p| units::to_foreign_point(*p)));
                indices.extend_from_slice(&[base, base + 1, base + 2]);
                Ok(())
            }
            _ => Err(BridgeError::InvalidGeometry(format!("{:?} does not take triangles", self.kind))),
        })
    }

    /// Reference an existing shape as a compound child. The compound does
    /// not take ownership of it.
    pub fn add_child(&self, child: &Arc<Shape>, position: [f32; 3], rotation: [f32; 4]) -> Result<()> {
        if std::ptr::eq(Arc::as_ptr(child), self) {
            return Err(BridgeError::InvalidGeometry("a compound cannot contain itself".into()));
        }
        child.ready_key()?;
        let pose = units::to_foreign_isometry(position, rotation);
        self.with_pending(|pending| match pending {
            PendingGeometry::Compound { children } => {
                children.push((Arc::downgrade(child), pose));
                Ok(())
            }
            _ => Err(BridgeError::InvalidGeometry(format!("{:?} does not take children", self.kind))),
        })
    }

    /// Build the foreign shape from the collected geometry and apply the
    /// shape's flags. On error the shape stays in the building state.
    pub fn finalize(&self) -> Result<()> {
        let scene = self.scene.upgrade().ok_or(BridgeError::ObjectReleased("scene"))?;
        let mut inner = self.inner.lock();
        let geometry = match &inner.state {
            ShapeState::Building(pending) => pending.build()?,
            ShapeState::Ready(_) => return Err(BridgeError::ShapeAlreadyFinalized),
            ShapeState::Released => return Err(BridgeError::ObjectReleased("shape")),
        };

        let key = scene.lock().create_shape(geometry, &self.material, inner.filter);
        let handle = ForeignHandle::wrap(key, &scene, NativeScene::release_shape)
            .ok_or_else(|| BridgeError::InvalidGeometry("foreign shape allocation failed".into()))?;
        let key = handle.key();
        inner.state = ShapeState::Ready(ForeignLink::Owned(handle));
        inner.flags = ShapeFlags::DEFAULT;
        inner.local_pose = rapier::Isometry::identity();

        let mut native = scene.lock();
        native.backrefs.shapes.register(key, self.this.clone());
        native.apply_shape_flags(key, inner.flags, Some(inner.local_pose));
        Ok(())
    }

    // ==================== Flags and pose ====================

    /// Apply the default flags and, unless `basic_only`, an identity local
    /// pose. Incremental shapes only record the request until finalized.
    pub fn initialize(&self, basic_only: bool) {
        let mut inner = self.inner.lock();
        inner.flags = ShapeFlags::DEFAULT;
        if !basic_only {
            inner.local_pose = rapier::Isometry::identity();
        }
        let pose = (!basic_only).then_some(inner.local_pose);
        if let ShapeState::Ready(binding) = &inner.state {
            let flags = inner.flags;
            binding.with(|scene, key| scene.apply_shape_flags(key, flags, pose));
        }
    }

    /// Replace the shape's flags
    pub fn set_flags(&self, flags: ShapeFlags) -> Result<()> {
        self.inner.lock().flags = flags;
        self.with_binding(|scene, key| scene.apply_shape_flags(key, flags, None))
            .map(|_| ())
    }

    /// Local pose relative to the attached collision object (engine units)
    pub fn local_pose(&self) -> ([f32; 3], [f32; 4]) {
        let pose = self.foreign_local_pose();
        (
            units::from_foreign_vector(&pose.translation.vector),
            units::from_foreign_rotation(&pose.rotation),
        )
    }

    pub(crate) fn foreign_local_pose(&self) -> rapier::Isometry<f32> {
        self.inner.lock().local_pose
    }

    /// Set the local pose (engine units)
    pub fn set_local_pose(&self, position: [f32; 3], rotation: [f32; 4]) -> Result<()> {
        let pose = units::to_foreign_isometry(position, rotation);
        let flags = {
            let mut inner = self.inner.lock();
            inner.local_pose = pose;
            inner.flags
        };
        self.with_binding(|scene, key| scene.apply_shape_flags(key, flags, Some(pose)))
            .map(|_| ())
    }

    /// Filter data carried by the shape
    pub fn filter_data(&self) -> FilterData {
        self.inner.lock().filter
    }

    /// Replace the shape's filter data
    pub fn set_filter_data(&self, filter: FilterData) {
        self.inner.lock().filter = filter;
        let _ = self.with_binding(|scene, key| scene.set_shape_filter_data(key, filter));
    }
}

impl Drop for Shape {
    fn drop(&mut self) {
        let state = std::mem::replace(&mut self.inner.get_mut().state, ShapeState::Released);
        if let ShapeState::Ready(binding) = state {
            if let Some(scene) = self.scene.upgrade() {
                scene.lock().backrefs.shapes.invalidate(binding.key());
            }
            drop(binding);
        }
    }
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("kind", &self.kind)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

fn surface_filter(material: &PhysicsMaterial) -> FilterData {
    FilterData::default().with_surface_material(material.surface_material.map(|s| s.0))
}
