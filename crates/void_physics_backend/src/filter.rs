//! Collision groups and per-shape filter data

use rapier3d::prelude as rapier;
use serde::{Deserialize, Serialize};

/// Surface bit marking a shape vehicles can drive on
pub const DRIVABLE_SURFACE: u32 = 64;
/// Surface bit marking a shape suspension raycasts must ignore
pub const UNDRIVABLE_SURFACE: u32 = 32;

/// Collision groups for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionGroups {
    /// Which groups this object belongs to (membership)
    pub memberships: u32,
    /// Which groups this object can collide with (filter)
    pub filter: u32,
}

impl CollisionGroups {
    /// Create collision groups that collide with everything
    pub const ALL: Self = Self {
        memberships: u32::MAX,
        filter: u32::MAX,
    };

    /// Create collision groups that collide with nothing
    pub const NONE: Self = Self {
        memberships: 0,
        filter: 0,
    };

    /// Create new collision groups
    pub fn new(memberships: u32, filter: u32) -> Self {
        Self { memberships, filter }
    }

    /// Check if two groups can collide
    pub fn can_collide(&self, other: &CollisionGroups) -> bool {
        (self.memberships & other.filter) != 0 && (other.memberships & self.filter) != 0
    }

    pub(crate) fn to_rapier(self) -> rapier::InteractionGroups {
        rapier::InteractionGroups::new(
            rapier::Group::from_bits_truncate(self.memberships),
            rapier::Group::from_bits_truncate(self.filter),
        )
    }
}

impl Default for CollisionGroups {
    fn default() -> Self {
        Self::ALL
    }
}

/// Four words of per-shape filter data, stored in the collider's `user_data`.
///
/// - word0: free for engine-side query masks
/// - word1: surface material index + 1 (0 = no surface material)
/// - word2: reserved
/// - word3: surface flags ([`DRIVABLE_SURFACE`], [`UNDRIVABLE_SURFACE`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct FilterData {
    pub words: [u32; 4],
}

impl FilterData {
    /// Unpack from a collider's user data
    pub fn from_bits(bits: u128) -> Self {
        Self {
            words: [
                bits as u32,
                (bits >> 32) as u32,
                (bits >> 64) as u32,
                (bits >> 96) as u32,
            ],
        }
    }

    /// Pack into a collider's user data
    pub fn to_bits(self) -> u128 {
        self.words[0] as u128
            | (self.words[1] as u128) << 32
            | (self.words[2] as u128) << 64
            | (self.words[3] as u128) << 96
    }

    /// Filter data for a given surface material
    pub fn with_surface_material(mut self, index: Option<u32>) -> Self {
        self.words[1] = index.map_or(0, |i| i.saturating_add(1));
        self
    }

    /// Surface material index, if any
    pub fn surface_material(&self) -> Option<u32> {
        self.words[1].checked_sub(1)
    }

    /// Set surface flags
    pub fn with_surface_flags(mut self, flags: u32) -> Self {
        self.words[3] = flags;
        self
    }

    /// Surface flags
    pub fn surface_flags(&self) -> u32 {
        self.words[3]
    }

    /// Mark the surface drivable
    pub fn drivable(self) -> Self {
        let flags = (self.words[3] | DRIVABLE_SURFACE) & !UNDRIVABLE_SURFACE;
        self.with_surface_flags(flags)
    }

    /// Mark the surface undrivable
    pub fn undrivable(self) -> Self {
        let flags = (self.words[3] | UNDRIVABLE_SURFACE) & !DRIVABLE_SURFACE;
        self.with_surface_flags(flags)
    }
}

/// Outcome of a scene-query pre-filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryHitType {
    /// Ignore the candidate
    None,
    /// Candidate blocks the query
    Block,
}

/// Pre-filter run against every candidate of a batched scene query
pub type PreFilterFn = fn(query: FilterData, object: FilterData) -> QueryHitType;

/// Reject any candidate flagged [`UNDRIVABLE_SURFACE`]
pub fn undrivable_pre_filter(_query: FilterData, object: FilterData) -> QueryHitType {
    if object.surface_flags() & UNDRIVABLE_SURFACE != 0 {
        QueryHitType::None
    } else {
        QueryHitType::Block
    }
}
