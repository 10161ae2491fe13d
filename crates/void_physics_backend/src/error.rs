//! Error types for the physics backend
//!
//! Creation requests never produce these: a failed allocation surfaces as
//! `None`. Errors are reserved for operations on wrappers that already exist.

use thiserror::Error;

/// Physics backend errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The foreign object behind a wrapper has been released (or its scene is gone)
    #[error("Foreign {0} has been released")]
    ObjectReleased(&'static str),

    /// A two-phase shape was used before `finalize` was called
    #[error("Shape has not been finalized")]
    ShapeNotFinalized,

    /// Geometry data was added to a shape after `finalize`
    #[error("Shape has already been finalized")]
    ShapeAlreadyFinalized,

    /// Shape is already attached to another collision object
    #[error("Shape is already attached to a collision object")]
    ShapeAlreadyAttached,

    /// Shape is not attached to this collision object
    #[error("Shape is not attached to this collision object")]
    ShapeNotAttached,

    /// Geometry data could not be turned into a foreign geometry
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Invalid configuration
    #[error("Invalid physics backend configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for physics backend operations
pub type Result<T> = std::result::Result<T, BridgeError>;
