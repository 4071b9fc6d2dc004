//! Displacement Scene Library - Adaptive Subsampling for Surface Displacement Rasters
//!
//! This library provides storage, adaptive quadtree subsampling, noise statistics
//! and persistence for large 2D surface displacement scenes (north, east, down
//! ground motion plus a line-of-sight displacement raster on a common frame).
//!
//! # Architecture
//!
//! - **[`Scene`]**: Immutable displacement components on a georeferenced [`Frame`]
//! - **[`Quadtree`]**: Error-bounded adaptive tiling of the displacement raster
//! - **[`Covariance`]**: Subsampled noise variance and structure function
//! - **[`SceneView`]**: Non-GUI view model with linked panels and cursor broadcast
//!
//! # Performance Characteristics
//!
//! - **Build Time**: O(N log N) over raster samples, parallelized per subtree
//! - **Re-tiling**: full rebuild per parameter change, cached per configuration
//! - **Memory**: O(N) for raw rasters + O(L) for the leaf index (L = leaves)

mod covariance;
mod cursor;
mod frame;
mod quadtree;
mod scene;
mod stopwatch;
mod view;

// Public API exports
pub use covariance::{Covariance, CovarianceConfig, StructureFunction};
pub use cursor::{CursorPosition, CursorTracker, SubscriptionId};
pub use frame::Frame;
pub use quadtree::{Quadtree, QuadtreeConfig, QuadtreeReduction, TileNode};
pub use scene::{Scene, SceneMeta};
pub use stopwatch::Stopwatch;
pub use view::{AxisRange, ComponentKind, ComponentPanel, Histogram, SceneView, ViewConfig};

/// Error types for the scene module
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Component shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scene contains no samples")]
    EmptyScene,
}

pub type Result<T> = std::result::Result<T, SceneError>;
