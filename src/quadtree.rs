//! Quadtree - adaptive error-bounded tiling of a displacement raster
//!
//! This module provides an adaptive quadtree that subdivides a 2D raster until
//! every tile's error statistic drops below a configurable threshold. Tiles with
//! too many invalid (NaN) samples are discarded from the leaf set, and tile edge
//! lengths are bounded in physical units. Tilings are rebuilt on parameter
//! changes and cached per configuration.

use crate::Frame;
use ndarray::{Array2, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Maximum depth of the quadtree to prevent infinite recursion
const MAX_DEPTH: u32 = 20;

/// Depth of the uniform base tiling used to estimate the initial epsilon
const INIT_DEPTH: u32 = 3;

/// Factor applied to the initial epsilon estimate to derive the epsilon floor
const EPSILON_MIN_FACTOR: f64 = 0.1;

/// Tuning parameters for the quadtree tiling
///
/// `epsilon` of `None` means "derive a threshold from the data at build time".
/// Out-of-range values for the other parameters are normalized with a warning
/// instead of failing, so parameter sweeps always leave the tree usable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuadtreeConfig {
    /// Error threshold controlling tile subdivision; smaller values force
    /// finer subdivision. `None` derives the threshold from the base tiling.
    pub epsilon: Option<f64>,
    /// Maximum fraction of NaN samples permitted in a leaf tile before it is
    /// discarded from the leaf set. Valid range is (0, 1].
    pub nan_allowed: f64,
    /// Bounds on tile edge length in meters as `(min, max)`.
    /// A `min` of 0 means no lower bound.
    pub tile_size_lim: (f64, f64),
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            epsilon: None,
            nan_allowed: 0.9,
            tile_size_lim: (250.0, 5000.0),
        }
    }
}

/// A leaf tile of the quadtree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileNode {
    /// First raster row covered by this tile
    pub row0: usize,
    /// First raster column covered by this tile
    pub col0: usize,
    /// Number of rows covered
    pub rows: usize,
    /// Number of columns covered
    pub cols: usize,
    /// Depth in the tree (0 = root)
    pub depth: u32,
    /// Mean of the finite samples
    pub mean: f64,
    /// Median of the finite samples
    pub median: f64,
    /// Error statistic (standard deviation of finite samples)
    pub error: f64,
    /// Fraction of NaN samples in the tile
    pub nan_fraction: f64,
    /// Easting of the lower-left corner, meters
    pub easting: f64,
    /// Northing of the lower-left corner, meters
    pub northing: f64,
    /// Physical width, meters
    pub width: f64,
    /// Physical height, meters
    pub height: f64,
}

impl TileNode {
    /// Center of the tile in local metric coordinates
    #[inline]
    pub fn focal_point(&self) -> (f64, f64) {
        (
            self.easting + self.width / 2.0,
            self.northing + self.height / 2.0,
        )
    }

    /// Edge length of the tile in meters (longer edge)
    #[inline]
    pub fn size(&self) -> f64 {
        self.width.max(self.height)
    }
}

/// Summary of the current tiling
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QuadtreeReduction {
    /// Number of leaves surviving the NaN gate
    pub leaf_count: usize,
    /// Number of leaves discarded because of their NaN fraction
    pub discarded_nan_leaves: usize,
    /// Mean leaf edge length in meters
    pub mean_tile_size: f64,
    /// Raster samples per surviving leaf
    pub reduction_factor: f64,
}

/// Cache key for computed tilings, keyed by the exact parameter bit patterns
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
struct TilingCacheKey {
    epsilon_bits: u64,
    nan_allowed_bits: u64,
    tile_min_bits: u64,
    tile_max_bits: u64,
}

#[derive(Clone)]
struct CachedTiling {
    leaves: Arc<Vec<TileNode>>,
    discarded: usize,
}

/// Pixel extent of a node during subdivision
#[derive(Clone, Copy, Debug)]
struct NodeExtent {
    row0: usize,
    col0: usize,
    rows: usize,
    cols: usize,
    depth: u32,
}

/// One-pass statistics over a node's samples
#[derive(Clone, Copy, Debug, Default)]
struct NodeStats {
    finite_count: usize,
    mean: f64,
    error: f64,
    nan_fraction: f64,
}

/// Adaptive quadtree over a single displacement raster
pub struct Quadtree {
    data: Arc<Array2<f64>>,
    frame: Frame,
    epsilon: f64,
    epsilon_init: f64,
    epsilon_min: f64,
    nan_allowed: f64,
    tile_size_lim: (f64, f64),
    leaves: Arc<Vec<TileNode>>,
    discarded_nan_leaves: usize,
    /// Tilings computed for previously seen parameter combinations.
    /// Rebuilt at runtime, never serialized.
    tiling_cache: RwLock<HashMap<TilingCacheKey, CachedTiling>>,
}

impl std::fmt::Debug for Quadtree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quadtree")
            .field("frame", &self.frame)
            .field("epsilon", &self.epsilon)
            .field("epsilon_min", &self.epsilon_min)
            .field("nan_allowed", &self.nan_allowed)
            .field("tile_size_lim", &self.tile_size_lim)
            .field("leaf_count", &self.leaves.len())
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Quadtree {
    /// Build a quadtree over a raster with the given configuration
    pub fn new(data: Arc<Array2<f64>>, frame: Frame, config: &QuadtreeConfig) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("quadtree::new");

        let epsilon_init = Self::estimate_epsilon_init(&data, frame);
        let epsilon_min = epsilon_init * EPSILON_MIN_FACTOR;

        let epsilon = match config.epsilon {
            Some(e) if e.is_finite() && e >= epsilon_min => e,
            Some(e) => {
                tracing::warn!(
                    epsilon = e,
                    epsilon_min,
                    "Configured epsilon below floor, falling back to initial estimate"
                );
                epsilon_init
            }
            None => epsilon_init,
        };

        let mut quadtree = Self {
            data,
            frame,
            epsilon,
            epsilon_init,
            epsilon_min,
            nan_allowed: normalize_nan_allowed(config.nan_allowed),
            tile_size_lim: normalize_tile_size_lim(config.tile_size_lim),
            leaves: Arc::new(Vec::new()),
            discarded_nan_leaves: 0,
            tiling_cache: RwLock::new(HashMap::new()),
        };
        quadtree.retile();
        quadtree
    }

    /// Current error threshold
    #[inline]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Initial epsilon estimate derived from the uniform base tiling
    #[inline]
    pub fn epsilon_init(&self) -> f64 {
        self.epsilon_init
    }

    /// Lowest accepted epsilon
    #[inline]
    pub fn epsilon_min(&self) -> f64 {
        self.epsilon_min
    }

    /// Current NaN gate threshold
    #[inline]
    pub fn nan_allowed(&self) -> f64 {
        self.nan_allowed
    }

    /// Current tile size bounds in meters
    #[inline]
    pub fn tile_size_lim(&self) -> (f64, f64) {
        self.tile_size_lim
    }

    /// Effective configuration after normalization
    pub fn config(&self) -> QuadtreeConfig {
        QuadtreeConfig {
            epsilon: Some(self.epsilon),
            nan_allowed: self.nan_allowed,
            tile_size_lim: self.tile_size_lim,
        }
    }

    /// Set the error threshold and re-tile
    ///
    /// Values below the epsilon floor or non-finite values are rejected with a
    /// warning; the previous tiling stays in place and the tree remains usable.
    pub fn set_epsilon(&mut self, epsilon: f64) {
        if !epsilon.is_finite() || epsilon < self.epsilon_min {
            tracing::warn!(
                epsilon,
                epsilon_min = self.epsilon_min,
                "Rejecting epsilon below floor"
            );
            return;
        }
        if epsilon == self.epsilon {
            return;
        }
        self.epsilon = epsilon;
        self.retile();
    }

    /// Set the NaN gate threshold and re-tile
    ///
    /// Values outside (0, 1] disable the gate (every leaf is kept).
    pub fn set_nan_allowed(&mut self, nan_allowed: f64) {
        let normalized = normalize_nan_allowed(nan_allowed);
        if normalized == self.nan_allowed {
            return;
        }
        self.nan_allowed = normalized;
        self.retile();
    }

    /// Set the tile size bounds in meters and re-tile
    ///
    /// A swapped pair is reordered with a warning, a negative minimum is
    /// clamped to 0, and non-finite bounds are rejected.
    pub fn set_tile_size_lim(&mut self, tile_size_lim: (f64, f64)) {
        if !tile_size_lim.0.is_finite() || !tile_size_lim.1.is_finite() {
            tracing::warn!(?tile_size_lim, "Rejecting non-finite tile size bounds");
            return;
        }
        let normalized = normalize_tile_size_lim(tile_size_lim);
        if normalized == self.tile_size_lim {
            return;
        }
        self.tile_size_lim = normalized;
        self.retile();
    }

    /// Leaf tiles of the current tiling, surviving the NaN gate
    #[inline]
    pub fn leaves(&self) -> &[TileNode] {
        &self.leaves
    }

    /// Number of surviving leaves
    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Summary of the current tiling
    pub fn reduction(&self) -> QuadtreeReduction {
        let leaf_count = self.leaves.len();
        let mean_tile_size = if leaf_count > 0 {
            self.leaves.iter().map(TileNode::size).sum::<f64>() / leaf_count as f64
        } else {
            0.0
        };
        let samples = (self.frame.rows * self.frame.cols) as f64;
        QuadtreeReduction {
            leaf_count,
            discarded_nan_leaves: self.discarded_nan_leaves,
            mean_tile_size,
            reduction_factor: if leaf_count > 0 {
                samples / leaf_count as f64
            } else {
                0.0
            },
        }
    }

    /// Rebuild the leaf set for the current parameters, consulting the cache
    fn retile(&mut self) {
        #[cfg(feature = "profiling")]
        profiling::scope!("quadtree::retile");

        let key = TilingCacheKey {
            epsilon_bits: self.epsilon.to_bits(),
            nan_allowed_bits: self.nan_allowed.to_bits(),
            tile_min_bits: self.tile_size_lim.0.to_bits(),
            tile_max_bits: self.tile_size_lim.1.to_bits(),
        };

        let cached = {
            let cache = self.tiling_cache.read().unwrap();
            cache.get(&key).cloned()
        };

        if let Some(hit) = cached {
            self.leaves = hit.leaves;
            self.discarded_nan_leaves = hit.discarded;
            return;
        }

        let (leaves, discarded) = self.tile();
        let leaves = Arc::new(leaves);
        {
            let mut cache = self.tiling_cache.write().unwrap();
            cache.insert(
                key,
                CachedTiling {
                    leaves: leaves.clone(),
                    discarded,
                },
            );
        }

        tracing::debug!(
            epsilon = self.epsilon,
            nan_allowed = self.nan_allowed,
            leaves = leaves.len(),
            discarded,
            "Re-tiled quadtree"
        );
        self.leaves = leaves;
        self.discarded_nan_leaves = discarded;
    }

    /// Compute the full tiling for the current parameters
    fn tile(&self) -> (Vec<TileNode>, usize) {
        let root = NodeExtent {
            row0: 0,
            col0: 0,
            rows: self.frame.rows,
            cols: self.frame.cols,
            depth: 0,
        };

        let root_stats = self.node_stats(root);
        if !self.should_split(root, &root_stats) {
            return self.accept_leaf(root, &root_stats);
        }

        // First subdivision level runs in parallel, each subtree is sequential.
        let results: Vec<(Vec<TileNode>, usize)> = children_of(root)
            .into_par_iter()
            .map(|child| {
                let mut leaves = Vec::new();
                let mut discarded = 0;
                self.collect_leaves(child, &mut leaves, &mut discarded);
                (leaves, discarded)
            })
            .collect();

        let mut leaves = Vec::new();
        let mut discarded = 0;
        for (mut child_leaves, child_discarded) in results {
            leaves.append(&mut child_leaves);
            discarded += child_discarded;
        }
        (leaves, discarded)
    }

    /// Recursively subdivide a node, appending surviving leaves
    fn collect_leaves(&self, ext: NodeExtent, out: &mut Vec<TileNode>, discarded: &mut usize) {
        let stats = self.node_stats(ext);
        if self.should_split(ext, &stats) {
            for child in children_of(ext) {
                self.collect_leaves(child, out, discarded);
            }
        } else {
            let (mut leaves, d) = self.accept_leaf(ext, &stats);
            out.append(&mut leaves);
            *discarded += d;
        }
    }

    /// Apply the NaN gate to a finished leaf
    fn accept_leaf(&self, ext: NodeExtent, stats: &NodeStats) -> (Vec<TileNode>, usize) {
        if stats.nan_fraction > self.nan_allowed {
            return (Vec::new(), 1);
        }
        (vec![self.make_leaf(ext, stats)], 0)
    }

    /// Subdivision criterion
    fn should_split(&self, ext: NodeExtent, stats: &NodeStats) -> bool {
        if ext.depth >= MAX_DEPTH || (ext.rows < 2 && ext.cols < 2) {
            return false;
        }

        let size = self.node_size(ext);
        let (min_size, max_size) = self.tile_size_lim;

        // Oversized tiles are always subdivided, along whichever axes still span
        // at least 2 pixels.
        if size > max_size {
            return true;
        }
        // Error refinement quarters the node; single-pixel axes stay as they are.
        if ext.rows < 2 || ext.cols < 2 {
            return false;
        }
        // Children are floor-halved in pixels. Never produce one below the
        // lower bound.
        if min_size > 0.0 && self.smallest_child_size(ext) < min_size {
            return false;
        }

        stats.finite_count >= 2 && stats.error > self.epsilon
    }

    /// Edge length of a node in meters (longer edge)
    #[inline]
    fn node_size(&self, ext: NodeExtent) -> f64 {
        let width = ext.cols as f64 * self.frame.d_east;
        let height = ext.rows as f64 * self.frame.d_north;
        width.max(height)
    }

    /// Edge length of the smallest child a split would produce, in meters
    ///
    /// Odd pixel extents halve unevenly, so this is the floor-halved child,
    /// strictly smaller than half the node for odd extents.
    #[inline]
    fn smallest_child_size(&self, ext: NodeExtent) -> f64 {
        let width = (ext.cols / 2) as f64 * self.frame.d_east;
        let height = (ext.rows / 2) as f64 * self.frame.d_north;
        width.max(height)
    }

    /// One-pass NaN-aware statistics over a node (Welford)
    fn node_stats(&self, ext: NodeExtent) -> NodeStats {
        let view = self.data.slice(s![
            ext.row0..ext.row0 + ext.rows,
            ext.col0..ext.col0 + ext.cols
        ]);

        let mut count = 0usize;
        let mut mean = 0.0;
        let mut m2 = 0.0;
        let total = view.len();

        for &value in view.iter() {
            if !value.is_finite() {
                continue;
            }
            count += 1;
            let delta = value - mean;
            mean += delta / count as f64;
            m2 += delta * (value - mean);
        }

        let error = if count >= 2 {
            (m2 / count as f64).sqrt()
        } else {
            0.0
        };

        NodeStats {
            finite_count: count,
            mean: if count > 0 { mean } else { f64::NAN },
            error,
            nan_fraction: if total > 0 {
                (total - count) as f64 / total as f64
            } else {
                1.0
            },
        }
    }

    /// Build the leaf record for a finished node
    fn make_leaf(&self, ext: NodeExtent, stats: &NodeStats) -> TileNode {
        let (easting, northing) = self.frame.pixel_to_local(ext.row0, ext.col0);
        TileNode {
            row0: ext.row0,
            col0: ext.col0,
            rows: ext.rows,
            cols: ext.cols,
            depth: ext.depth,
            mean: stats.mean,
            median: self.node_median(ext, stats),
            error: stats.error,
            nan_fraction: stats.nan_fraction,
            easting,
            northing,
            width: ext.cols as f64 * self.frame.d_east,
            height: ext.rows as f64 * self.frame.d_north,
        }
    }

    /// Median of the finite samples of a node
    fn node_median(&self, ext: NodeExtent, stats: &NodeStats) -> f64 {
        if stats.finite_count == 0 {
            return f64::NAN;
        }
        let view = self.data.slice(s![
            ext.row0..ext.row0 + ext.rows,
            ext.col0..ext.col0 + ext.cols
        ]);
        let mut values: Vec<f64> = view.iter().copied().filter(|v| v.is_finite()).collect();
        values.sort_unstable_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 1 {
            values[mid]
        } else {
            (values[mid - 1] + values[mid]) / 2.0
        }
    }

    /// Estimate the initial epsilon as the mean error of a uniform base tiling
    fn estimate_epsilon_init(data: &Arc<Array2<f64>>, frame: Frame) -> f64 {
        let root = NodeExtent {
            row0: 0,
            col0: 0,
            rows: frame.rows,
            cols: frame.cols,
            depth: 0,
        };

        let mut base_tiles = vec![root];
        for _ in 0..INIT_DEPTH {
            let mut next = Vec::with_capacity(base_tiles.len() * 4);
            for ext in &base_tiles {
                if ext.rows >= 2 && ext.cols >= 2 {
                    next.extend(children_of(*ext));
                } else {
                    next.push(*ext);
                }
            }
            base_tiles = next;
        }

        let probe = Self {
            data: data.clone(),
            frame,
            epsilon: 0.0,
            epsilon_init: 0.0,
            epsilon_min: 0.0,
            nan_allowed: 1.0,
            tile_size_lim: (0.0, f64::INFINITY),
            leaves: Arc::new(Vec::new()),
            discarded_nan_leaves: 0,
            tiling_cache: RwLock::new(HashMap::new()),
        };

        let errors: Vec<f64> = base_tiles
            .iter()
            .map(|ext| probe.node_stats(*ext))
            .filter(|stats| stats.finite_count >= 2)
            .map(|stats| stats.error)
            .collect();

        if errors.is_empty() {
            return 1.0;
        }
        let mean = errors.iter().sum::<f64>() / errors.len() as f64;
        if mean.is_finite() && mean > 0.0 { mean } else { 1.0 }
    }
}

/// Split a node into children, halving every axis spanning at least 2 pixels
///
/// Yields 4 children for a regular node and 2 for a single-row or
/// single-column node.
fn children_of(ext: NodeExtent) -> Vec<NodeExtent> {
    let depth = ext.depth + 1;

    let row_splits: Vec<(usize, usize)> = if ext.rows >= 2 {
        let half = ext.rows / 2;
        vec![(ext.row0, half), (ext.row0 + half, ext.rows - half)]
    } else {
        vec![(ext.row0, ext.rows)]
    };
    let col_splits: Vec<(usize, usize)> = if ext.cols >= 2 {
        let half = ext.cols / 2;
        vec![(ext.col0, half), (ext.col0 + half, ext.cols - half)]
    } else {
        vec![(ext.col0, ext.cols)]
    };

    let mut children = Vec::with_capacity(row_splits.len() * col_splits.len());
    for &(row0, rows) in &row_splits {
        for &(col0, cols) in &col_splits {
            children.push(NodeExtent {
                row0,
                col0,
                rows,
                cols,
                depth,
            });
        }
    }
    children
}

/// Normalize the NaN gate threshold; out-of-range values disable the gate
fn normalize_nan_allowed(nan_allowed: f64) -> f64 {
    if nan_allowed.is_finite() && nan_allowed > 0.0 && nan_allowed <= 1.0 {
        nan_allowed
    } else {
        tracing::warn!(
            nan_allowed,
            "nan_allowed outside (0, 1], disabling the NaN gate"
        );
        1.0
    }
}

/// Normalize the tile size bounds; swapped pairs are reordered
fn normalize_tile_size_lim(tile_size_lim: (f64, f64)) -> (f64, f64) {
    let (mut min, mut max) = tile_size_lim;
    if min < 0.0 {
        tracing::warn!(min, "Negative tile size minimum, clamping to 0");
        min = 0.0;
    }
    if min > max {
        tracing::warn!(min, max, "tile_size_lim bounds swapped, reordering");
        std::mem::swap(&mut min, &mut max);
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Smooth test raster with a single central bump
    fn gauss_raster(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            let y = (r as f64 - rows as f64 / 2.0) / (rows as f64 / 4.0);
            let x = (c as f64 - cols as f64 / 2.0) / (cols as f64 / 4.0);
            (-(x * x + y * y)).exp()
        })
    }

    fn build(data: Array2<f64>, config: &QuadtreeConfig) -> Quadtree {
        let (rows, cols) = data.dim();
        let frame = Frame::new(rows, cols, 30.0, 30.0).unwrap();
        Quadtree::new(Arc::new(data), frame, config)
    }

    #[test]
    fn test_config_default() {
        let config = QuadtreeConfig::default();
        assert!(config.epsilon.is_none());
        assert_eq!(config.nan_allowed, 0.9);
        assert_eq!(config.tile_size_lim, (250.0, 5000.0));
    }

    #[test]
    fn test_build_covers_raster() {
        let quadtree = build(
            gauss_raster(64, 64),
            &QuadtreeConfig {
                nan_allowed: 1.0,
                tile_size_lim: (0.0, 5000.0),
                ..QuadtreeConfig::default()
            },
        );

        assert!(quadtree.leaf_count() > 0);
        let covered: usize = quadtree.leaves().iter().map(|l| l.rows * l.cols).sum();
        assert_eq!(covered, 64 * 64, "leaves must partition the raster");
    }

    #[test]
    fn test_epsilon_sweep_does_not_fail() {
        let mut quadtree = build(gauss_raster(64, 64), &QuadtreeConfig::default());

        // Sweep mirrors the observed consumer contract: wide monotone sweeps
        // must leave the tree usable after every set.
        for i in 0..30 {
            let epsilon = 0.118 + (0.2 - 0.118) * i as f64 / 29.0;
            quadtree.set_epsilon(epsilon);
            let _ = quadtree.leaves();
        }
    }

    #[test]
    fn test_nan_allowed_sweep_does_not_fail() {
        let mut quadtree = build(gauss_raster(64, 64), &QuadtreeConfig::default());
        for i in 0..30 {
            let nan_allowed = 0.1 + 0.9 * i as f64 / 29.0;
            quadtree.set_nan_allowed(nan_allowed);
            let _ = quadtree.leaves();
        }
    }

    #[test]
    fn test_tile_size_lim_sweep_does_not_fail() {
        let mut quadtree = build(gauss_raster(64, 64), &QuadtreeConfig::default());
        for i in 0..30 {
            let min = 100.0 + (4000.0 - 100.0) * i as f64 / 29.0;
            quadtree.set_tile_size_lim((min, 5000.0));
            quadtree.set_tile_size_lim((0.0, 5000.0));
        }
        assert!(quadtree.leaf_count() > 0);
    }

    #[test]
    fn test_smaller_epsilon_never_reduces_leaf_count() {
        let mut quadtree = build(
            gauss_raster(128, 128),
            &QuadtreeConfig {
                tile_size_lim: (0.0, 10000.0),
                ..QuadtreeConfig::default()
            },
        );

        let start = quadtree.epsilon_init();
        let mut previous = 0usize;
        for i in 0..10 {
            let epsilon = start * (1.0 - 0.08 * i as f64).max(0.15);
            quadtree.set_epsilon(epsilon);
            let count = quadtree.leaf_count();
            assert!(
                count >= previous,
                "leaf count decreased from {previous} to {count} at epsilon {epsilon}"
            );
            previous = count;
        }
    }

    #[test]
    fn test_tile_size_bounds_respected() {
        let mut quadtree = build(
            gauss_raster(128, 128),
            &QuadtreeConfig {
                tile_size_lim: (0.0, 10000.0),
                ..QuadtreeConfig::default()
            },
        );
        // 128 x 30 m = 3840 m raster extent
        quadtree.set_tile_size_lim((500.0, 1000.0));

        for leaf in quadtree.leaves() {
            assert!(leaf.size() <= 1000.0, "leaf of {} m above max", leaf.size());
            assert!(leaf.size() >= 500.0, "leaf of {} m below min", leaf.size());
        }
    }

    #[test]
    fn test_min_bound_respected_with_odd_extents() {
        // 5 x 100 m = 500 m raster; halving yields a floor-halved 200 m child,
        // below the 220 m minimum even though 500 / 2 = 250 is not.
        let frame = Frame::new(5, 5, 100.0, 100.0).unwrap();
        let mut quadtree = Quadtree::new(
            Arc::new(gauss_raster(5, 5)),
            frame,
            &QuadtreeConfig {
                nan_allowed: 1.0,
                tile_size_lim: (220.0, 10000.0),
                ..QuadtreeConfig::default()
            },
        );
        quadtree.set_epsilon(quadtree.epsilon_min());

        for leaf in quadtree.leaves() {
            assert!(leaf.size() >= 220.0, "leaf of {} m below min", leaf.size());
        }
    }

    #[test]
    fn test_max_bound_splits_single_row_raster() {
        // A 1 x 200 raster at 30 m spans 6000 m; the max bound still applies
        // even though the node can only be halved along one axis.
        let quadtree = build(
            gauss_raster(1, 200),
            &QuadtreeConfig {
                nan_allowed: 1.0,
                tile_size_lim: (0.0, 5000.0),
                ..QuadtreeConfig::default()
            },
        );

        assert!(quadtree.leaf_count() >= 2);
        let covered: usize = quadtree.leaves().iter().map(|l| l.rows * l.cols).sum();
        assert_eq!(covered, 200, "leaves must partition the raster");
        for leaf in quadtree.leaves() {
            assert!(leaf.size() <= 5000.0, "leaf of {} m above max", leaf.size());
        }
    }

    #[test]
    fn test_nan_gate_discards_leaves() {
        let mut data = gauss_raster(64, 64);
        // Invalidate one corner of the raster
        data.slice_mut(s![0..16, 0..16]).fill(f64::NAN);

        let mut quadtree = build(
            data,
            &QuadtreeConfig {
                nan_allowed: 1.0,
                tile_size_lim: (0.0, 5000.0),
                ..QuadtreeConfig::default()
            },
        );
        let ungated = quadtree.leaf_count();
        assert_eq!(quadtree.reduction().discarded_nan_leaves, 0);

        quadtree.set_nan_allowed(0.1);
        assert!(quadtree.leaf_count() < ungated);
        assert!(quadtree.reduction().discarded_nan_leaves > 0);
        for leaf in quadtree.leaves() {
            assert!(leaf.nan_fraction <= 0.1);
        }
    }

    #[test]
    fn test_epsilon_below_floor_rejected() {
        let mut quadtree = build(gauss_raster(64, 64), &QuadtreeConfig::default());
        let before = quadtree.epsilon();
        let before_leaves = quadtree.leaf_count();

        quadtree.set_epsilon(quadtree.epsilon_min() / 2.0);
        assert_eq!(quadtree.epsilon(), before);
        assert_eq!(quadtree.leaf_count(), before_leaves);

        quadtree.set_epsilon(f64::NAN);
        assert_eq!(quadtree.epsilon(), before);
    }

    #[test]
    fn test_nan_allowed_out_of_range_disables_gate() {
        let mut quadtree = build(gauss_raster(64, 64), &QuadtreeConfig::default());
        quadtree.set_nan_allowed(-3.0);
        assert_eq!(quadtree.nan_allowed(), 1.0);
        quadtree.set_nan_allowed(7.5);
        assert_eq!(quadtree.nan_allowed(), 1.0);
    }

    #[test]
    fn test_swapped_tile_size_lim_reordered() {
        let mut quadtree = build(gauss_raster(64, 64), &QuadtreeConfig::default());
        quadtree.set_tile_size_lim((5000.0, 100.0));
        assert_eq!(quadtree.tile_size_lim(), (100.0, 5000.0));
    }

    #[test]
    fn test_tiling_cache_reuses_leaf_sets() {
        let mut quadtree = build(
            gauss_raster(64, 64),
            &QuadtreeConfig {
                tile_size_lim: (0.0, 5000.0),
                ..QuadtreeConfig::default()
            },
        );
        let epsilon_a = quadtree.epsilon_init() * 0.8;
        let epsilon_b = quadtree.epsilon_init() * 0.5;

        quadtree.set_epsilon(epsilon_a);
        let first = Arc::as_ptr(&quadtree.leaves);

        quadtree.set_epsilon(epsilon_b);
        quadtree.set_epsilon(epsilon_a);
        let second = Arc::as_ptr(&quadtree.leaves);

        assert_eq!(first, second, "revisited configuration should hit the cache");
    }

    #[test]
    fn test_constant_raster_single_leaf() {
        let data = Array2::from_elem((64, 64), 0.5);
        let quadtree = build(
            data,
            &QuadtreeConfig {
                epsilon: Some(1.0),
                nan_allowed: 1.0,
                tile_size_lim: (0.0, 10000.0),
            },
        );
        // Zero variance everywhere, nothing to refine
        assert_eq!(quadtree.leaf_count(), 1);
        let leaf = &quadtree.leaves()[0];
        assert_eq!(leaf.mean, 0.5);
        assert_eq!(leaf.median, 0.5);
        assert_eq!(leaf.error, 0.0);
    }

    #[test]
    fn test_leaf_geometry() {
        let quadtree = build(
            gauss_raster(64, 64),
            &QuadtreeConfig {
                nan_allowed: 1.0,
                tile_size_lim: (0.0, 5000.0),
                ..QuadtreeConfig::default()
            },
        );
        for leaf in quadtree.leaves() {
            assert_eq!(leaf.width, leaf.cols as f64 * 30.0);
            assert_eq!(leaf.height, leaf.rows as f64 * 30.0);
            let (fx, fy) = leaf.focal_point();
            assert!(fx > leaf.easting && fx < leaf.easting + leaf.width);
            assert!(fy > leaf.northing && fy < leaf.northing + leaf.height);
        }
    }

    #[test]
    fn test_reduction_summary() {
        let quadtree = build(
            gauss_raster(64, 64),
            &QuadtreeConfig {
                tile_size_lim: (0.0, 5000.0),
                ..QuadtreeConfig::default()
            },
        );
        let reduction = quadtree.reduction();
        assert_eq!(reduction.leaf_count, quadtree.leaf_count());
        assert!(reduction.mean_tile_size > 0.0);
        assert!(reduction.reduction_factor >= 1.0);
    }
}
