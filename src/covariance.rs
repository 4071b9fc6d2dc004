//! Covariance - subsampled noise statistics of the displacement raster
//!
//! Estimates scene-wide noise variance and an isotropic empirical structure
//! function from a subsampled grid of the displacement component. Pair
//! selection is deterministic (strided offsets), so results are reproducible
//! without an RNG. Results are cached and invalidated when the subsampling
//! factor changes.

use crate::Frame;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Number of distance bins for the structure function
const STRUCTURE_BINS: usize = 32;

/// Tuning parameters for the covariance estimator
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CovarianceConfig {
    /// Take every n-th pixel in both raster dimensions. 0 is normalized to 1.
    pub subsampling: usize,
}

impl Default for CovarianceConfig {
    fn default() -> Self {
        Self { subsampling: 8 }
    }
}

/// Distance-binned empirical structure function
///
/// `values[i]` is the mean of `0.5 * (v_a - v_b)^2` over sample pairs whose
/// separation falls into the bin centered at `distances[i]` (meters).
/// Empty bins are omitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureFunction {
    /// Bin center distances in meters, ascending
    pub distances: Vec<f64>,
    /// Mean semivariance per bin
    pub values: Vec<f64>,
}

#[derive(Clone, Debug)]
struct CovarianceResult {
    variance: f64,
    structure: StructureFunction,
}

/// Noise statistics estimator over a single displacement raster
pub struct Covariance {
    data: Arc<Array2<f64>>,
    frame: Frame,
    subsampling: usize,
    cached: Option<CovarianceResult>,
}

impl std::fmt::Debug for Covariance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Covariance")
            .field("frame", &self.frame)
            .field("subsampling", &self.subsampling)
            .field("computed", &self.cached.is_some())
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Covariance {
    /// Create a covariance estimator for a raster
    pub fn new(data: Arc<Array2<f64>>, frame: Frame, config: &CovarianceConfig) -> Self {
        Self {
            data,
            frame,
            subsampling: normalize_subsampling(config.subsampling),
            cached: None,
        }
    }

    /// Current subsampling factor
    #[inline]
    pub fn subsampling(&self) -> usize {
        self.subsampling
    }

    /// Effective configuration after normalization
    pub fn config(&self) -> CovarianceConfig {
        CovarianceConfig {
            subsampling: self.subsampling,
        }
    }

    /// Set the subsampling factor, invalidating cached results
    pub fn set_subsampling(&mut self, subsampling: usize) {
        let normalized = normalize_subsampling(subsampling);
        if normalized == self.subsampling {
            return;
        }
        self.subsampling = normalized;
        self.cached = None;
    }

    /// Scene-wide noise variance estimate
    ///
    /// NaN when fewer than two finite subsampled samples exist.
    pub fn variance(&mut self) -> f64 {
        self.result().variance
    }

    /// Empirical structure function over subsampled pixel pairs
    pub fn structure_function(&mut self) -> &StructureFunction {
        &self.result().structure
    }

    fn result(&mut self) -> &CovarianceResult {
        if self.cached.is_none() {
            self.cached = Some(self.compute());
        }
        self.cached.as_ref().unwrap()
    }

    fn compute(&self) -> CovarianceResult {
        #[cfg(feature = "profiling")]
        profiling::scope!("covariance::compute");

        // Subsampled finite samples with their metric positions
        let mut samples: Vec<(f64, f64, f64)> = Vec::new();
        for row in (0..self.frame.rows).step_by(self.subsampling) {
            for col in (0..self.frame.cols).step_by(self.subsampling) {
                let value = self.data[(row, col)];
                if value.is_finite() {
                    let (easting, northing) = self.frame.pixel_to_local(row, col);
                    samples.push((easting, northing, value));
                }
            }
        }

        if samples.len() < 2 {
            tracing::warn!(
                subsampling = self.subsampling,
                samples = samples.len(),
                "Too few finite samples for covariance estimation"
            );
            return CovarianceResult {
                variance: f64::NAN,
                structure: StructureFunction::default(),
            };
        }

        let n = samples.len();
        let mean = samples.iter().map(|s| s.2).sum::<f64>() / n as f64;
        let variance =
            samples.iter().map(|s| (s.2 - mean).powi(2)).sum::<f64>() / (n - 1) as f64;

        // Deterministic pair selection: strided offsets, doubled each round.
        let offsets: Vec<usize> = std::iter::successors(Some(1usize), |&k| Some(k * 2))
            .take_while(|&k| k < n)
            .collect();

        let pairs: Vec<(f64, f64)> = offsets
            .par_iter()
            .flat_map_iter(|&offset| {
                samples[..n - offset].iter().zip(samples[offset..].iter()).map(
                    |(a, b)| {
                        let distance = (a.0 - b.0).hypot(a.1 - b.1);
                        let semivariance = 0.5 * (a.2 - b.2).powi(2);
                        (distance, semivariance)
                    },
                )
            })
            .collect();

        let max_distance = pairs
            .iter()
            .map(|p| p.0)
            .fold(0.0_f64, f64::max);
        if max_distance <= 0.0 {
            return CovarianceResult {
                variance,
                structure: StructureFunction::default(),
            };
        }

        let bin_width = max_distance / STRUCTURE_BINS as f64;
        let mut sums = vec![0.0; STRUCTURE_BINS];
        let mut counts = vec![0usize; STRUCTURE_BINS];
        for (distance, semivariance) in pairs {
            let bin = ((distance / bin_width) as usize).min(STRUCTURE_BINS - 1);
            sums[bin] += semivariance;
            counts[bin] += 1;
        }

        let mut structure = StructureFunction::default();
        for bin in 0..STRUCTURE_BINS {
            if counts[bin] > 0 {
                structure
                    .distances
                    .push((bin as f64 + 0.5) * bin_width);
                structure.values.push(sums[bin] / counts[bin] as f64);
            }
        }

        CovarianceResult {
            variance,
            structure,
        }
    }
}

/// A subsampling factor of 0 would never advance the scan
fn normalize_subsampling(subsampling: usize) -> usize {
    if subsampling == 0 {
        tracing::warn!("subsampling of 0 normalized to 1");
        1
    } else {
        subsampling
    }
}
