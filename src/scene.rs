//! Scene - displacement components on a common frame, with persistence
//!
//! A scene owns four raster components (north, east, down ground displacement
//! and the line-of-sight displacement) sharing one [`Frame`], plus the tuning
//! configurations for the quadtree and covariance subsystems. Components are
//! immutable after construction; the quadtree and covariance are built lazily
//! on first access.
//!
//! On disk a scene is a directory holding two JSON files: `scene.json` with
//! frame, metadata and configurations, and `components.json` with the raster
//! samples (NaN encoded as `null`).

use crate::{
    Covariance, CovarianceConfig, Frame, Quadtree, QuadtreeConfig, Result, SceneError,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

const MANIFEST_FILE: &str = "scene.json";
const COMPONENTS_FILE: &str = "components.json";

/// Free-form scene metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneMeta {
    /// Human-readable scene title
    pub title: String,
}

/// Serialized manifest: everything except the raster samples
#[derive(Serialize, Deserialize)]
struct SceneManifest {
    meta: SceneMeta,
    frame: Frame,
    quadtree: QuadtreeConfig,
    covariance: CovarianceConfig,
}

/// Serialized raster components; NaN samples are encoded as `null`
#[derive(Serialize, Deserialize)]
struct SceneComponents {
    rows: usize,
    cols: usize,
    north: Vec<Option<f64>>,
    east: Vec<Option<f64>>,
    down: Vec<Option<f64>>,
    displacement: Vec<Option<f64>>,
}

/// A surface displacement scene
pub struct Scene {
    frame: Frame,
    meta: SceneMeta,
    north: Arc<Array2<f64>>,
    east: Arc<Array2<f64>>,
    down: Arc<Array2<f64>>,
    displacement: Arc<Array2<f64>>,
    quadtree_config: QuadtreeConfig,
    covariance_config: CovarianceConfig,
    quadtree: Option<Quadtree>,
    covariance: Option<Covariance>,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("frame", &self.frame)
            .field("meta", &self.meta)
            .field("quadtree_config", &self.quadtree_config)
            .field("covariance_config", &self.covariance_config)
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Scene {
    /// Create a scene from four components sharing a frame
    ///
    /// All components must match the frame's shape and the displacement
    /// component must contain at least one finite sample.
    pub fn new(
        frame: Frame,
        north: Array2<f64>,
        east: Array2<f64>,
        down: Array2<f64>,
        displacement: Array2<f64>,
        meta: SceneMeta,
    ) -> Result<Self> {
        let expected = (frame.rows, frame.cols);
        for (name, component) in [
            ("north", &north),
            ("east", &east),
            ("down", &down),
            ("displacement", &displacement),
        ] {
            if component.dim() != expected {
                return Err(SceneError::ShapeMismatch {
                    reason: format!(
                        "component {name} is {:?}, frame is {expected:?}",
                        component.dim()
                    ),
                });
            }
        }
        if !displacement.iter().any(|v| v.is_finite()) {
            return Err(SceneError::EmptyScene);
        }

        Ok(Self {
            frame,
            meta,
            north: Arc::new(north),
            east: Arc::new(east),
            down: Arc::new(down),
            displacement: Arc::new(displacement),
            quadtree_config: QuadtreeConfig::default(),
            covariance_config: CovarianceConfig::default(),
            quadtree: None,
            covariance: None,
        })
    }

    /// Frame of all components
    #[inline]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Scene metadata
    #[inline]
    pub fn meta(&self) -> &SceneMeta {
        &self.meta
    }

    /// Mutable scene metadata
    #[inline]
    pub fn meta_mut(&mut self) -> &mut SceneMeta {
        &mut self.meta
    }

    /// North displacement component
    #[inline]
    pub fn north(&self) -> &Array2<f64> {
        &self.north
    }

    /// East displacement component
    #[inline]
    pub fn east(&self) -> &Array2<f64> {
        &self.east
    }

    /// Down displacement component
    #[inline]
    pub fn down(&self) -> &Array2<f64> {
        &self.down
    }

    /// Line-of-sight displacement component
    #[inline]
    pub fn displacement(&self) -> &Array2<f64> {
        &self.displacement
    }

    /// Shared handle to one component's raster
    pub(crate) fn component_arc(&self, kind: crate::ComponentKind) -> Arc<Array2<f64>> {
        match kind {
            crate::ComponentKind::North => self.north.clone(),
            crate::ComponentKind::East => self.east.clone(),
            crate::ComponentKind::Down => self.down.clone(),
            crate::ComponentKind::Los => self.displacement.clone(),
        }
    }

    /// Quadtree over the displacement component, built on first access
    ///
    /// Parameter changes go through the returned reference; the effective
    /// configuration is picked up again when the scene is saved.
    pub fn quadtree(&mut self) -> &mut Quadtree {
        if self.quadtree.is_none() {
            self.quadtree = Some(Quadtree::new(
                self.displacement.clone(),
                self.frame,
                &self.quadtree_config,
            ));
        }
        self.quadtree.as_mut().unwrap()
    }

    /// Covariance estimator over the displacement component, built on first access
    pub fn covariance(&mut self) -> &mut Covariance {
        if self.covariance.is_none() {
            self.covariance = Some(Covariance::new(
                self.displacement.clone(),
                self.frame,
                &self.covariance_config,
            ));
        }
        self.covariance.as_mut().unwrap()
    }

    /// Effective quadtree configuration (post-normalization if built)
    pub fn quadtree_config(&self) -> QuadtreeConfig {
        self.quadtree
            .as_ref()
            .map(Quadtree::config)
            .unwrap_or(self.quadtree_config)
    }

    /// Effective covariance configuration
    pub fn covariance_config(&self) -> CovarianceConfig {
        self.covariance
            .as_ref()
            .map(Covariance::config)
            .unwrap_or(self.covariance_config)
    }

    /// Persist the scene into the directory `path`
    ///
    /// The directory is created if missing; existing scene files inside it
    /// are overwritten.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("scene::save");

        let dir = path.as_ref();
        std::fs::create_dir_all(dir)?;

        let manifest = SceneManifest {
            meta: self.meta.clone(),
            frame: self.frame,
            quadtree: self.quadtree_config(),
            covariance: self.covariance_config(),
        };
        let writer = BufWriter::new(File::create(dir.join(MANIFEST_FILE))?);
        serde_json::to_writer_pretty(writer, &manifest)?;

        let components = SceneComponents {
            rows: self.frame.rows,
            cols: self.frame.cols,
            north: encode_component(&self.north),
            east: encode_component(&self.east),
            down: encode_component(&self.down),
            displacement: encode_component(&self.displacement),
        };
        let writer = BufWriter::new(File::create(dir.join(COMPONENTS_FILE))?);
        serde_json::to_writer(writer, &components)?;

        tracing::debug!(path = %dir.display(), "Saved scene");
        Ok(())
    }

    /// Load a scene previously written by [`Scene::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("scene::load");

        let dir = path.as_ref();
        let reader = BufReader::new(File::open(dir.join(MANIFEST_FILE))?);
        let manifest: SceneManifest = serde_json::from_reader(reader)?;

        let reader = BufReader::new(File::open(dir.join(COMPONENTS_FILE))?);
        let components: SceneComponents = serde_json::from_reader(reader)?;

        if (components.rows, components.cols) != (manifest.frame.rows, manifest.frame.cols) {
            return Err(SceneError::ShapeMismatch {
                reason: format!(
                    "components are {}x{}, frame is {}x{}",
                    components.rows, components.cols, manifest.frame.rows, manifest.frame.cols
                ),
            });
        }

        let shape = (components.rows, components.cols);
        let mut scene = Self::new(
            manifest.frame,
            decode_component(components.north, shape)?,
            decode_component(components.east, shape)?,
            decode_component(components.down, shape)?,
            decode_component(components.displacement, shape)?,
            manifest.meta,
        )?;
        scene.quadtree_config = manifest.quadtree;
        scene.covariance_config = manifest.covariance;
        Ok(scene)
    }

    /// Deterministic synthetic test scene
    ///
    /// Superposes two Gaussian surface deformation bumps, derives the
    /// horizontal components and a line-of-sight projection from a fixed
    /// satellite geometry, and masks one corner as a data gap.
    pub fn synthetic_gauss(rows: usize, cols: usize) -> Result<Self> {
        let frame = Frame::new(rows, cols, 30.0, 30.0)?;

        let gauss = |r: usize, c: usize, cr: f64, cc: f64, sigma: f64, amplitude: f64| {
            let dy = (r as f64 - rows as f64 * cr) / (rows as f64 * sigma);
            let dx = (c as f64 - cols as f64 * cc) / (cols as f64 * sigma);
            amplitude * (-(dx * dx + dy * dy)).exp()
        };

        let down = Array2::from_shape_fn((rows, cols), |(r, c)| {
            gauss(r, c, 0.45, 0.4, 0.18, 0.8) + gauss(r, c, 0.7, 0.65, 0.1, -0.3)
        });
        let north = down.mapv(|d| 0.25 * d);
        let east = down.mapv(|d| -0.15 * d);

        // Fixed line-of-sight unit vector (descending-orbit geometry)
        const UNIT_NORTH: f64 = 0.16;
        const UNIT_EAST: f64 = -0.35;
        const UNIT_DOWN: f64 = 0.92;

        let mut displacement = Array2::from_shape_fn((rows, cols), |(r, c)| {
            UNIT_NORTH * north[(r, c)] + UNIT_EAST * east[(r, c)] + UNIT_DOWN * down[(r, c)]
        });

        // Data gap in the south-west corner
        let gap_rows = (rows / 8).max(1);
        let gap_cols = (cols / 8).max(1);
        displacement
            .slice_mut(ndarray::s![0..gap_rows, 0..gap_cols])
            .fill(f64::NAN);

        Self::new(
            frame,
            north,
            east,
            down,
            displacement,
            SceneMeta {
                title: "Synthetic Gauss".to_string(),
            },
        )
    }
}

/// Encode a raster for JSON, mapping non-finite samples to `null`
fn encode_component(data: &Array2<f64>) -> Vec<Option<f64>> {
    data.iter()
        .map(|&v| if v.is_finite() { Some(v) } else { None })
        .collect()
}

/// Decode a raster from JSON, mapping `null` back to NaN
fn decode_component(values: Vec<Option<f64>>, shape: (usize, usize)) -> Result<Array2<f64>> {
    let flat: Vec<f64> = values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    Array2::from_shape_vec(shape, flat).map_err(|e| SceneError::ShapeMismatch {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// Removes the directory on drop, whether or not the test body succeeded
    struct TempDir(PathBuf);

    impl TempDir {
        fn new(tag: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "displacement-scene-{tag}-{}",
                std::process::id()
            ));
            Self(path)
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn test_synthetic_gauss() {
        let scene = Scene::synthetic_gauss(64, 64).unwrap();
        assert_eq!(scene.frame().rows, 64);
        assert_eq!(scene.frame().cols, 64);
        assert_eq!(scene.meta().title, "Synthetic Gauss");

        // Corner gap is NaN, the rest carries signal
        assert!(scene.displacement()[(0, 0)].is_nan());
        assert!(scene.displacement().iter().any(|v| v.is_finite()));
        let peak = scene
            .down()
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(peak > 0.5);
    }

    #[test]
    fn test_shape_mismatch_fails() {
        let frame = Frame::new(10, 10, 30.0, 30.0).unwrap();
        let good = Array2::zeros((10, 10));
        let bad = Array2::zeros((10, 9));
        let result = Scene::new(
            frame,
            good.clone(),
            good.clone(),
            bad,
            good.clone(),
            SceneMeta::default(),
        );
        assert!(matches!(result, Err(SceneError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_all_nan_displacement_fails() {
        let frame = Frame::new(4, 4, 30.0, 30.0).unwrap();
        let zeros = Array2::zeros((4, 4));
        let nans = Array2::from_elem((4, 4), f64::NAN);
        let result = Scene::new(frame, zeros.clone(), zeros.clone(), zeros, nans, SceneMeta::default());
        assert!(matches!(result, Err(SceneError::EmptyScene)));
    }

    #[test]
    fn test_quadtree_lazy_build_and_setters() {
        let mut scene = Scene::synthetic_gauss(64, 64).unwrap();
        let quadtree = scene.quadtree();
        assert!(quadtree.leaf_count() > 0);

        quadtree.set_nan_allowed(0.5);
        assert_eq!(scene.quadtree_config().nan_allowed, 0.5);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new("roundtrip");
        let mut scene = Scene::synthetic_gauss(32, 48).unwrap();
        scene.quadtree().set_tile_size_lim((120.0, 600.0));
        scene.covariance().set_subsampling(4);

        scene.save(&tmp.0).unwrap();
        let loaded = Scene::load(&tmp.0).unwrap();

        assert_eq!(loaded.frame(), scene.frame());
        assert_eq!(loaded.meta(), scene.meta());
        assert_eq!(loaded.quadtree_config(), scene.quadtree_config());
        assert_eq!(loaded.covariance_config().subsampling, 4);

        // Samples survive exactly, including the NaN gap
        for (a, b) in scene
            .displacement()
            .iter()
            .zip(loaded.displacement().iter())
        {
            assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
        }
        assert_eq!(scene.north(), loaded.north());
    }

    #[test]
    fn test_save_into_existing_directory() {
        let tmp = TempDir::new("existing");
        std::fs::create_dir_all(&tmp.0).unwrap();
        let scene = Scene::synthetic_gauss(16, 16).unwrap();
        scene.save(&tmp.0).unwrap();
        scene.save(&tmp.0).unwrap();
    }

    #[test]
    fn test_load_missing_path_fails() {
        let result = Scene::load("/nonexistent/displacement-scene-test");
        assert!(matches!(result, Err(SceneError::Io(_))));
    }

    #[test]
    fn test_load_truncated_manifest_fails() {
        let tmp = TempDir::new("truncated");
        std::fs::create_dir_all(&tmp.0).unwrap();
        std::fs::write(tmp.0.join("scene.json"), "{\"meta\": {").unwrap();
        let result = Scene::load(&tmp.0);
        assert!(matches!(result, Err(SceneError::Json(_))));
    }
}
