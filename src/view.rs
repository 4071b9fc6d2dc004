//! Scene view model - linked panels, symmetric color levels, histograms
//!
//! Non-GUI counterpart of the four-panel displacement viewer: one panel per
//! component (North, East, Down, LOS), all sharing a single axis range, each
//! with symmetric color levels derived from its data. Cursor synchronization
//! across panels goes through a shared [`CursorTracker`]; whether panels are
//! wired up at all is an explicit constructor parameter instead of ambient
//! process-wide configuration.

use crate::{CursorPosition, CursorTracker, Scene};
use ndarray::Array2;
use std::sync::{Arc, RwLock};

/// Displacement component shown by a panel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    North,
    East,
    Down,
    /// Line-of-sight displacement
    Los,
}

impl ComponentKind {
    /// All components, in panel order
    pub const ALL: [Self; 4] = [Self::North, Self::East, Self::Down, Self::Los];

    /// Panel title
    pub fn title(&self) -> &'static str {
        match self {
            Self::North => "North",
            Self::East => "East",
            Self::Down => "Down",
            Self::Los => "LOS",
        }
    }
}

/// View construction parameters
#[derive(Clone, Copy, Debug)]
pub struct ViewConfig {
    /// Wire panels to the shared cursor broadcast
    pub show_cursor: bool,
    /// Number of histogram bins
    pub histogram_bins: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            show_cursor: true,
            histogram_bins: 50,
        }
    }
}

/// Shared axis range linking all panels, in local meters
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisRange {
    /// Easting range `(min, max)`
    pub east: (f64, f64),
    /// Northing range `(min, max)`
    pub north: (f64, f64),
}

/// Histogram of a component's finite values over its symmetric color range
#[derive(Clone, Debug, Default)]
pub struct Histogram {
    /// Bin edges, `counts.len() + 1` entries
    pub edges: Vec<f64>,
    /// Samples per bin
    pub counts: Vec<usize>,
}

/// One display panel of the view
pub struct ComponentPanel {
    kind: ComponentKind,
    color_levels: (f64, f64),
    cursor: Arc<RwLock<Option<CursorPosition>>>,
}

impl std::fmt::Debug for ComponentPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentPanel")
            .field("kind", &self.kind)
            .field("color_levels", &self.color_levels)
            .finish()
    }
}

impl ComponentPanel {
    /// Component shown by this panel
    #[inline]
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Panel title
    #[inline]
    pub fn title(&self) -> &'static str {
        self.kind.title()
    }

    /// Symmetric color levels `(-m, m)` derived from the component data
    #[inline]
    pub fn color_levels(&self) -> (f64, f64) {
        self.color_levels
    }

    /// Cursor position last broadcast to this panel
    pub fn cursor_position(&self) -> Option<CursorPosition> {
        *self.cursor.read().unwrap()
    }
}

/// Four linked panels over one scene
pub struct SceneView {
    config: ViewConfig,
    axis_range: AxisRange,
    panels: Vec<ComponentPanel>,
    components: Vec<(ComponentKind, Arc<Array2<f64>>)>,
    tracker: CursorTracker,
}

impl std::fmt::Debug for SceneView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneView")
            .field("config", &self.config)
            .field("axis_range", &self.axis_range)
            .field("panels", &self.panels)
            .finish()
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SceneView {
    /// Build the view model for a scene
    ///
    /// Never fails for a well-formed scene. With `show_cursor` disabled, no
    /// panel observes cursor events.
    pub fn new(scene: &Scene, config: ViewConfig) -> Self {
        let frame = scene.frame();
        let axis_range = AxisRange {
            east: (0.0, frame.width()),
            north: (0.0, frame.height()),
        };

        let components: Vec<(ComponentKind, Arc<Array2<f64>>)> = ComponentKind::ALL
            .iter()
            .map(|&kind| (kind, scene.component_arc(kind)))
            .collect();

        let mut tracker = CursorTracker::new();
        let panels = components
            .iter()
            .map(|(kind, data)| {
                let cursor = Arc::new(RwLock::new(None));
                if config.show_cursor {
                    let panel_cursor = cursor.clone();
                    tracker.subscribe(move |position| {
                        *panel_cursor.write().unwrap() = Some(position);
                    });
                }
                ComponentPanel {
                    kind: *kind,
                    color_levels: symmetric_levels(data),
                    cursor,
                }
            })
            .collect();

        Self {
            config,
            axis_range,
            panels,
            components,
            tracker,
        }
    }

    /// The linked panels, in [`ComponentKind::ALL`] order
    #[inline]
    pub fn panels(&self) -> &[ComponentPanel] {
        &self.panels
    }

    /// Axis range shared by all panels
    #[inline]
    pub fn axis_range(&self) -> AxisRange {
        self.axis_range
    }

    /// View configuration
    #[inline]
    pub fn config(&self) -> ViewConfig {
        self.config
    }

    /// Broadcast a cursor move to all wired panels
    ///
    /// Returns `true` if the event was delivered (see [`CursorTracker`] for
    /// the rate limiting behavior).
    pub fn cursor_moved(&mut self, position: CursorPosition) -> bool {
        self.tracker.cursor_moved(position)
    }

    /// Shared cursor tracker, for additional external listeners
    #[inline]
    pub fn cursor_tracker_mut(&mut self) -> &mut CursorTracker {
        &mut self.tracker
    }

    /// Histogram of a component's finite values over its symmetric color range
    pub fn histogram(&self, kind: ComponentKind) -> Histogram {
        let data = &self
            .components
            .iter()
            .find(|(k, _)| *k == kind)
            .expect("all components are present")
            .1;

        let (low, high) = symmetric_levels(data);
        let bins = self.config.histogram_bins.max(1);
        let bin_width = (high - low) / bins as f64;

        let mut edges = Vec::with_capacity(bins + 1);
        for i in 0..=bins {
            edges.push(low + i as f64 * bin_width);
        }

        let mut counts = vec![0usize; bins];
        for &value in data.iter().filter(|v| v.is_finite()) {
            let bin = (((value - low) / bin_width) as usize).min(bins - 1);
            counts[bin] += 1;
        }

        Histogram { edges, counts }
    }
}

/// Symmetric color levels `(-m, m)` with `m = max |finite value|`
///
/// Components without finite samples or with all-zero values fall back to
/// `(-1, 1)` so downstream consumers always get a non-degenerate range.
fn symmetric_levels(data: &Array2<f64>) -> (f64, f64) {
    let max_abs = data
        .iter()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    if max_abs > 0.0 {
        (-max_abs, max_abs)
    } else {
        (-1.0, 1.0)
    }
}
