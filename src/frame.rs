//! Frame - georeference for a displacement raster
//!
//! A frame ties pixel indices to local metric coordinates: pixel spacing in
//! east/north direction and the raster shape. Coordinates are expressed in
//! meters relative to the lower-left corner of the raster.

use crate::{Result, SceneError};
use serde::{Deserialize, Serialize};

/// Georeference of a displacement raster
///
/// Rows run south to north, columns west to east. Pixel `(row, col)` maps to
/// the local metric coordinate of its lower-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Number of raster rows
    pub rows: usize,
    /// Number of raster columns
    pub cols: usize,
    /// Pixel spacing in east direction, meters
    pub d_east: f64,
    /// Pixel spacing in north direction, meters
    pub d_north: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Frame {
    /// Create a new frame
    ///
    /// Fails if the shape is empty or a spacing is not finite and positive.
    pub fn new(rows: usize, cols: usize, d_east: f64, d_north: f64) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(SceneError::InvalidFrame(format!(
                "raster shape must be non-empty, got {rows}x{cols}"
            )));
        }
        if !(d_east.is_finite() && d_east > 0.0) || !(d_north.is_finite() && d_north > 0.0) {
            return Err(SceneError::InvalidFrame(format!(
                "pixel spacings must be finite and positive, got dE={d_east} dN={d_north}"
            )));
        }

        Ok(Self {
            rows,
            cols,
            d_east,
            d_north,
        })
    }

    /// Physical width of the raster in meters (east extent)
    #[inline]
    pub fn width(&self) -> f64 {
        self.cols as f64 * self.d_east
    }

    /// Physical height of the raster in meters (north extent)
    #[inline]
    pub fn height(&self) -> f64 {
        self.rows as f64 * self.d_north
    }

    /// Map a pixel index to the local metric coordinate of its lower-left corner
    ///
    /// Returns `(easting, northing)` in meters.
    #[inline]
    pub fn pixel_to_local(&self, row: usize, col: usize) -> (f64, f64) {
        (col as f64 * self.d_east, row as f64 * self.d_north)
    }

    /// Map a local metric coordinate to the containing pixel index
    ///
    /// Returns `None` for coordinates outside the raster extent.
    pub fn local_to_pixel(&self, easting: f64, northing: f64) -> Option<(usize, usize)> {
        if easting < 0.0 || northing < 0.0 || easting >= self.width() || northing >= self.height() {
            return None;
        }
        let col = (easting / self.d_east) as usize;
        let row = (northing / self.d_north) as usize;
        // Guard against floating point landing exactly on the upper edge
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some((row, col))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let frame = Frame::new(100, 200, 30.0, 25.0).unwrap();
        assert_eq!(frame.rows, 100);
        assert_eq!(frame.cols, 200);
        assert_eq!(frame.width(), 6000.0);
        assert_eq!(frame.height(), 2500.0);
    }

    #[test]
    fn test_empty_frame_fails() {
        assert!(Frame::new(0, 10, 30.0, 30.0).is_err());
        assert!(Frame::new(10, 0, 30.0, 30.0).is_err());
    }

    #[test]
    fn test_invalid_spacing_fails() {
        assert!(Frame::new(10, 10, 0.0, 30.0).is_err());
        assert!(Frame::new(10, 10, -1.0, 30.0).is_err());
        assert!(Frame::new(10, 10, f64::NAN, 30.0).is_err());
        assert!(Frame::new(10, 10, 30.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_pixel_to_local_roundtrip() {
        let frame = Frame::new(100, 100, 30.0, 25.0).unwrap();

        let (e, n) = frame.pixel_to_local(10, 20);
        assert_eq!((e, n), (600.0, 250.0));

        let (row, col) = frame.local_to_pixel(e, n).unwrap();
        assert_eq!((row, col), (10, 20));
    }

    #[test]
    fn test_local_to_pixel_out_of_bounds() {
        let frame = Frame::new(10, 10, 30.0, 30.0).unwrap();
        assert!(frame.local_to_pixel(-1.0, 0.0).is_none());
        assert!(frame.local_to_pixel(0.0, 300.0).is_none());
        assert!(frame.local_to_pixel(299.9, 299.9).is_some());
    }

    #[test]
    fn test_serde_roundtrip() {
        let frame = Frame::new(64, 128, 30.0, 25.0).unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }
}
