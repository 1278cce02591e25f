use crate::buffer::PixelFormat;
use crate::effect::CalibrationData;
use crate::foundation::core::{Dimensions, Fps};
use crate::foundation::error::{AperioError, AperioResult};

pub(crate) const MANIFEST_FILE: &str = "manifest.json";
pub(crate) const COLOR_TRACK_FILE: &str = "color.raw";
pub(crate) const DEPTH_TRACK_FILE: &str = "depth.raw";

/// On-disk description of a recorded clip.
///
/// A clip is a directory holding this manifest (`manifest.json`) next to
/// two append-only rawvideo tracks (`color.raw`, `depth.raw`). Frame `i`
/// of a track starts at `i * frame_bytes` for that track's format; the
/// manifest carries one midpoint timestamp per recorded sample, in track
/// order.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ClipManifest {
    pub color_dims: Dimensions,
    pub depth_dims: Dimensions,
    pub color_format: PixelFormat,
    pub depth_format: PixelFormat,
    /// Nominal capture rate; export inherits it unless overridden.
    pub fps: Fps,
    /// Pairing window the synchronizer used, in microseconds.
    pub tolerance_us: u64,
    /// Aperture configured when the clip was recorded.
    pub aperture: f32,
    /// First calibration seen during recording, if any.
    pub calibration: Option<CalibrationData>,
    pub frame_timestamps_us: Vec<i64>,
}

impl ClipManifest {
    pub fn frame_count(&self) -> u64 {
        self.frame_timestamps_us.len() as u64
    }

    pub fn color_frame_bytes(&self) -> usize {
        self.color_dims.pixel_count() * self.color_format.bytes_per_pixel()
    }

    pub fn depth_frame_bytes(&self) -> usize {
        self.depth_dims.pixel_count() * self.depth_format.bytes_per_pixel()
    }

    /// Field checks serde cannot express; deserialization bypasses the
    /// constructor validation of [`Dimensions`] and [`Fps`].
    pub fn validate(&self) -> AperioResult<()> {
        for dims in [self.color_dims, self.depth_dims] {
            if dims.width == 0 || dims.height == 0 {
                return Err(AperioError::validation("clip track dimensions must be non-zero"));
            }
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(AperioError::validation("clip fps must have num>0 and den>0"));
        }
        if self.tolerance_us == 0 {
            return Err(AperioError::validation("clip tolerance must be > 0"));
        }
        if !self.aperture.is_finite() || self.aperture <= 0.0 {
            return Err(AperioError::validation("clip aperture must be finite and > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_manifest() -> ClipManifest {
        ClipManifest {
            color_dims: Dimensions::new(16, 8).unwrap(),
            depth_dims: Dimensions::new(8, 4).unwrap(),
            color_format: PixelFormat::Bgra8,
            depth_format: PixelFormat::Gray8,
            fps: Fps::new(30, 1).unwrap(),
            tolerance_us: 50_000,
            aperture: 2.4,
            calibration: None,
            frame_timestamps_us: vec![0, 33_333, 66_666],
        }
    }

    #[test]
    fn json_roundtrip() {
        let manifest = basic_manifest();
        let s = serde_json::to_string_pretty(&manifest).unwrap();
        let de: ClipManifest = serde_json::from_str(&s).unwrap();
        assert_eq!(de.color_dims, manifest.color_dims);
        assert_eq!(de.frame_count(), 3);
        assert_eq!(de.color_frame_bytes(), 16 * 8 * 4);
        assert_eq!(de.depth_frame_bytes(), 8 * 4);
        de.validate().unwrap();
    }

    #[test]
    fn validate_rejects_degenerate_fields() {
        let mut manifest = basic_manifest();
        manifest.color_dims.width = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = basic_manifest();
        manifest.fps.den = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = basic_manifest();
        manifest.tolerance_us = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = basic_manifest();
        manifest.aperture = f32::NAN;
        assert!(manifest.validate().is_err());
    }
}
