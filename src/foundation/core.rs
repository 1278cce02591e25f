use crate::foundation::error::{AperioError, AperioResult};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> AperioResult<Self> {
        if den == 0 {
            return Err(AperioError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(AperioError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    pub fn frames_to_secs(self, frames: u64) -> f64 {
        (frames as f64) * self.frame_duration_secs()
    }

    pub fn secs_to_frames_floor(self, secs: f64) -> u64 {
        (secs * self.as_f64()).floor().max(0.0) as u64
    }
}

/// Width and height of a pixel buffer or output target, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> AperioResult<Self> {
        if width == 0 || height == 0 {
            return Err(AperioError::validation("Dimensions must be non-zero"));
        }
        Ok(Self { width, height })
    }

    /// width / height.
    pub fn aspect_ratio(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }

    pub fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Presentation timestamp in microseconds from an arbitrary epoch.
///
/// Feeds stamp frames from their own clocks; only differences and midpoints
/// between timestamps of the same session are meaningful.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct TimestampUs(pub i64);

impl TimestampUs {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1_000))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000.0).round() as i64)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Absolute distance to `other` in microseconds.
    pub fn abs_diff(self, other: Self) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Midpoint between `self` and `other`, rounding toward `self`.
    pub fn midpoint(self, other: Self) -> Self {
        Self(self.0 + (other.0 - self.0) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_frames_secs_roundtrip_floor() {
        let fps = Fps::new(30000, 1001).unwrap();
        let secs = fps.frames_to_secs(123);
        assert_eq!(fps.secs_to_frames_floor(secs), 123);
    }

    #[test]
    fn fps_rejects_zero() {
        assert!(Fps::new(0, 1).is_err());
        assert!(Fps::new(30, 0).is_err());
    }

    #[test]
    fn dimensions_aspect_and_validation() {
        let d = Dimensions::new(1920, 1080).unwrap();
        assert!((d.aspect_ratio() - 16.0 / 9.0).abs() < 1e-12);
        assert!(Dimensions::new(0, 1080).is_err());
    }

    #[test]
    fn timestamp_midpoint_and_distance() {
        let a = TimestampUs::from_millis(240);
        let b = TimestampUs::from_millis(250);
        assert_eq!(a.abs_diff(b), 10_000);
        assert_eq!(a.midpoint(b), TimestampUs::from_millis(245));
        assert_eq!(b.midpoint(a), TimestampUs::from_millis(245));
    }
}
