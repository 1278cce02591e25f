use crate::foundation::core::Dimensions;

/// Lens/sensor geometry metadata attached to depth frames when the sensor
/// provides it.
///
/// The capture layer passes this through to the blur effect unmodified;
/// only the effect interprets it.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationData {
    /// Focal length in pixels at the disparity map's native resolution.
    pub focal_length_px: f32,
    /// Resolution the intrinsics were measured at.
    pub reference_dims: Dimensions,
    /// Multiplier correcting disparity magnitude for lens geometry. 1.0
    /// means the sensor's disparity values are used as-is.
    pub disparity_scale: f32,
}
