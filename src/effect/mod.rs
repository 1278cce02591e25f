//! Depth-guided compositing: edge-preserving disparity upsampling, the
//! variable-radius bokeh, geometric resize, and the segmentation seam.

mod blur;
mod calibration;
mod compositor;
mod resize;
mod segmentation;
mod upsample;

pub use calibration::CalibrationData;
pub use compositor::{
    APERTURE_DEFAULT, APERTURE_MAX, APERTURE_MIN, DepthBlurCompositor, EffectParams, PreviewMode,
    Watermark,
};
pub use resize::{ResizeMode, resize_into, scale_for_resize};
pub use segmentation::{DisparityThresholdModel, SegmentationModel};
pub use upsample::guided_upsample;
