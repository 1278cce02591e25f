use crate::buffer::PixelBuffer;
use crate::foundation::core::Dimensions;
use crate::foundation::error::AperioResult;

/// Subject segmentation contract.
///
/// The compositor hands in single-channel luma and disparity planes
/// pre-scaled to [`input_dims`](SegmentationModel::input_dims) and expects
/// a mask of the same size written into `mask_out`, 255 meaning subject
/// and 0 background. There is no retry behind this seam: an error fails
/// the frame's composition and the caller drops the frame.
pub trait SegmentationModel: Send + Sync {
    fn input_dims(&self) -> Dimensions;

    fn infer(
        &self,
        luma: &PixelBuffer,
        disparity: &PixelBuffer,
        mask_out: &mut PixelBuffer,
    ) -> AperioResult<()>;
}

/// Stand-in model: everything at or nearer than `threshold` disparity is
/// subject. Useful for demos and tests; real deployments put a neural
/// model behind the same trait.
#[derive(Debug, Clone, Copy)]
pub struct DisparityThresholdModel {
    pub input_dims: Dimensions,
    pub threshold: u8,
}

impl SegmentationModel for DisparityThresholdModel {
    fn input_dims(&self) -> Dimensions {
        self.input_dims
    }

    fn infer(
        &self,
        _luma: &PixelBuffer,
        disparity: &PixelBuffer,
        mask_out: &mut PixelBuffer,
    ) -> AperioResult<()> {
        for (m, &d) in mask_out
            .as_bytes_mut()
            .iter_mut()
            .zip(disparity.as_bytes())
        {
            *m = if d >= self.threshold { 255 } else { 0 };
        }
        Ok(())
    }
}
