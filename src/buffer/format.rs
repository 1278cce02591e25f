use crate::foundation::core::Dimensions;

/// Pixel layout of a [`PixelBuffer`](crate::buffer::PixelBuffer).
///
/// The capture hardware delivers 32-bit BGRA color and 8-bit grayscale
/// disparity, so those are the two layouts the pipeline moves around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PixelFormat {
    /// 8-bit blue/green/red/alpha, 4 bytes per pixel.
    Bgra8,
    /// Single 8-bit channel, used for disparity and masks.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Identity of a pool bucket: every buffer with the same key shares backing
/// storage dimensions and may be recycled interchangeably.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub dims: Dimensions,
    pub format: PixelFormat,
}

impl BufferKey {
    pub fn new(format: PixelFormat, dims: Dimensions) -> Self {
        Self { dims, format }
    }

    pub fn byte_len(self) -> usize {
        self.dims
            .pixel_count()
            .saturating_mul(self.format.bytes_per_pixel())
    }
}
