//! Pixel formats, pooled pixel buffers, and the recycling buffer pool.

mod format;
mod pixel;
mod pool;

pub use format::{BufferKey, PixelFormat};
pub use pixel::PixelBuffer;
pub use pool::{BufferPool, BufferPoolOpts, BufferPoolStats};
