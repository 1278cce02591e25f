use crate::buffer::format::{BufferKey, PixelFormat};
use crate::foundation::core::{Dimensions, TimestampUs};

/// A pooled, format-tagged pixel surface.
///
/// Buffers are created and recycled exclusively by their originating
/// [`BufferPool`](crate::buffer::BufferPool). A checked-out buffer is owned
/// by exactly one caller; the type is deliberately not `Clone`, so release
/// back to the pool moves the only reference and reuse-while-shared cannot
/// be expressed.
///
/// Pixel contents after acquire are unspecified (recycled storage is not
/// cleared); producers overwrite every row they hand off.
#[derive(Debug)]
pub struct PixelBuffer {
    data: Vec<u8>,
    key: BufferKey,
    stride: usize,
    timestamp: Option<TimestampUs>,
}

impl PixelBuffer {
    pub(crate) fn from_storage(key: BufferKey, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), key.byte_len());
        Self {
            data,
            key,
            stride: key.dims.width as usize * key.format.bytes_per_pixel(),
            timestamp: None,
        }
    }

    pub(crate) fn key(&self) -> BufferKey {
        self.key
    }

    pub(crate) fn into_storage(self) -> Vec<u8> {
        self.data
    }

    pub fn format(&self) -> PixelFormat {
        self.key.format
    }

    pub fn dims(&self) -> Dimensions {
        self.key.dims
    }

    pub fn width(&self) -> u32 {
        self.key.dims.width
    }

    pub fn height(&self) -> u32 {
        self.key.dims.height
    }

    /// Distance in bytes between the starts of adjacent rows.
    pub fn stride_bytes(&self) -> usize {
        self.stride
    }

    pub fn timestamp(&self) -> Option<TimestampUs> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, ts: TimestampUs) {
        self.timestamp = Some(ts);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.stride]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.stride]
    }

    /// Fill every byte, typically to produce a blank frame.
    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }
}
