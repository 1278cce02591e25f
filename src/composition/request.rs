use crate::buffer::{BufferPool, PixelBuffer, PixelFormat};
use crate::capture::SynchronizedSample;
use crate::effect::EffectParams;
use crate::foundation::core::Dimensions;

/// Submission-order token for one composition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// Immutable composition job: one synchronized sample plus the effect
/// parameters to draw it with. The engine owns the sample's buffers from
/// submission until the outcome is delivered.
pub struct CompositionRequest {
    pub sample: SynchronizedSample,
    pub params: EffectParams,
}

/// Output geometry and format the engine falls back to when a request
/// cannot be composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    pub dims: Dimensions,
    pub format: PixelFormat,
}

impl RenderContext {
    pub fn new(dims: Dimensions, format: PixelFormat) -> Self {
        Self { dims, format }
    }

    /// Opaque black frame, used so a failed request still answers with a
    /// valid buffer.
    pub fn blank_frame(&self, pool: &BufferPool) -> Option<PixelBuffer> {
        let mut out = pool.acquire(self.format, self.dims)?;
        out.fill(0);
        if self.format == PixelFormat::Bgra8 {
            for px in out.as_bytes_mut().chunks_exact_mut(4) {
                px[3] = 255;
            }
        }
        Some(out)
    }
}

/// Terminal answer for one request. Exactly one outcome is delivered per
/// submitted request; frame-carrying outcomes transfer buffer ownership
/// to the callback.
pub enum CompositionOutcome {
    /// Frame composed from the request's sample.
    Frame(PixelBuffer),
    /// Composition failed; a context-sized blank keeps downstream fed.
    Blank(PixelBuffer),
    /// Drained by a cancel-all before composition started.
    Cancelled,
}

impl CompositionOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CompositionOutcome::Cancelled)
    }

    /// The carried buffer, composed or blank.
    pub fn into_frame(self) -> Option<PixelBuffer> {
        match self {
            CompositionOutcome::Frame(buf) | CompositionOutcome::Blank(buf) => Some(buf),
            CompositionOutcome::Cancelled => None,
        }
    }
}
