//! Serial, cancellable composition of synchronized samples.
//!
//! [`CompositionEngine`] owns a worker thread that drains a FIFO of
//! [`CompositionRequest`]s through a [`DepthBlurCompositor`] and answers
//! every request exactly once through the [`OnOutcome`] callback. A
//! failed composition falls back to a blank frame allocated from the
//! current [`RenderContext`]; [`CompositionEngine::cancel_all_pending`]
//! resolves queued-but-unstarted requests as cancelled without touching
//! the one in flight.
//!
//! [`DepthBlurCompositor`]: crate::effect::DepthBlurCompositor

mod engine;
mod request;

pub use engine::{CompositionEngine, EngineStats, OnOutcome};
pub use request::{CompositionOutcome, CompositionRequest, RenderContext, RequestId};
