//! Live preview: cadence-paced rendering of the newest synchronized
//! sample onto a display surface.

mod live;
mod surface;

pub use live::{LiveConfig, LiveRenderPipeline, LiveStats, SampleMailbox};
pub use surface::{DisplaySurface, InMemorySurface};
