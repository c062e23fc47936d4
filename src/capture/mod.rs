pub mod decoder;
pub mod frame;
pub mod pool;
pub mod synthetic;
pub mod v4l2;

pub use decoder::{FrameDecoder, NormalizedImage};
pub use frame::{Frame, FrameMetadata, PixelFormat, Rotation};
pub use pool::{BufferLease, BufferPool};
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

use crate::pipeline::FrameSink;
use crate::{CaptureConfig, PipelineError};

/// Anything that produces camera frames for a single consumer.
///
/// Frames are pushed into the [`FrameSink`] from the source's own capture
/// thread; `start` returns once the session is configured.
pub trait FrameSource: Send {
    fn name(&self) -> &'static str;

    /// Configure a continuous capture against `target` and begin delivering
    /// frames to `sink`.
    fn start(&mut self, target: &CaptureConfig, sink: FrameSink) -> Result<(), PipelineError>;

    /// Tear down the session and release the device. Safe after a failed
    /// `start` and when already stopped.
    fn stop(&mut self);
}
