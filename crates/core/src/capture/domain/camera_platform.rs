use std::time::Duration;

use crate::capture::domain::capture_error::CaptureError;
use crate::shared::frame::{Frame, PixelFormat};

/// Resolution and layout of a live stream.
///
/// A zero width or height in a request means "whatever the device
/// natively produces".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Invoked from a platform thread when the stream stops on its own
/// (device unplugged, reclaimed by another process, end of input).
pub type StreamEndedCallback = Box<dyn Fn() + Send + Sync>;

/// Entry point to the platform camera stack.
///
/// Device enumeration and permission prompts stay behind this trait; the
/// core only ever asks for "the" camera.
pub trait CameraPlatform: Send + Sync {
    /// Opens the device for exclusive use. Dropping the returned handle
    /// releases it.
    fn acquire(&self) -> Result<Box<dyn CameraDevice>, CaptureError>;
}

/// An acquired camera.
pub trait CameraDevice: Send {
    /// Agrees on the stream format, returning what the device will deliver.
    fn negotiate(&mut self, requested: StreamFormat) -> Result<StreamFormat, CaptureError>;

    /// Begins the live stream. `on_stream_ended` is for stops that did not
    /// come from `stop_stream`.
    fn start_stream(&mut self, on_stream_ended: StreamEndedCallback) -> Result<(), CaptureError>;

    /// Returns the most recent frame of the live stream in `format`,
    /// waiting up to `timeout` for the first one to arrive.
    fn capture_frame(&mut self, format: PixelFormat, timeout: Duration)
        -> Result<Frame, CaptureError>;

    /// Halts the stream. Safe to call repeatedly.
    fn stop_stream(&mut self);
}
