//! In-memory camera used by capture and scenario tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::capture::domain::camera_platform::{
    CameraDevice, CameraPlatform, StreamEndedCallback, StreamFormat,
};
use crate::capture::domain::capture_error::CaptureError;
use crate::shared::frame::{Frame, PixelFormat};

type SharedCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct StubState {
    acquire_error: Option<CaptureError>,
    start_error: Option<CaptureError>,
    capture_error: Option<CaptureError>,
    negotiated_format: Option<PixelFormat>,
    lose_during_capture: bool,
    acquire_delay: Option<Duration>,
    acquisitions: usize,
    open_devices: usize,
    captures: usize,
    on_ended: Option<SharedCallback>,
}

/// Camera stub whose failures are scripted per test.
///
/// Clones share state, so a test keeps one clone for inspection while the
/// code under test owns another.
#[derive(Clone, Default)]
pub(crate) struct StubPlatform {
    state: Arc<Mutex<StubState>>,
}

impl StubPlatform {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn fail_acquire(&self, err: CaptureError) {
        self.state().acquire_error = Some(err);
    }

    pub(crate) fn allow_acquire(&self) {
        self.state().acquire_error = None;
    }

    pub(crate) fn fail_start(&self, err: CaptureError) {
        self.state().start_error = Some(err);
    }

    pub(crate) fn fail_capture(&self, err: CaptureError) {
        self.state().capture_error = Some(err);
    }

    pub(crate) fn negotiate_as(&self, format: PixelFormat) {
        self.state().negotiated_format = Some(format);
    }

    /// Makes every `acquire` block for `delay` first.
    pub(crate) fn delay_acquire(&self, delay: Duration) {
        self.state().acquire_delay = Some(delay);
    }

    /// Fires the stream-ended callback from inside the next capture.
    pub(crate) fn lose_stream_during_capture(&self) {
        self.state().lose_during_capture = true;
    }

    /// Fires the most recently registered stream-ended callback.
    pub(crate) fn lose_stream(&self) {
        let callback = self.state().on_ended.clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub(crate) fn acquisitions(&self) -> usize {
        self.state().acquisitions
    }

    pub(crate) fn open_devices(&self) -> usize {
        self.state().open_devices
    }

    pub(crate) fn captures(&self) -> usize {
        self.state().captures
    }
}

impl CameraPlatform for StubPlatform {
    fn acquire(&self) -> Result<Box<dyn CameraDevice>, CaptureError> {
        let delay = self.state().acquire_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state();
        if let Some(err) = state.acquire_error.clone() {
            return Err(err);
        }
        state.acquisitions += 1;
        state.open_devices += 1;
        Ok(Box::new(StubDevice {
            platform: self.clone(),
            format: None,
        }))
    }
}

struct StubDevice {
    platform: StubPlatform,
    format: Option<StreamFormat>,
}

impl CameraDevice for StubDevice {
    fn negotiate(&mut self, requested: StreamFormat) -> Result<StreamFormat, CaptureError> {
        let pixel_format = self
            .platform
            .state()
            .negotiated_format
            .unwrap_or(requested.pixel_format);
        let format = StreamFormat {
            pixel_format,
            ..requested
        };
        self.format = Some(format);
        Ok(format)
    }

    fn start_stream(&mut self, on_stream_ended: StreamEndedCallback) -> Result<(), CaptureError> {
        let mut state = self.platform.state();
        if let Some(err) = state.start_error.clone() {
            return Err(err);
        }
        state.on_ended = Some(Arc::from(on_stream_ended));
        Ok(())
    }

    fn capture_frame(
        &mut self,
        format: PixelFormat,
        _timeout: Duration,
    ) -> Result<Frame, CaptureError> {
        let lose = {
            let mut state = self.platform.state();
            state.captures += 1;
            if let Some(err) = state.capture_error.clone() {
                return Err(err);
            }
            std::mem::take(&mut state.lose_during_capture)
        };
        if lose {
            self.platform.lose_stream();
        }

        let negotiated = self.format.ok_or(CaptureError::NotStreaming)?;
        let len = format
            .buffer_len(negotiated.width, negotiated.height)
            .unwrap_or(16);
        Frame::try_new(vec![128u8; len], negotiated.width, negotiated.height, format, 0)
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
    }

    // The callback is kept after stopping so tests can check that a late
    // platform notification is suppressed.
    fn stop_stream(&mut self) {}
}

impl Drop for StubDevice {
    fn drop(&mut self) {
        self.platform.state().open_devices -= 1;
    }
}
