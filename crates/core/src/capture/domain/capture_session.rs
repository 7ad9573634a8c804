use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::capture::domain::camera_platform::{
    CameraDevice, CameraPlatform, StreamEndedCallback, StreamFormat,
};
use crate::capture::domain::capture_error::CaptureError;
use crate::shared::constants::{
    DEFAULT_CAPTURE_HEIGHT, DEFAULT_CAPTURE_WIDTH, DEFAULT_FRAME_TIMEOUT,
};
use crate::shared::frame::{Frame, PixelFormat};

/// The layout every session negotiates; the detector reads it directly.
pub const CAPTURE_PIXEL_FORMAT: PixelFormat = PixelFormat::Nv12;

/// Identifies one capture session for routing device notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Asynchronous notifications a session posts to its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StreamEnded(SessionId),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSettings {
    /// Requested width; 0 keeps the device's native width.
    pub width: u32,
    /// Requested height; 0 keeps the device's native height.
    pub height: u32,
    /// Longest a single-frame capture may wait for the stream.
    pub frame_timeout: Duration,
}

impl CaptureSettings {
    /// NV12 at the configured size, rounded down to even dimensions.
    pub fn requested_format(&self) -> StreamFormat {
        StreamFormat {
            width: self.width & !1,
            height: self.height & !1,
            pixel_format: CAPTURE_PIXEL_FORMAT,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: DEFAULT_CAPTURE_WIDTH,
            height: DEFAULT_CAPTURE_HEIGHT,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

/// Owns the camera handle for one streaming period.
///
/// The handle is held exactly while the session is streaming: `start`
/// either completes or leaves nothing acquired, and `stop` (also run on
/// drop) releases it on every path out.
pub struct CaptureSession {
    id: SessionId,
    platform: Arc<dyn CameraPlatform>,
    settings: CaptureSettings,
    events: Sender<SessionEvent>,
    device: Option<Box<dyn CameraDevice>>,
    format: Option<StreamFormat>,
    stopping: Arc<AtomicBool>,
}

impl CaptureSession {
    pub fn new(
        id: SessionId,
        platform: Arc<dyn CameraPlatform>,
        settings: CaptureSettings,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            platform,
            settings,
            events,
            device: None,
            format: None,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Negotiated format, present only while streaming.
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    pub fn is_streaming(&self) -> bool {
        self.device.is_some()
    }

    /// Acquires the device, negotiates NV12 and starts the live stream.
    ///
    /// Calling it on a session that is already streaming returns the
    /// current format.
    pub fn start(&mut self) -> Result<StreamFormat, CaptureError> {
        if let (Some(_), Some(format)) = (&self.device, self.format) {
            return Ok(format);
        }

        // Early returns drop `device`, which releases it.
        let mut device = self.platform.acquire()?;
        let format = device.negotiate(self.settings.requested_format())?;
        if format.pixel_format != CAPTURE_PIXEL_FORMAT {
            return Err(CaptureError::FormatMismatch {
                expected: CAPTURE_PIXEL_FORMAT,
                actual: format.pixel_format,
            });
        }

        self.stopping = Arc::new(AtomicBool::new(false));
        device.start_stream(self.stream_ended_callback())?;

        log::info!(
            "Capture session {} streaming {}x{} {}",
            self.id,
            format.width,
            format.height,
            format.pixel_format
        );
        self.device = Some(device);
        self.format = Some(format);
        Ok(format)
    }

    /// Captures one frame of the live stream in the negotiated layout.
    pub fn get_current_frame(&mut self) -> Result<Frame, CaptureError> {
        let (Some(device), Some(format)) = (self.device.as_mut(), self.format) else {
            return Err(CaptureError::NotStreaming);
        };

        let frame = device.capture_frame(format.pixel_format, self.settings.frame_timeout)?;
        if frame.format() != format.pixel_format {
            return Err(CaptureError::FormatMismatch {
                expected: format.pixel_format,
                actual: frame.format(),
            });
        }
        Ok(frame)
    }

    /// Halts the stream and releases the device. No-op when already stopped.
    pub fn stop(&mut self) {
        self.format = None;
        let Some(mut device) = self.device.take() else {
            return;
        };
        self.stopping.store(true, Ordering::SeqCst);
        device.stop_stream();
        drop(device);
        log::info!("Capture session {} stopped", self.id);
    }

    /// Wraps the event sender so a deliberate `stop` is never reported as
    /// a lost stream, and a loss is reported once.
    fn stream_ended_callback(&self) -> StreamEndedCallback {
        let id = self.id;
        let events = self.events.clone();
        let stopping = self.stopping.clone();
        let fired = AtomicBool::new(false);
        Box::new(move || {
            if stopping.load(Ordering::SeqCst) || fired.swap(true, Ordering::SeqCst) {
                return;
            }
            log::warn!("Capture session {id} lost its stream");
            let _ = events.send(SessionEvent::StreamEnded(id));
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("streaming", &self.is_streaming())
            .finish_non_exhaustive()
    }
}
