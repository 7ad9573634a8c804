use std::time::Duration;

use thiserror::Error;

use crate::shared::frame::PixelFormat;

/// Failures reported by a capture session or the platform beneath it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("camera is unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera error: {0}")]
    Device(String),
    #[error("capture session is not streaming")]
    NotStreaming,
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
    #[error("expected {expected} frames, stream delivered {actual}")]
    FormatMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },
    #[error("no frame arrived within {0:?}")]
    Timeout(Duration),
    #[error("camera stream ended")]
    StreamLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CaptureError::PermissionDenied.to_string(),
            "camera access was denied"
        );
        assert_eq!(
            CaptureError::DeviceUnavailable("busy".into()).to_string(),
            "camera is unavailable: busy"
        );
        assert_eq!(
            CaptureError::FormatMismatch {
                expected: PixelFormat::Nv12,
                actual: PixelFormat::Mjpeg,
            }
            .to_string(),
            "expected NV12 frames, stream delivered MJPEG"
        );
    }
}
