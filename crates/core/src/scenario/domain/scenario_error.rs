use thiserror::Error;

use crate::capture::domain::capture_error::CaptureError;
use crate::conversion::frame_format_converter::ConvertError;
use crate::detection::domain::face_detection_service::DetectionError;
use crate::shared::frame::PixelFormat;

/// Why a requested transition did not complete. Every variant leaves the
/// scenario in Idle, except `Busy`, which leaves it untouched, and
/// `Stopped`, after which there is no scenario left to drive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("camera access was denied")]
    PermissionDenied,
    #[error("camera is unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("camera error: {0}")]
    Device(String),
    #[error("camera stream ended unexpectedly")]
    StreamLost,
    #[error("could not capture a frame: {0}")]
    CaptureFailure(String),
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(PixelFormat),
    #[error("face detection failed: {0}")]
    DetectionFailed(String),
    #[error("another request is still being processed")]
    Busy,
    #[error("the scenario has shut down")]
    Stopped,
}

impl From<CaptureError> for ScenarioError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => ScenarioError::PermissionDenied,
            CaptureError::DeviceUnavailable(reason) => ScenarioError::DeviceUnavailable(reason),
            CaptureError::Device(reason) => ScenarioError::Device(reason),
            CaptureError::StreamLost => ScenarioError::StreamLost,
            CaptureError::FormatMismatch { actual, .. } => ScenarioError::UnsupportedFormat(actual),
            CaptureError::NotStreaming
            | CaptureError::CaptureFailed(_)
            | CaptureError::Timeout(_) => ScenarioError::CaptureFailure(err.to_string()),
        }
    }
}

impl From<DetectionError> for ScenarioError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::UnsupportedFormat(format) => ScenarioError::UnsupportedFormat(format),
            DetectionError::Failed(reason) => ScenarioError::DetectionFailed(reason),
        }
    }
}

impl From<ConvertError> for ScenarioError {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::UnsupportedFormat(format) => ScenarioError::UnsupportedFormat(format),
            ConvertError::Scaler(reason) => ScenarioError::CaptureFailure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case(CaptureError::PermissionDenied, ScenarioError::PermissionDenied)]
    #[case(
        CaptureError::DeviceUnavailable("busy".into()),
        ScenarioError::DeviceUnavailable("busy".into())
    )]
    #[case(CaptureError::StreamLost, ScenarioError::StreamLost)]
    #[case(
        CaptureError::FormatMismatch { expected: PixelFormat::Nv12, actual: PixelFormat::Mjpeg },
        ScenarioError::UnsupportedFormat(PixelFormat::Mjpeg)
    )]
    fn test_capture_error_mapping(#[case] err: CaptureError, #[case] expected: ScenarioError) {
        assert_eq!(ScenarioError::from(err), expected);
    }

    #[test]
    fn test_capture_timeout_is_capture_failure() {
        let err = ScenarioError::from(CaptureError::Timeout(Duration::from_secs(3)));
        assert!(matches!(err, ScenarioError::CaptureFailure(_)));
    }

    #[test]
    fn test_detection_error_mapping() {
        assert_eq!(
            ScenarioError::from(DetectionError::UnsupportedFormat(PixelFormat::Yuyv)),
            ScenarioError::UnsupportedFormat(PixelFormat::Yuyv)
        );
        assert_eq!(
            ScenarioError::from(DetectionError::Failed("oom".into())),
            ScenarioError::DetectionFailed("oom".into())
        );
    }

    #[test]
    fn test_convert_error_mapping() {
        assert_eq!(
            ScenarioError::from(ConvertError::UnsupportedFormat(PixelFormat::Mjpeg)),
            ScenarioError::UnsupportedFormat(PixelFormat::Mjpeg)
        );
        assert_eq!(
            ScenarioError::from(ConvertError::Scaler("bad size".into())),
            ScenarioError::CaptureFailure("bad size".into())
        );
    }
}
