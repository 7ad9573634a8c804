use std::time::Instant;

use thiserror::Error;

use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::face::DetectedFace;
use crate::shared::frame::{Frame, PixelFormat};

/// Why detection could not be attempted or did not complete.
///
/// Finding zero faces is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("face detector does not accept {0} frames")]
    UnsupportedFormat(PixelFormat),
    #[error("face detection failed: {0}")]
    Failed(String),
}

/// Runs the capability check and the detector, translating its failures.
pub struct FaceDetectionService {
    detector: Box<dyn FaceDetector>,
}

impl FaceDetectionService {
    pub fn new(detector: Box<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    pub fn supports_format(&self, format: PixelFormat) -> bool {
        self.detector.supports_format(format)
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, DetectionError> {
        if !self.detector.supports_format(frame.format()) {
            return Err(DetectionError::UnsupportedFormat(frame.format()));
        }

        let started = Instant::now();
        let faces = self
            .detector
            .detect(frame)
            .map_err(|e| DetectionError::Failed(e.to_string()))?;
        log::debug!(
            "Detected {} face(s) in {}x{} frame {} in {:.1?}",
            faces.len(),
            frame.width(),
            frame.height(),
            frame.index(),
            started.elapsed()
        );
        Ok(faces)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Detector returning a fixed answer for every frame.
    pub(crate) struct StubDetector {
        pub(crate) faces: Vec<DetectedFace>,
        pub(crate) supported: Vec<PixelFormat>,
        pub(crate) error: Option<String>,
    }

    impl StubDetector {
        pub(crate) fn finding(faces: Vec<DetectedFace>) -> Self {
            Self {
                faces,
                supported: vec![PixelFormat::Nv12],
                error: None,
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                error: Some(message.to_string()),
                ..Self::finding(Vec::new())
            }
        }
    }

    impl FaceDetector for StubDetector {
        fn supports_format(&self, format: PixelFormat) -> bool {
            self.supported.contains(&format)
        }

        fn detect(
            &mut self,
            _frame: &Frame,
        ) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
            match &self.error {
                Some(message) => Err(message.clone().into()),
                None => Ok(self.faces.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubDetector;
    use super::*;

    fn nv12_frame() -> Frame {
        Frame::try_new(vec![16; 4 * 4 * 3 / 2], 4, 4, PixelFormat::Nv12, 0).unwrap()
    }

    #[test]
    fn test_returns_detected_faces() {
        let face = DetectedFace::new(1, 1, 2, 2);
        let mut service = FaceDetectionService::new(Box::new(StubDetector::finding(vec![face])));

        assert_eq!(service.detect(&nv12_frame()), Ok(vec![face]));
    }

    #[test]
    fn test_no_faces_is_empty_not_error() {
        let mut service = FaceDetectionService::new(Box::new(StubDetector::finding(vec![])));
        assert_eq!(service.detect(&nv12_frame()), Ok(vec![]));
    }

    #[test]
    fn test_unsupported_format_is_distinct_error() {
        let mut detector = StubDetector::finding(vec![DetectedFace::new(0, 0, 1, 1)]);
        detector.supported = vec![PixelFormat::Rgb8];
        let mut service = FaceDetectionService::new(Box::new(detector));

        assert!(!service.supports_format(PixelFormat::Nv12));
        assert_eq!(
            service.detect(&nv12_frame()),
            Err(DetectionError::UnsupportedFormat(PixelFormat::Nv12))
        );
    }

    #[test]
    fn test_detector_failure_is_reported() {
        let detector = StubDetector::failing("model crashed");
        let mut service = FaceDetectionService::new(Box::new(detector));
        assert_eq!(
            service.detect(&nv12_frame()),
            Err(DetectionError::Failed("model crashed".into()))
        );
    }
}
