use crate::shared::face::DetectedFace;
use crate::shared::frame::{Frame, PixelFormat};

/// Domain interface for face detection on a single still image.
///
/// `&mut self` because backends own mutable inference sessions.
pub trait FaceDetector: Send {
    /// Whether `detect` accepts frames in `format` without conversion.
    fn supports_format(&self, format: PixelFormat) -> bool;

    /// Faces found in `frame`, in image pixel coordinates. An empty list
    /// means the detector ran and found nobody.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>>;
}
