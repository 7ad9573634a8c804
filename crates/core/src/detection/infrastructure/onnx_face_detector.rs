/// YOLO face detector using ONNX Runtime via `ort`.
///
/// Handles letterbox preprocessing straight from the camera layout,
/// inference, confidence filtering and NMS, then maps boxes back to the
/// pixel grid of the source frame.
use std::path::Path;

use crate::conversion::frame_format_converter::rgb_at;
use crate::detection::domain::face_detector::FaceDetector;
use crate::shared::face::DetectedFace;
use crate::shared::frame::{Frame, PixelFormat};

/// Fallback model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Default confidence threshold for face detection.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Letterbox padding value (YOLO convention).
const PAD_VALUE: f32 = 114.0 / 255.0;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// Minimum score, 0.0-1.0, for a box to be reported.
    pub confidence: f64,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
        }
    }
}

/// YOLO face detector backed by an ONNX Runtime session.
pub struct OnnxFaceDetector {
    session: ort::session::Session,
    confidence: f64,
    input_size: u32,
}

impl OnnxFaceDetector {
    /// Load a YOLO ONNX model and prepare for inference.
    ///
    /// The input resolution is read from the model's NCHW input shape, with
    /// 640 used when the shape is dynamic.
    pub fn new(
        model_path: &Path,
        settings: DetectorSettings,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(model_path)?;

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { ref shape, .. }
                    if shape.len() >= 4 && shape[2] > 0 =>
                {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        log::info!(
            "Loaded face model {} ({input_size}px input, confidence {:.2})",
            model_path.display(),
            settings.confidence
        );

        Ok(Self {
            session,
            confidence: settings.confidence,
            input_size,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn supports_format(&self, format: PixelFormat) -> bool {
        samples_directly(format)
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Box<dyn std::error::Error>> {
        let (input_tensor, geometry) = letterbox(frame, self.input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor)?;
        let outputs = self.session.run(ort::inputs![input_value])?;
        if outputs.len() == 0 {
            return Err("face model produced no outputs".into());
        }
        let tensor = outputs[0].try_extract_array::<f32>()?;
        let data = tensor.as_slice().ok_or("face model output is not contiguous")?;

        let mut raw = parse_detections(data, tensor.shape(), self.confidence, &geometry)?;
        let kept = nms(&mut raw, NMS_IOU_THRESH);

        Ok(kept
            .iter()
            .filter_map(|d| to_face(d, frame.width(), frame.height()))
            .collect())
    }
}

/// Layouts `letterbox` can read pixel by pixel.
fn samples_directly(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::Nv12 | PixelFormat::Yuyv | PixelFormat::Rgb8 | PixelFormat::Bgra8
    )
}

/// Return the preferred ONNX execution providers for the current platform.
///
/// An empty list leaves ort on its CPU provider.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// How the frame was placed inside the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

/// Letterbox-resize a frame to `target_size` x `target_size`, normalised to
/// 0.0-1.0 RGB in NCHW order.
///
/// Pixels are sampled from the frame's own layout, so YUV frames never need
/// a separate conversion pass.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    let side = target_size as usize;
    let mut tensor = ndarray::Array4::<f32>::from_elem((1, 3, side, side), PAD_VALUE);

    // Nearest-neighbour resize into the padded region.
    for y in 0..new_h {
        let src_y = ((y as f64 / scale) as u32).min(frame.height() - 1);
        for x in 0..new_w {
            let src_x = ((x as f64 / scale) as u32).min(frame.width() - 1);
            let Some(rgb) = rgb_at(frame, src_x, src_y) else {
                continue;
            };
            let ty = (pad_y + y) as usize;
            let tx = (pad_x + x) as usize;
            for (c, value) in rgb.iter().enumerate() {
                tensor[[0, c, ty, tx]] = *value as f32 / 255.0;
            }
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct RawDetection {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
}

impl RawDetection {
    fn bbox(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

/// Reads `[cx, cy, w, h, conf, ...]` rows above `confidence` and maps them
/// from letterbox to frame coordinates.
///
/// YOLO exports either `[1, features, detections]` or
/// `[1, detections, features]`; both are accepted.
fn parse_detections(
    data: &[f32],
    shape: &[usize],
    confidence: f64,
    geometry: &Letterbox,
) -> Result<Vec<RawDetection>, Box<dyn std::error::Error>> {
    if shape.len() != 3 {
        return Err(format!("unexpected face model output shape: {shape:?}").into());
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if num_feats < 5 || data.len() < num_dets * num_feats {
        return Err(format!("face model output too small for shape {shape:?}").into());
    }

    let feature = |det: usize, feat: usize| -> f64 {
        let i = if transposed {
            feat * num_dets + det
        } else {
            det * num_feats + feat
        };
        data[i] as f64
    };

    let pad_x = geometry.pad_x as f64;
    let pad_y = geometry.pad_y as f64;
    let mut dets = Vec::new();
    for i in 0..num_dets {
        let conf = feature(i, 4);
        if conf < confidence {
            continue;
        }
        let (cx, cy, w, h) = (feature(i, 0), feature(i, 1), feature(i, 2), feature(i, 3));
        dets.push(RawDetection {
            x1: (cx - w / 2.0 - pad_x) / geometry.scale,
            y1: (cy - h / 2.0 - pad_y) / geometry.scale,
            x2: (cx + w / 2.0 - pad_x) / geometry.scale,
            y2: (cy + h / 2.0 - pad_y) / geometry.scale,
            confidence: conf,
        });
    }
    Ok(dets)
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [RawDetection], iou_thresh: f64) -> Vec<RawDetection> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for det in dets.iter() {
        if keep
            .iter()
            .all(|kept| bbox_iou(&kept.bbox(), &det.bbox()) <= iou_thresh)
        {
            keep.push(det.clone());
        }
    }
    keep
}

/// IoU between two bounding boxes represented as `[x1, y1, x2, y2]`.
fn bbox_iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter == 0.0 {
        return 0.0;
    }
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter)
}

/// Clamps a detection to the frame and rounds it to whole pixels.
/// Boxes that collapse to nothing are dropped.
fn to_face(det: &RawDetection, frame_w: u32, frame_h: u32) -> Option<DetectedFace> {
    let fw = frame_w as f64;
    let fh = frame_h as f64;
    let x1 = det.x1.clamp(0.0, fw).round() as u32;
    let y1 = det.y1.clamp(0.0, fh).round() as u32;
    let x2 = det.x2.clamp(0.0, fw).round() as u32;
    let y2 = det.y2.clamp(0.0, fh).round() as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(DetectedFace::new(x1, y1, x2 - x1, y2 - y1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn rgb_frame(width: u32, height: u32, value: u8) -> Frame {
        let data = vec![value; (width * height * 3) as usize];
        Frame::try_new(data, width, height, PixelFormat::Rgb8, 0).unwrap()
    }

    fn raw(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64) -> RawDetection {
        RawDetection {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0,
        pad_y: 0,
    };

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // 200x100 -> 640: scale 3.2, content 640x320, 160px bars top and bottom.
        let (tensor, geometry) = letterbox(&rgb_frame(200, 100, 128), 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_relative_eq!(geometry.scale, 3.2, epsilon = 1e-9);
        assert_eq!(geometry.pad_x, 0);
        assert_eq!(geometry.pad_y, 160);
    }

    #[test]
    fn test_letterbox_values_normalized() {
        let (tensor, geometry) = letterbox(&rgb_frame(100, 50, 255), 640);

        let y = geometry.pad_y as usize + 1;
        assert_relative_eq!(tensor[[0, 0, y, 1]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(tensor[[0, 0, 0, 0]], PAD_VALUE, epsilon = 1e-6);
    }

    #[test]
    fn test_letterbox_samples_nv12_directly() {
        // Y=235 with neutral chroma is white.
        let mut data = vec![235u8; 4 * 4];
        data.extend_from_slice(&[128u8; 4 * 2]);
        let frame = Frame::try_new(data, 4, 4, PixelFormat::Nv12, 0).unwrap();

        let (tensor, _) = letterbox(&frame, 8);

        for c in 0..3 {
            assert_relative_eq!(tensor[[0, c, 3, 3]], 1.0, epsilon = 1e-6);
        }
    }

    #[rstest]
    #[case::nv12(PixelFormat::Nv12, true)]
    #[case::yuyv(PixelFormat::Yuyv, true)]
    #[case::rgb(PixelFormat::Rgb8, true)]
    #[case::bgra(PixelFormat::Bgra8, true)]
    #[case::mjpeg(PixelFormat::Mjpeg, false)]
    fn test_samples_directly(#[case] format: PixelFormat, #[case] expected: bool) {
        assert_eq!(samples_directly(format), expected);
    }

    /// Six detections, `[cx, cy, w, h, conf]` each; unused slots score zero.
    fn rows(dets: &[[f32; 5]]) -> Vec<[f32; 5]> {
        let mut rows = dets.to_vec();
        rows.resize(6, [0.0; 5]);
        rows
    }

    #[test]
    fn test_parse_row_major_output() {
        let data: Vec<f32> = rows(&[[50.0, 40.0, 20.0, 10.0, 0.9], [10.0, 10.0, 4.0, 4.0, 0.1]])
            .concat();
        let dets = parse_detections(&data, &[1, 6, 5], 0.25, &IDENTITY).unwrap();

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox(), [40.0, 35.0, 60.0, 45.0]);
    }

    #[test]
    fn test_parse_transposed_output() {
        let rows = rows(&[[10.0, 10.0, 4.0, 4.0, 0.3], [20.0, 20.0, 4.0, 4.0, 0.8]]);
        let data: Vec<f32> = (0..5).flat_map(|f| rows.iter().map(move |r| r[f])).collect();
        let dets = parse_detections(&data, &[1, 5, 6], 0.25, &IDENTITY).unwrap();

        assert_eq!(dets.len(), 2);
        assert_eq!(dets[1].bbox(), [18.0, 18.0, 22.0, 22.0]);
    }

    #[test]
    fn test_parse_undoes_letterbox() {
        let geometry = Letterbox {
            scale: 2.0,
            pad_x: 0,
            pad_y: 100,
        };
        let data = rows(&[[100.0, 200.0, 40.0, 40.0, 0.9]]).concat();
        let dets = parse_detections(&data, &[1, 6, 5], 0.25, &geometry).unwrap();

        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox(), [40.0, 40.0, 60.0, 60.0]);
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        assert!(parse_detections(&[0.0; 4], &[4], 0.25, &IDENTITY).is_err());
        assert!(parse_detections(&[0.0; 4], &[1, 1, 4], 0.25, &IDENTITY).is_err());
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let mut dets = vec![
            raw(0.0, 0.0, 100.0, 100.0, 0.8),
            raw(5.0, 5.0, 105.0, 105.0, 0.9),
        ];
        let kept = nms(&mut dets, 0.3);
        assert_eq!(kept.len(), 1);
        assert_relative_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn test_nms_keeps_non_overlapping() {
        let mut dets = vec![
            raw(0.0, 0.0, 50.0, 50.0, 0.9),
            raw(200.0, 200.0, 250.0, 250.0, 0.8),
        ];
        assert_eq!(nms(&mut dets, 0.3).len(), 2);
    }

    #[test]
    fn test_nms_empty_input() {
        assert!(nms(&mut [], 0.3).is_empty());
    }

    #[test]
    fn test_bbox_iou_partial_overlap() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [5.0, 5.0, 15.0, 15.0];
        assert_relative_eq!(bbox_iou(&a, &b), 25.0 / 175.0, epsilon = 1e-12);
        assert_eq!(bbox_iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    }

    #[test]
    fn test_to_face_clamps_to_frame() {
        let face = to_face(&raw(-10.0, 5.4, 70.0, 90.0, 0.9), 64, 48).unwrap();
        assert_eq!(face, DetectedFace::new(0, 5, 64, 43));
    }

    #[test]
    fn test_to_face_drops_boxes_outside_frame() {
        assert!(to_face(&raw(70.0, 10.0, 90.0, 20.0, 0.9), 64, 48).is_none());
    }
}
