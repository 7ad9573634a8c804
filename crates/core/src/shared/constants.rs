use std::time::Duration;

pub const FACE_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const FACE_MODEL_URL: &str = concat!(
    "https://github.com/neutrinographics/faceguard/releases/download/",
    "v0.1.0/yolo11n-pose_widerface.onnx"
);

/// Directory name under the platform cache dir where models are stored.
pub const MODEL_CACHE_APP_DIR: &str = "facesnap";

pub const DEFAULT_CAPTURE_WIDTH: u32 = 640;
pub const DEFAULT_CAPTURE_HEIGHT: u32 = 480;

/// How long a snapshot waits for the stream to deliver its first frame.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(3);

/// Yellow 2px stroke for face boxes.
pub const OVERLAY_STROKE_RGBA: [u8; 4] = [255, 255, 0, 255];
pub const OVERLAY_STROKE_WIDTH: u32 = 2;
