use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use facesnap_core::capture::domain::capture_session::CaptureSettings;
use facesnap_core::capture::infrastructure::ffmpeg_camera::{CameraSource, FfmpegCameraPlatform};
use facesnap_core::detection::domain::face_detection_service::FaceDetectionService;
use facesnap_core::detection::infrastructure::model_resolver;
use facesnap_core::detection::infrastructure::onnx_face_detector::{
    DetectorSettings, OnnxFaceDetector,
};
use facesnap_core::scenario::domain::scenario_state::ScenarioState;
use facesnap_core::scenario::domain::scenario_state_machine::ScenarioStateMachine;
use facesnap_core::scenario::infrastructure::threaded_scenario_runner::{
    ScenarioHandle, ScenarioUpdate, ThreadedScenarioRunner,
};
use facesnap_core::shared::constants::FACE_MODEL_NAME;
use facesnap_core::shared::face::DisplayRect;
use facesnap_core::shared::frame::Frame;
use facesnap_core::visualization::overlay_renderer::{save_png, OverlayRenderer};

/// Upper bound on any single step of the scenario, model inference included.
const STEP_TIMEOUT: Duration = Duration::from_secs(60);

/// Freeze a camera frame, find the faces on it and save the overlay.
#[derive(Parser)]
#[command(name = "facesnap")]
struct Cli {
    /// Capture device (e.g. /dev/video0) or a video file replayed as a camera.
    source: String,

    /// Output PNG file.
    output: PathBuf,

    /// ffmpeg input device for SOURCE (v4l2, avfoundation, dshow).
    /// Without it SOURCE is treated as a file.
    #[arg(long)]
    device_format: Option<String>,

    /// Requested capture width (0 = device native).
    #[arg(long, default_value = "640")]
    width: u32,

    /// Requested capture height (0 = device native).
    #[arg(long, default_value = "480")]
    height: u32,

    /// Time to let the stream run before taking the snapshot, in milliseconds.
    #[arg(long, default_value = "500")]
    warmup_ms: u64,

    /// Longest the snapshot waits for a frame, in milliseconds.
    #[arg(long, default_value = "3000")]
    frame_timeout_ms: u64,

    /// Viewport to render the overlay at, as WIDTHxHEIGHT. Repeatable.
    /// Defaults to the snapshot's own size.
    #[arg(long)]
    viewport: Vec<String>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value = "0.25")]
    confidence: f64,

    /// ONNX face model to use instead of the cached download.
    #[arg(long)]
    model: Option<PathBuf>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let viewports = validate(&cli)?;

    let detection = build_detection(&cli)?;
    let platform = Arc::new(FfmpegCameraPlatform::new(camera_source(&cli)));
    let settings = CaptureSettings {
        width: cli.width,
        height: cli.height,
        frame_timeout: Duration::from_millis(cli.frame_timeout_ms),
    };
    let machine = ScenarioStateMachine::new(platform, settings, detection);
    let handle = ThreadedScenarioRunner::new().spawn(machine);

    handle.toggle_streaming()?;
    let (state, _) = wait_for_state(&handle)?;
    if state != ScenarioState::Streaming {
        return Err(format!("Camera did not start streaming (state: {state})").into());
    }
    log::info!("Streaming from {}", cli.source);
    std::thread::sleep(Duration::from_millis(cli.warmup_ms));

    handle.toggle_snapshot()?;
    let (state, image) = wait_for_state(&handle)?;
    let image = match (state, image) {
        (ScenarioState::Snapshot, Some(image)) => image,
        _ => return Err(format!("Snapshot was not taken (state: {state})").into()),
    };

    let viewports = if viewports.is_empty() {
        vec![(image.width(), image.height())]
    } else {
        viewports
    };
    render_viewports(&handle, &image, &cli.output, &viewports)?;

    handle.shutdown();
    Ok(())
}

/// Resizes the scenario's viewport to each size and draws the face boxes it
/// publishes for that size over the still image.
fn render_viewports(
    handle: &ScenarioHandle,
    image: &Frame,
    output: &Path,
    viewports: &[(u32, u32)],
) -> Result<(), Box<dyn std::error::Error>> {
    let renderer = OverlayRenderer::new();

    for &(width, height) in viewports {
        handle.resize_viewport(width, height);
        let rects = wait_for_overlay(handle)?;
        for rect in &rects {
            log::debug!(
                "{width}x{height}: face at ({:.1}, {:.1}) size {:.1}x{:.1}",
                rect.x,
                rect.y,
                rect.width,
                rect.height
            );
        }

        let canvas = renderer
            .render(image, &rects, width, height)
            .ok_or_else(|| format!("Cannot render a {width}x{height} overlay"))?;
        let path = output_path(output, width, height, viewports.len() > 1);
        save_png(&path, &canvas)?;
        log::info!(
            "Overlay with {} face(s) written to {}",
            rects.len(),
            path.display()
        );
    }
    Ok(())
}

/// Drains updates up to the next state change, failing on any reported error.
/// Also returns the still image if a snapshot was delivered on the way.
fn wait_for_state(
    handle: &ScenarioHandle,
) -> Result<(ScenarioState, Option<Frame>), Box<dyn std::error::Error>> {
    let mut snapshot = None;
    loop {
        match handle.updates().recv_timeout(STEP_TIMEOUT)? {
            ScenarioUpdate::StateChanged(state) => return Ok((state, snapshot)),
            ScenarioUpdate::Failed(e) => return Err(e.into()),
            ScenarioUpdate::SnapshotReady { image, summary, .. } => {
                println!("{summary}");
                snapshot = Some(image);
            }
            ScenarioUpdate::OverlayUpdated(_) => {}
        }
    }
}

fn wait_for_overlay(
    handle: &ScenarioHandle,
) -> Result<Vec<DisplayRect>, Box<dyn std::error::Error>> {
    loop {
        match handle.updates().recv_timeout(STEP_TIMEOUT)? {
            ScenarioUpdate::OverlayUpdated(rects) => return Ok(rects),
            ScenarioUpdate::Failed(e) => return Err(e.into()),
            ScenarioUpdate::StateChanged(state) => {
                return Err(format!("Scenario left the snapshot (state: {state})").into())
            }
            ScenarioUpdate::SnapshotReady { .. } => {}
        }
    }
}

fn build_detection(cli: &Cli) -> Result<FaceDetectionService, Box<dyn std::error::Error>> {
    let model_path = match &cli.model {
        Some(path) => path.clone(),
        None => {
            log::info!("Resolving model: {FACE_MODEL_NAME}");
            let path = model_resolver::resolve_face_model(Some(Box::new(download_progress)))?;
            eprintln!();
            path
        }
    };

    let detector = OnnxFaceDetector::new(
        &model_path,
        DetectorSettings {
            confidence: cli.confidence,
        },
    )?;
    Ok(FaceDetectionService::new(Box::new(detector)))
}

fn camera_source(cli: &Cli) -> CameraSource {
    match &cli.device_format {
        Some(input_format) => CameraSource::Device {
            path: cli.source.clone(),
            input_format: input_format.clone(),
        },
        None => CameraSource::File {
            path: PathBuf::from(&cli.source),
            looping: true,
        },
    }
}

fn validate(cli: &Cli) -> Result<Vec<(u32, u32)>, Box<dyn std::error::Error>> {
    if cli.device_format.is_none() && !Path::new(&cli.source).exists() {
        return Err(format!("Source file not found: {}", cli.source).into());
    }
    if let Some(model) = &cli.model {
        if !model.exists() {
            return Err(format!("Model file not found: {}", model.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if cli.frame_timeout_ms == 0 {
        return Err("Frame timeout must be positive".into());
    }
    cli.viewport
        .iter()
        .map(|v| parse_viewport(v).map_err(Into::into))
        .collect()
}

fn parse_viewport(value: &str) -> Result<(u32, u32), String> {
    let invalid = || format!("Viewport must be WIDTHxHEIGHT with positive sizes, got '{value}'");
    let (w, h) = value.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = w.trim().parse().map_err(|_| invalid())?;
    let height: u32 = h.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok((width, height))
}

/// `out.png` for a single viewport, `out_640x480.png` when rendering several.
fn output_path(output: &Path, width: u32, height: u32, suffixed: bool) -> PathBuf {
    if !suffixed {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "overlay".to_string());
    output.with_file_name(format!("{stem}_{width}x{height}.png"))
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face detection model... {pct}%");
    } else {
        eprint!("\rDownloading face detection model... {downloaded} bytes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_viewport() {
        assert_eq!(parse_viewport("640x480"), Ok((640, 480)));
        assert_eq!(parse_viewport("1280X720"), Ok((1280, 720)));
    }

    #[test]
    fn test_parse_viewport_rejects_malformed() {
        assert!(parse_viewport("640").is_err());
        assert!(parse_viewport("0x480").is_err());
        assert!(parse_viewport("axb").is_err());
    }

    #[test]
    fn test_output_path_single_viewport_is_unchanged() {
        let out = Path::new("shots/face.png");
        assert_eq!(output_path(out, 320, 240, false), PathBuf::from("shots/face.png"));
    }

    #[test]
    fn test_output_path_suffixes_each_viewport() {
        let out = Path::new("shots/face.png");
        assert_eq!(
            output_path(out, 320, 240, true),
            PathBuf::from("shots/face_320x240.png")
        );
    }
}
