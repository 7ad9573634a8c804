use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use ffmpeg_next::util::error::{EACCES, EAGAIN, EBUSY, ENODEV, ENOENT, EPERM};

use crate::capture::domain::camera_platform::{
    CameraDevice, CameraPlatform, StreamEndedCallback, StreamFormat,
};
use crate::capture::domain::capture_error::CaptureError;
use crate::shared::frame::{Frame, PixelFormat};

/// Where the camera picture comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraSource {
    /// A capture device opened through an ffmpeg input device
    /// (`v4l2`, `avfoundation`, `dshow`).
    Device { path: String, input_format: String },
    /// A media file replayed at its own frame rate.
    File { path: PathBuf, looping: bool },
}

impl CameraSource {
    fn describe(&self) -> String {
        match self {
            CameraSource::Device { path, input_format } => format!("{input_format}:{path}"),
            CameraSource::File { path, .. } => path.display().to_string(),
        }
    }
}

/// Camera backed by libavformat/libavdevice.
///
/// Every acquired device owns one worker thread that holds the ffmpeg input
/// for its whole lifetime, so no ffmpeg object crosses threads.
pub struct FfmpegCameraPlatform {
    source: CameraSource,
}

impl FfmpegCameraPlatform {
    pub fn new(source: CameraSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }
}

impl CameraPlatform for FfmpegCameraPlatform {
    fn acquire(&self) -> Result<Box<dyn CameraDevice>, CaptureError> {
        let device = FfmpegCamera::open(self.source.clone())?;
        Ok(Box::new(device))
    }
}

enum Command {
    Start {
        format: StreamFormat,
        on_ended: StreamEndedCallback,
        reply: Sender<Result<(), CaptureError>>,
    },
    Stop,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    ended: bool,
}

/// Latest decoded frame, shared between the worker and `capture_frame`.
#[derive(Default)]
struct LatestFrame {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LatestFrame {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, frame: Frame) {
        self.lock().frame = Some(frame);
        self.ready.notify_all();
    }

    fn mark_ended(&self) {
        self.lock().ended = true;
        self.ready.notify_all();
    }

    fn reset(&self) {
        *self.lock() = Slot::default();
    }
}

struct FfmpegCamera {
    native: (u32, u32),
    negotiated: Option<StreamFormat>,
    streaming: bool,
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    latest: Arc<LatestFrame>,
}

impl FfmpegCamera {
    fn open(source: CameraSource) -> Result<Self, CaptureError> {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let latest = Arc::new(LatestFrame::default());
        let worker_latest = latest.clone();

        let worker = std::thread::Builder::new()
            .name("camera".into())
            .spawn(move || {
                let mut worker = match CaptureWorker::open(&source) {
                    Ok(worker) => worker,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((worker.width, worker.height)));
                worker.serve(&commands_rx, &worker_latest);
            })
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let opened = ready_rx
            .recv()
            .map_err(|_| CaptureError::Device("camera worker exited during open".into()));
        let native = match opened.and_then(|result| result) {
            Ok(native) => native,
            Err(e) => {
                let _ = worker.join();
                return Err(e);
            }
        };

        Ok(Self {
            native,
            negotiated: None,
            streaming: false,
            commands: commands_tx,
            worker: Some(worker),
            latest,
        })
    }
}

impl CameraDevice for FfmpegCamera {
    fn negotiate(&mut self, requested: StreamFormat) -> Result<StreamFormat, CaptureError> {
        let (native_width, native_height) = self.native;
        let width = if requested.width == 0 { native_width } else { requested.width };
        let height = if requested.height == 0 { native_height } else { requested.height };
        let format = StreamFormat {
            width: width & !1,
            height: height & !1,
            pixel_format: PixelFormat::Nv12,
        };
        if format.width == 0 || format.height == 0 {
            return Err(CaptureError::Device(format!(
                "cannot stream at {}x{}",
                format.width, format.height
            )));
        }
        self.negotiated = Some(format);
        Ok(format)
    }

    fn start_stream(&mut self, on_stream_ended: StreamEndedCallback) -> Result<(), CaptureError> {
        if self.streaming {
            return Ok(());
        }
        let format = self
            .negotiated
            .ok_or_else(|| CaptureError::Device("stream format was not negotiated".into()))?;

        self.latest.reset();
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(Command::Start {
                format,
                on_ended: on_stream_ended,
                reply: reply_tx,
            })
            .map_err(|_| CaptureError::StreamLost)?;
        reply_rx.recv().map_err(|_| CaptureError::StreamLost)??;
        self.streaming = true;
        Ok(())
    }

    fn capture_frame(
        &mut self,
        format: PixelFormat,
        timeout: Duration,
    ) -> Result<Frame, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::NotStreaming);
        }
        if format != PixelFormat::Nv12 {
            return Err(CaptureError::FormatMismatch {
                expected: PixelFormat::Nv12,
                actual: format,
            });
        }

        let deadline = Instant::now() + timeout;
        let mut slot = self.latest.lock();
        loop {
            if slot.ended {
                return Err(CaptureError::StreamLost);
            }
            if let Some(frame) = &slot.frame {
                return Ok(frame.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CaptureError::Timeout(timeout));
            }
            slot = self
                .latest
                .ready
                .wait_timeout(slot, remaining)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    fn stop_stream(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        let _ = self.commands.send(Command::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

enum StreamExit {
    Stopped,
    Ended,
}

/// Owns the ffmpeg input, decoder and scaler on the camera thread.
struct CaptureWorker {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    stream_index: usize,
    width: u32,
    height: u32,
    /// Zero for live devices, which pace themselves.
    frame_interval: Duration,
    looping: bool,
}

impl CaptureWorker {
    fn open(source: &CameraSource) -> Result<Self, CaptureError> {
        let input = open_input(source)?;

        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| {
                let reason = format!("{} has no video stream", source.describe());
                CaptureError::DeviceUnavailable(reason)
            })?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| CaptureError::Device(e.to_string()))?;
        let decoder = codec_ctx
            .decoder()
            .video()
            .map_err(|e| CaptureError::Device(e.to_string()))?;

        let (frame_interval, looping) = match source {
            CameraSource::Device { .. } => (Duration::ZERO, false),
            CameraSource::File { looping, .. } => {
                let rate = stream.rate();
                let interval = if rate.numerator() > 0 && rate.denominator() > 0 {
                    Duration::from_secs_f64(rate.denominator() as f64 / rate.numerator() as f64)
                } else {
                    Duration::ZERO
                };
                (interval, *looping)
            }
        };

        log::info!(
            "Opened camera {} ({}x{}, {:?})",
            source.describe(),
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            width: decoder.width(),
            height: decoder.height(),
            input,
            decoder,
            stream_index,
            frame_interval,
            looping,
        })
    }

    /// Handles commands until told to stop or the owner goes away.
    fn serve(&mut self, commands: &Receiver<Command>, latest: &LatestFrame) {
        while let Ok(command) = commands.recv() {
            let Command::Start {
                format,
                on_ended,
                reply,
            } = command
            else {
                return;
            };

            let mut scaler = match ffmpeg_next::software::scaling::Context::get(
                self.decoder.format(),
                self.width,
                self.height,
                ffmpeg_next::format::Pixel::NV12,
                format.width,
                format.height,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            ) {
                Ok(scaler) => scaler,
                Err(e) => {
                    let _ = reply.send(Err(CaptureError::Device(e.to_string())));
                    continue;
                }
            };
            let _ = reply.send(Ok(()));

            match self.stream(&mut scaler, format, commands, latest) {
                StreamExit::Stopped => return,
                StreamExit::Ended => {
                    latest.mark_ended();
                    on_ended();
                }
            }
        }
    }

    fn stream(
        &mut self,
        scaler: &mut ffmpeg_next::software::scaling::Context,
        format: StreamFormat,
        commands: &Receiver<Command>,
        latest: &LatestFrame,
    ) -> StreamExit {
        let mut index = 0usize;
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        let mut nv12 = ffmpeg_next::util::frame::video::Video::empty();

        loop {
            match commands.try_recv() {
                Ok(Command::Stop) | Err(TryRecvError::Disconnected) => return StreamExit::Stopped,
                Ok(Command::Start { reply, .. }) => {
                    let _ = reply.send(Ok(()));
                }
                Err(TryRecvError::Empty) => {}
            }

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                Err(ffmpeg_next::Error::Eof) => {
                    if self.looping && self.rewind() {
                        continue;
                    }
                    log::info!("Camera stream reached its end after {index} frames");
                    return StreamExit::Ended;
                }
                Err(e) => {
                    log::warn!("Camera read failed: {e}");
                    return StreamExit::Ended;
                }
            }

            if packet.stream() != self.stream_index || self.decoder.send_packet(&packet).is_err() {
                continue;
            }

            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if let Err(e) = scaler.run(&decoded, &mut nv12) {
                    log::warn!("Camera frame conversion failed: {e}");
                    return StreamExit::Ended;
                }
                let data = extract_nv12(&nv12, format.width, format.height);
                match Frame::try_new(data, format.width, format.height, PixelFormat::Nv12, index) {
                    Ok(frame) => latest.publish(frame),
                    Err(e) => {
                        log::warn!("Dropping malformed camera frame: {e}");
                        continue;
                    }
                }
                index += 1;
                if !self.frame_interval.is_zero() {
                    std::thread::sleep(self.frame_interval);
                }
            }
        }
    }

    /// Seeks back to the start of a file source. On failure the last frame
    /// stays published and the stream is treated as ended.
    fn rewind(&mut self) -> bool {
        match self.input.seek(0, ..) {
            Ok(()) => {
                self.decoder.flush();
                true
            }
            Err(e) => {
                log::warn!("Could not loop camera file: {e}");
                false
            }
        }
    }
}

fn open_input(source: &CameraSource) -> Result<ffmpeg_next::format::context::Input, CaptureError> {
    ffmpeg_next::init().map_err(|e| CaptureError::Device(e.to_string()))?;

    match source {
        CameraSource::File { path, .. } => {
            ffmpeg_next::format::input(path).map_err(classify_open_error)
        }
        CameraSource::Device { path, input_format } => {
            ffmpeg_next::device::register_all();
            let format = ffmpeg_next::device::input::video()
                .find(|f| f.name().split(',').any(|name| name == input_format))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!(
                        "ffmpeg input device '{input_format}' is not available"
                    ))
                })?;
            let context = ffmpeg_next::format::open_with(
                path.as_str(),
                &format,
                ffmpeg_next::Dictionary::new(),
            )
            .map_err(classify_open_error)?;
            match context {
                ffmpeg_next::format::context::Context::Input(input) => Ok(input),
                _ => Err(CaptureError::Device(format!("{path} did not open as an input"))),
            }
        }
    }
}

/// Maps libav open errors onto the capture taxonomy.
fn classify_open_error(err: ffmpeg_next::Error) -> CaptureError {
    match err {
        ffmpeg_next::Error::Other { errno } if errno == EACCES || errno == EPERM => {
            CaptureError::PermissionDenied
        }
        ffmpeg_next::Error::Other { errno }
            if errno == EBUSY || errno == ENOENT || errno == ENODEV =>
        {
            CaptureError::DeviceUnavailable(err.to_string())
        }
        other => CaptureError::Device(other.to_string()),
    }
}

/// Copies the Y and interleaved UV planes into one tightly packed buffer.
///
/// ffmpeg pads each row to its stride; the padding is dropped.
fn extract_nv12(
    frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut out = Vec::with_capacity(w * h * 3 / 2);
    copy_plane(frame, 0, w, h, &mut out);
    copy_plane(frame, 1, w, h / 2, &mut out);
    out
}

fn copy_plane(
    frame: &ffmpeg_next::util::frame::video::Video,
    plane: usize,
    row_bytes: usize,
    rows: usize,
    out: &mut Vec<u8>,
) {
    let stride = frame.stride(plane);
    let data = frame.data(plane);
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&data[start..start + row_bytes]);
    }
}
