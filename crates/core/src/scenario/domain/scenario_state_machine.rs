use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::capture::domain::camera_platform::CameraPlatform;
use crate::capture::domain::capture_session::{
    CaptureSession, CaptureSettings, SessionEvent, SessionId,
};
use crate::conversion::frame_format_converter::to_display_format;
use crate::detection::domain::face_detection_service::FaceDetectionService;
use crate::scenario::domain::scenario_error::ScenarioError;
use crate::scenario::domain::scenario_state::{plan, Request, ScenarioState, Transition};
use crate::shared::face::{DetectedFace, DisplayRect};
use crate::shared::frame::Frame;
use crate::visualization::visualization_layer::VisualizationLayer;

/// What the machine is doing. A capture session exists only while
/// streaming, so Idle and Snapshot cannot hold the camera.
enum Mode {
    Idle,
    Streaming(CaptureSession),
    Snapshot,
}

/// Orchestrates capture, detection and display for the camera scenario.
///
/// Not thread-safe by construction: one owner drives every transition and
/// feeds it the session events from `session_events()`.
pub struct ScenarioStateMachine {
    mode: Mode,
    platform: Arc<dyn CameraPlatform>,
    capture_settings: CaptureSettings,
    detection: FaceDetectionService,
    layer: VisualizationLayer,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    last_session: Option<SessionId>,
}

impl ScenarioStateMachine {
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        capture_settings: CaptureSettings,
        detection: FaceDetectionService,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            mode: Mode::Idle,
            platform,
            capture_settings,
            detection,
            layer: VisualizationLayer::new(),
            events_tx,
            events_rx,
            last_session: None,
        }
    }

    pub fn state(&self) -> ScenarioState {
        match self.mode {
            Mode::Idle => ScenarioState::Idle,
            Mode::Streaming(_) => ScenarioState::Streaming,
            Mode::Snapshot => ScenarioState::Snapshot,
        }
    }

    pub fn layer(&self) -> &VisualizationLayer {
        &self.layer
    }

    /// Face boxes for the last known viewport size.
    pub fn overlay(&self) -> Vec<DisplayRect> {
        self.layer.overlay()
    }

    pub fn has_active_device(&self) -> bool {
        matches!(&self.mode, Mode::Streaming(session) if session.is_streaming())
    }

    /// Stream-ended notifications from capture sessions. The owner selects
    /// on this and passes each event to `handle_session_event`.
    pub fn session_events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Idle or Snapshot to Streaming, or Streaming to Idle.
    pub fn on_toggle_streaming(&mut self) -> Result<ScenarioState, ScenarioError> {
        self.dispatch(Request::ToggleStreaming)
    }

    /// Streaming to Snapshot, or Snapshot to Idle.
    pub fn on_toggle_snapshot(&mut self) -> Result<ScenarioState, ScenarioError> {
        self.dispatch(Request::ToggleSnapshot)
    }

    /// Remembers the viewport size and returns the rescaled overlay.
    pub fn on_viewport_resized(&mut self, width: u32, height: u32) -> Vec<DisplayRect> {
        self.layer.recompute_overlay(width, height)
    }

    /// Applies a notification that arrived while no transition was running.
    ///
    /// Only the newest session can end the stream; older ones are stale.
    /// Returns the new state when the event changed it.
    pub fn handle_session_event(&mut self, event: SessionEvent) -> Option<ScenarioState> {
        let SessionEvent::StreamEnded(id) = event;
        self.end_stream(id).then(|| self.state())
    }

    /// Releases the camera and discards any snapshot.
    pub fn force_idle(&mut self) {
        self.enter_idle();
    }

    fn dispatch(&mut self, request: Request) -> Result<ScenarioState, ScenarioError> {
        let from = self.state();
        let Some(transition) = plan(from, request) else {
            log::debug!("Ignoring {request:?} in {from}");
            return Ok(from);
        };

        let result = match (self.apply(transition), self.apply_latched_events()) {
            (Ok(()), true) => Err(ScenarioError::StreamLost),
            (result, _) => result,
        };

        match &result {
            Ok(()) => log::info!("{from} -> {} ({transition:?})", self.state()),
            Err(e) => log::warn!("{transition:?} from {from} failed: {e}"),
        }
        result.map(|()| self.state())
    }

    fn apply(&mut self, transition: Transition) -> Result<(), ScenarioError> {
        match transition {
            Transition::StartStreaming => self.start_streaming(),
            Transition::TakeSnapshot => self.take_snapshot(),
            Transition::StopStreaming | Transition::ClearSnapshot | Transition::ForceIdle => {
                self.enter_idle();
                Ok(())
            }
        }
    }

    /// Stream-ended notifications raised while a transition was running
    /// take effect now, even if the transition already closed that session.
    /// Returns whether one of them moved the scenario to Idle.
    fn apply_latched_events(&mut self) -> bool {
        let mut ended = false;
        while let Ok(SessionEvent::StreamEnded(id)) = self.events_rx.try_recv() {
            ended |= self.end_stream(id);
        }
        ended
    }

    fn end_stream(&mut self, id: SessionId) -> bool {
        if Some(id) != self.last_session {
            log::debug!("Ignoring stream end from stale session {id}");
            return false;
        }
        let from = self.state();
        let Some(transition) = plan(from, Request::StreamEnded) else {
            return false;
        };
        log::warn!("Camera stream of session {id} ended in {from}; returning to Idle");
        let _ = self.apply(transition);
        true
    }

    fn start_streaming(&mut self) -> Result<(), ScenarioError> {
        self.enter_idle();

        let id = SessionId(self.last_session.map_or(1, |SessionId(n)| n + 1));
        self.last_session = Some(id);
        let mut session = CaptureSession::new(
            id,
            self.platform.clone(),
            self.capture_settings.clone(),
            self.events_tx.clone(),
        );

        // On failure `session` is dropped here and holds nothing.
        session.start()?;
        self.mode = Mode::Streaming(session);
        Ok(())
    }

    /// Capture, detect and convert, then show the result and release the
    /// camera. Any failure before the layer is populated lands in Idle.
    fn take_snapshot(&mut self) -> Result<(), ScenarioError> {
        let Mode::Streaming(session) = &mut self.mode else {
            return Ok(());
        };

        match freeze_frame(session, &mut self.detection) {
            Ok((image, faces)) => {
                self.layer.set_snapshot(image, faces);
                let previous = std::mem::replace(&mut self.mode, Mode::Snapshot);
                if let Mode::Streaming(mut session) = previous {
                    session.stop();
                }
                if let Some(summary) = self.layer.face_summary() {
                    log::info!("{summary}");
                }
                Ok(())
            }
            Err(e) => {
                self.enter_idle();
                Err(e)
            }
        }
    }

    fn enter_idle(&mut self) {
        if let Mode::Streaming(mut session) = std::mem::replace(&mut self.mode, Mode::Idle) {
            session.stop();
        }
        self.layer.clear();
    }
}

/// One frame from the live stream, the faces in it, and its displayable
/// image, in that order.
fn freeze_frame(
    session: &mut CaptureSession,
    detection: &mut FaceDetectionService,
) -> Result<(Frame, Vec<DetectedFace>), ScenarioError> {
    let frame = session.get_current_frame()?;
    let faces = detection.detect(&frame)?;
    let image = to_display_format(&frame)?;
    Ok((image, faces))
}
