use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::scenario::domain::scenario_error::ScenarioError;
use crate::scenario::domain::scenario_state::ScenarioState;
use crate::scenario::domain::scenario_state_machine::ScenarioStateMachine;
use crate::shared::face::{DetectedFace, DisplayRect};
use crate::shared::frame::Frame;

/// What the control thread reports back to the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum ScenarioUpdate {
    /// Sent after every toggle, successful or not, and after a stream loss.
    StateChanged(ScenarioState),
    /// A new still image and the faces found on it.
    SnapshotReady {
        image: Frame,
        faces: Vec<DetectedFace>,
        summary: String,
    },
    /// Face boxes for the current viewport.
    OverlayUpdated(Vec<DisplayRect>),
    Failed(ScenarioError),
}

enum Command {
    ToggleStreaming,
    ToggleSnapshot,
    Resize(u32, u32),
    Shutdown,
}

/// Hosts a [`ScenarioStateMachine`] on its own control thread.
///
/// Layout: `UI → commands → control [state machine] → updates → UI`, with
/// the capture sessions' stream-ended events selected alongside commands.
pub struct ThreadedScenarioRunner;

impl ThreadedScenarioRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn spawn(&self, machine: ScenarioStateMachine) -> ScenarioHandle {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (update_tx, update_rx) = crossbeam_channel::unbounded();
        let in_flight = Arc::new(AtomicBool::new(false));
        let worker_in_flight = in_flight.clone();

        let worker = std::thread::spawn(move || {
            run_control_loop(machine, &command_rx, &update_tx, &worker_in_flight);
        });

        ScenarioHandle {
            commands: command_tx,
            updates: update_rx,
            in_flight,
            worker: Some(worker),
        }
    }
}

impl Default for ThreadedScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// The UI's side of a running scenario. Dropping it shuts the scenario
/// down and releases the camera.
pub struct ScenarioHandle {
    commands: Sender<Command>,
    updates: Receiver<ScenarioUpdate>,
    in_flight: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ScenarioHandle {
    /// Queues a streaming toggle. Rejected while another toggle is running.
    pub fn toggle_streaming(&self) -> Result<(), ScenarioError> {
        self.submit_toggle(Command::ToggleStreaming)
    }

    /// Queues a snapshot toggle. Rejected while another toggle is running.
    pub fn toggle_snapshot(&self) -> Result<(), ScenarioError> {
        self.submit_toggle(Command::ToggleSnapshot)
    }

    /// Queues a viewport size change; these are never rejected.
    pub fn resize_viewport(&self, width: u32, height: u32) {
        let _ = self.commands.send(Command::Resize(width, height));
    }

    pub fn updates(&self) -> &Receiver<ScenarioUpdate> {
        &self.updates
    }

    /// Forces Idle and waits for the control thread to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
    }

    fn submit_toggle(&self, command: Command) -> Result<(), ScenarioError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(ScenarioError::Busy);
        }
        if self.commands.send(command).is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
            return Err(ScenarioError::Stopped);
        }
        Ok(())
    }

    fn stop_worker(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ScenarioHandle {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

fn run_control_loop(
    mut machine: ScenarioStateMachine,
    commands: &Receiver<Command>,
    updates: &Sender<ScenarioUpdate>,
    in_flight: &AtomicBool,
) {
    let events = machine.session_events();
    loop {
        crossbeam_channel::select! {
            recv(commands) -> command => match command {
                Ok(Command::ToggleStreaming) => {
                    let before = machine.state();
                    let result = machine.on_toggle_streaming();
                    in_flight.store(false, Ordering::SeqCst);
                    publish_toggle(&machine, before, result, updates);
                }
                Ok(Command::ToggleSnapshot) => {
                    let before = machine.state();
                    let result = machine.on_toggle_snapshot();
                    in_flight.store(false, Ordering::SeqCst);
                    publish_toggle(&machine, before, result, updates);
                }
                Ok(Command::Resize(width, height)) => {
                    let rects = machine.on_viewport_resized(width, height);
                    if machine.state() == ScenarioState::Snapshot {
                        let _ = updates.send(ScenarioUpdate::OverlayUpdated(rects));
                    }
                }
                Ok(Command::Shutdown) | Err(_) => break,
            },
            recv(events) -> event => {
                let Ok(event) = event else { continue };
                if let Some(state) = machine.handle_session_event(event) {
                    let _ = updates.send(ScenarioUpdate::Failed(ScenarioError::StreamLost));
                    let _ = updates.send(ScenarioUpdate::StateChanged(state));
                }
            },
        }
    }

    machine.force_idle();
    log::info!("Scenario control thread stopped");
}

fn publish_toggle(
    machine: &ScenarioStateMachine,
    before: ScenarioState,
    result: Result<ScenarioState, ScenarioError>,
    updates: &Sender<ScenarioUpdate>,
) {
    if let Err(e) = result {
        let _ = updates.send(ScenarioUpdate::Failed(e));
    }

    let state = machine.state();
    if state == ScenarioState::Snapshot && before != ScenarioState::Snapshot {
        let layer = machine.layer();
        if let (Some(image), Some(summary)) = (layer.image(), layer.face_summary()) {
            let _ = updates.send(ScenarioUpdate::SnapshotReady {
                image: image.clone(),
                faces: layer.faces().to_vec(),
                summary,
            });
            let _ = updates.send(ScenarioUpdate::OverlayUpdated(machine.overlay()));
        }
    }
    let _ = updates.send(ScenarioUpdate::StateChanged(state));
}
