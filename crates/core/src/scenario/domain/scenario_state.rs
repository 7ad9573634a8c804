use std::fmt;

/// The single mode the scenario is in. Drives which controls are live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScenarioState {
    Idle,
    Streaming,
    Snapshot,
}

impl ScenarioState {
    /// Caption for the streaming toggle.
    pub fn streaming_label(&self) -> &'static str {
        match self {
            ScenarioState::Streaming => "Stop Streaming",
            ScenarioState::Idle | ScenarioState::Snapshot => "Start Streaming",
        }
    }

    /// Caption for the snapshot toggle.
    pub fn snapshot_label(&self) -> &'static str {
        match self {
            ScenarioState::Snapshot => "Clear Display",
            ScenarioState::Idle | ScenarioState::Streaming => "Take Snapshot",
        }
    }

    /// The snapshot toggle does nothing in Idle, so the UI disables it.
    pub fn snapshot_enabled(&self) -> bool {
        !matches!(self, ScenarioState::Idle)
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScenarioState::Idle => "Idle",
            ScenarioState::Streaming => "Streaming",
            ScenarioState::Snapshot => "Snapshot",
        };
        f.write_str(name)
    }
}

/// Inputs that can move the scenario between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    ToggleStreaming,
    ToggleSnapshot,
    /// The camera stopped on its own.
    StreamEnded,
}

/// Work the state machine performs for an accepted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Discard any snapshot, then open a new capture session.
    StartStreaming,
    StopStreaming,
    /// Capture, detect, convert, show, then release the camera.
    TakeSnapshot,
    ClearSnapshot,
    ForceIdle,
}

/// The transition table. Pairs that map to `None` are ignored.
pub fn plan(state: ScenarioState, request: Request) -> Option<Transition> {
    use ScenarioState::*;

    match (state, request) {
        (Idle, Request::StreamEnded) => None,
        (Streaming | Snapshot, Request::StreamEnded) => Some(Transition::ForceIdle),
        (Idle, Request::ToggleStreaming) => Some(Transition::StartStreaming),
        (Idle, Request::ToggleSnapshot) => None,
        (Streaming, Request::ToggleStreaming) => Some(Transition::StopStreaming),
        (Streaming, Request::ToggleSnapshot) => Some(Transition::TakeSnapshot),
        (Snapshot, Request::ToggleStreaming) => Some(Transition::StartStreaming),
        (Snapshot, Request::ToggleSnapshot) => Some(Transition::ClearSnapshot),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ScenarioState::Idle, Request::ToggleStreaming, Some(Transition::StartStreaming))]
    #[case(ScenarioState::Idle, Request::ToggleSnapshot, None)]
    #[case(ScenarioState::Idle, Request::StreamEnded, None)]
    #[case(ScenarioState::Streaming, Request::ToggleStreaming, Some(Transition::StopStreaming))]
    #[case(ScenarioState::Streaming, Request::ToggleSnapshot, Some(Transition::TakeSnapshot))]
    #[case(ScenarioState::Streaming, Request::StreamEnded, Some(Transition::ForceIdle))]
    #[case(ScenarioState::Snapshot, Request::ToggleStreaming, Some(Transition::StartStreaming))]
    #[case(ScenarioState::Snapshot, Request::ToggleSnapshot, Some(Transition::ClearSnapshot))]
    #[case(ScenarioState::Snapshot, Request::StreamEnded, Some(Transition::ForceIdle))]
    fn test_transition_table(
        #[case] state: ScenarioState,
        #[case] request: Request,
        #[case] expected: Option<Transition>,
    ) {
        assert_eq!(plan(state, request), expected);
    }

    #[rstest]
    #[case(ScenarioState::Idle, "Start Streaming", "Take Snapshot", false)]
    #[case(ScenarioState::Streaming, "Stop Streaming", "Take Snapshot", true)]
    #[case(ScenarioState::Snapshot, "Start Streaming", "Clear Display", true)]
    fn test_control_labels(
        #[case] state: ScenarioState,
        #[case] streaming: &str,
        #[case] snapshot: &str,
        #[case] snapshot_enabled: bool,
    ) {
        assert_eq!(state.streaming_label(), streaming);
        assert_eq!(state.snapshot_label(), snapshot);
        assert_eq!(state.snapshot_enabled(), snapshot_enabled);
    }
}
