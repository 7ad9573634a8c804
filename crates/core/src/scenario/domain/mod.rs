pub mod scenario_error;
pub mod scenario_state;
pub mod scenario_state_machine;
