//! Build/run cycle
//!
//! The orchestrator consumes queued changes one at a time and drives the
//! tidy, prebuild, clean, build and application supervisors through each
//! cycle. The rebuild trigger feeds manual requests into the same queue.

pub mod orchestrator;
pub mod state_machine;
pub mod trigger;

pub use orchestrator::{CycleOutcome, Orchestrator, Supervisors};
pub use state_machine::{CycleState, CycleStateMachine};
pub use trigger::spawn_rebuild_trigger;
