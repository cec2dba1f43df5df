//! Missions: a lead plus workers run an objective asynchronously, with an
//! optional verification command, bounded fix retries, and a post-mortem
//! comms snapshot retained after the team is gone.

mod engine;
mod prompts;
mod registry;
mod types;
mod verify;

pub use engine::MissionEngine;
pub use registry::MissionRegistry;
pub use types::{
    CommsSnapshot, FixAssignment, MissionPhase, MissionRecord, MissionStatusView, VerifyAttempt,
    WorkerResult,
};
pub use verify::{run_verify, VerifyOutcome};
