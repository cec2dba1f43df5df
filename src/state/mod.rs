//! Teams, agents, and tasks: the orchestrator's in-memory state.

mod store;
mod task;
mod team;

pub use store::{AgentSummary, TeamStore, TeamSummary};
pub use task::{Task, TaskStatus};
pub use team::{
    Agent, AgentConfig, AgentStatus, ApprovalPolicy, ReasoningEffort, SandboxMode, Team,
};
