pub mod agent;
pub mod bus;
pub mod comms;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mission;
pub mod ops;
pub mod server;
pub mod state;
pub mod steering;

pub use agent::{AgentAdapter, Downstream, StdioDownstream, TokenStore};
pub use bus::{MessageBus, WaitOutcome};
pub use comms::CommsService;
pub use config::SquadronConfig;
pub use dispatch::{DispatchReport, DispatchSpec, Dispatcher};
pub use error::{Result, SquadronError};
pub use mission::{MissionEngine, MissionPhase, MissionRegistry};
pub use ops::Operations;
pub use server::{OperatorContext, OperatorServer};
pub use state::{AgentConfig, AgentStatus, TeamStore};
pub use steering::Steering;
