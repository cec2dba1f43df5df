//! Downstream agent plumbing: the shared child-process session, the adapter
//! that multiplexes it across agents, and prompt composition.

mod adapter;
mod downstream;
pub mod prompt;
mod protocol;
mod token;

pub use adapter::AgentAdapter;
pub use downstream::{AgentReply, Downstream, StdioDownstream};
pub use protocol::codes as protocol_codes;
pub use protocol::{JsonRpcRequest, JsonRpcResponse, RpcError, StartConfig, StartParams};
pub use token::TokenStore;
