pub mod mock_downstream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use squadron::agent::{AgentAdapter, TokenStore};
use squadron::bus::MessageBus;
use squadron::state::TeamStore;

pub use mock_downstream::{CallKind, MockDownstream, MockFailure, RecordedCall};

/// Everything a test harness needs, wired the way the binary wires it.
pub struct Harness {
    pub store: Arc<TeamStore>,
    pub bus: Arc<MessageBus>,
    pub tokens: Arc<TokenStore>,
    pub adapter: Arc<AgentAdapter>,
    pub mock: Arc<MockDownstream>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_deadline(Duration::from_secs(60))
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        let store = Arc::new(TeamStore::new(PathBuf::from("/tmp")));
        let bus = Arc::new(MessageBus::new());
        let tokens = Arc::new(TokenStore::new());
        let mock = Arc::new(MockDownstream::new());
        let adapter = Arc::new(AgentAdapter::new(
            Arc::clone(&mock) as Arc<dyn squadron::agent::Downstream>,
            Arc::clone(&store),
            Arc::clone(&tokens),
            deadline,
        ));
        adapter.set_comms_url("http://127.0.0.1:9");

        Self {
            store,
            bus,
            tokens,
            adapter,
            mock,
        }
    }
}
