use std::collections::HashMap;

use parking_lot::RwLock;

/// Per-agent identity tokens. Minted lazily on first use and held for the
/// agent's lifetime; the comms service checks them on every handshake.
#[derive(Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, agent_id: &str) -> String {
        if let Some(token) = self.tokens.read().get(agent_id) {
            return token.clone();
        }
        let mut tokens = self.tokens.write();
        tokens
            .entry(agent_id.to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone()
    }

    pub fn verify(&self, agent_id: &str, token: &str) -> bool {
        self.tokens
            .read()
            .get(agent_id)
            .is_some_and(|t| t == token)
    }

    pub fn revoke(&self, agent_id: &str) {
        self.tokens.write().remove(agent_id);
    }

    pub fn revoke_all(&self, agent_ids: &[String]) {
        let mut tokens = self.tokens.write();
        for id in agent_ids {
            tokens.remove(id);
        }
    }
}
