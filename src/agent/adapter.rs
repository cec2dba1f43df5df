//! Multiplexes the single downstream session across every agent.
//!
//! Calls for one agent are strictly serialized behind a per-agent lock;
//! calls for different agents run concurrently. This is the only fence
//! between concurrent orchestration and the downstream's one-thread-per-
//! conversation model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::downstream::{AgentReply, Downstream};
use super::prompt;
use super::protocol::{McpServerEntry, StartConfig, StartParams};
use super::token::TokenStore;
use crate::error::{Result, SquadronError};
use crate::state::{Agent, AgentStatus, TeamStore};

pub struct AgentAdapter {
    downstream: Arc<dyn Downstream>,
    store: Arc<TeamStore>,
    tokens: Arc<TokenStore>,
    comms_url: RwLock<Option<String>>,
    call_deadline: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancels: Mutex<HashMap<String, oneshot::Sender<()>>>,
    tracked: Mutex<Vec<JoinHandle<()>>>,
}

impl AgentAdapter {
    pub fn new(
        downstream: Arc<dyn Downstream>,
        store: Arc<TeamStore>,
        tokens: Arc<TokenStore>,
        call_deadline: Duration,
    ) -> Self {
        Self {
            downstream,
            store,
            tokens,
            comms_url: RwLock::new(None),
            call_deadline,
            locks: Mutex::new(HashMap::new()),
            cancels: Mutex::new(HashMap::new()),
            tracked: Mutex::new(Vec::new()),
        }
    }

    /// Where agents reach the comms service; set once the listener binds.
    pub fn set_comms_url(&self, base: impl Into<String>) {
        *self.comms_url.write() = Some(base.into());
    }

    /// Sends text to the agent's thread, starting one if needed. Queues
    /// behind any in-flight call for the same agent, succeeded or failed.
    pub async fn send(&self, team_id: &str, agent_id: &str, text: &str) -> Result<String> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let agent = self.store.get_agent(team_id, agent_id)?;
        self.store
            .set_agent_status(team_id, agent_id, AgentStatus::Working);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancels.lock().insert(agent_id.to_string(), cancel_tx);

        let outcome = tokio::select! {
            result = self.run_call(team_id, &agent, text) => result,
            _ = cancel_rx => Err(SquadronError::Canceled(agent_id.to_string())),
            _ = tokio::time::sleep(self.call_deadline) => {
                Err(SquadronError::Timeout(format!(
                    "agent call exceeded {}s",
                    self.call_deadline.as_secs()
                )))
            }
        };
        self.cancels.lock().remove(agent_id);

        match outcome {
            Ok(reply) => {
                if let Some(handle) = &reply.continuation {
                    self.store
                        .set_continuation(team_id, agent_id, Some(handle.clone()));
                }
                self.store
                    .set_agent_status(team_id, agent_id, AgentStatus::Idle);
                self.store
                    .set_last_output(team_id, agent_id, reply.content.clone());
                debug!(agent_id, chars = reply.content.len(), "Agent call completed");
                Ok(reply.content)
            }
            Err(e) => {
                self.store
                    .set_agent_status(team_id, agent_id, AgentStatus::Error);
                self.store.set_last_output(team_id, agent_id, e.to_string());
                if e.is_stale_continuation() {
                    // Forget the dead thread so the next call starts fresh.
                    self.store.set_continuation(team_id, agent_id, None);
                    warn!(agent_id, "Continuation invalidated; next call restarts");
                }
                Err(e)
            }
        }
    }

    /// Aborts the agent's in-flight call, if any.
    pub fn cancel(&self, agent_id: &str) -> bool {
        match self.cancels.lock().remove(agent_id) {
            Some(tx) => {
                debug!(agent_id, "Canceling in-flight call");
                tx.send(()).is_ok()
            }
            None => false,
        }
    }

    pub fn cancel_team(&self, agent_ids: &[String]) -> Vec<String> {
        agent_ids
            .iter()
            .filter(|id| self.cancel(id))
            .cloned()
            .collect()
    }

    /// Registers fire-and-forget work so shutdown can await it.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tracked.lock().push(handle);
    }

    /// Reconnects the downstream session. Idempotent; concurrent callers
    /// coalesce inside the session itself.
    pub async fn reconnect(&self) -> Result<()> {
        self.downstream.reconnect().await
    }

    /// Awaits tracked background work, then closes the downstream session.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self.tracked.lock().drain(..).collect();
        info!(pending = handles.len(), "Draining tracked operations");
        for handle in handles {
            let _ = handle.await;
        }
        self.downstream.close().await;
    }

    fn agent_lock(&self, agent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .clone()
    }

    async fn run_call(&self, team_id: &str, agent: &Agent, text: &str) -> Result<AgentReply> {
        if !self.downstream.is_connected().await {
            self.downstream.reconnect().await?;
        }

        match self.issue(team_id, agent, text).await {
            Err(e) if e.is_transport() => {
                // One reconnect per transport fault; a second fault propagates.
                warn!(agent_id = %agent.id, error = %e, "Transport fault; reconnecting once");
                self.downstream.reconnect().await?;
                self.issue(team_id, agent, text).await
            }
            other => other,
        }
    }

    async fn issue(&self, team_id: &str, agent: &Agent, text: &str) -> Result<AgentReply> {
        match &agent.continuation {
            Some(handle) => self.downstream.reply(handle, text).await,
            None => {
                let params = self.start_params(team_id, agent, text)?;
                self.downstream.start(params).await
            }
        }
    }

    fn start_params(&self, team_id: &str, agent: &Agent, text: &str) -> Result<StartParams> {
        let team = self.store.get_team(team_id).ok();
        let others = self.store.other_team_summaries(team_id);
        let instructions = prompt::compose(agent, team.as_ref(), &others);

        let comms_url = self
            .comms_url
            .read()
            .clone()
            .ok_or_else(|| SquadronError::Config("comms service URL not set".into()))?;
        let token = self.tokens.issue(&agent.id);
        let url = format!(
            "{}/mcp?agent={}&token={}",
            comms_url,
            encode_query(&agent.id),
            encode_query(&token)
        );

        let mut mcp_servers = HashMap::new();
        mcp_servers.insert("squadron".to_string(), McpServerEntry { url });

        Ok(StartParams {
            prompt: text.to_string(),
            model: agent.model.clone(),
            approval_policy: agent.approval.to_string(),
            sandbox: agent.sandbox.to_string(),
            cwd: agent.cwd.display().to_string(),
            base_instructions: (!instructions.is_empty()).then_some(instructions),
            config: StartConfig {
                reasoning_effort: agent.reasoning.to_string(),
                search: true,
                mcp_servers,
            },
        })
    }
}

/// Percent-encodes a query value. Ids and tokens are alphanumeric in
/// practice, but roles come from operator input.
fn encode_query(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
