//! Parallel fan-out dispatch: a throwaway team runs independent tasks to
//! completion and is destroyed no matter how the run went.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{AgentAdapter, TokenStore};
use crate::bus::MessageBus;
use crate::config::DispatchConfig;
use crate::error::{Result, SquadronError};
use crate::ops::dissolve_everywhere;
use crate::state::{AgentConfig, TeamStore};

/// One agent plus the task it should run.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DispatchSpec {
    #[serde(flatten)]
    pub agent: AgentConfig,
    pub task: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchEntry {
    pub agent_id: String,
    pub role: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub team_name: String,
    pub results: Vec<DispatchEntry>,
}

pub struct Dispatcher {
    store: Arc<TeamStore>,
    bus: Arc<MessageBus>,
    tokens: Arc<TokenStore>,
    adapter: Arc<AgentAdapter>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<TeamStore>,
        bus: Arc<MessageBus>,
        tokens: Arc<TokenStore>,
        adapter: Arc<AgentAdapter>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            store,
            bus,
            tokens,
            adapter,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Creates the team, runs every spec concurrently under a per-call
    /// timeout, then tears the team down unconditionally.
    pub async fn dispatch(
        &self,
        team_name: &str,
        work_dir: &PathBuf,
        specs: Vec<DispatchSpec>,
    ) -> Result<DispatchReport> {
        if specs.is_empty() {
            return Err(SquadronError::InvalidArgument(
                "dispatch needs at least one agent spec".into(),
            ));
        }

        let team = self.store.create_team(team_name, Vec::new())?;
        let team_id = team.id.clone();

        // Added one by one so each spec's task pairs with its agent id.
        let mut assignments = Vec::new();
        for spec in specs {
            let mut config = spec.agent;
            if config.cwd.is_none() {
                config.cwd = Some(work_dir.clone());
            }
            match self.store.add_agent(&team_id, config) {
                Ok(agent) => assignments.push((agent.id, agent.role, spec.task)),
                Err(e) => {
                    // The team must not leak even when setup fails.
                    let _ = dissolve_everywhere(&self.store, &self.bus, &self.tokens, &team_id);
                    return Err(e);
                }
            }
        }

        info!(team_id = %team_id, agents = assignments.len(), "Dispatch fan-out starting");

        let calls = assignments.into_iter().map(|(agent_id, role, task)| {
            let adapter = Arc::clone(&self.adapter);
            let team_id = team_id.clone();
            let timeout = self.call_timeout;
            async move {
                let outcome =
                    tokio::time::timeout(timeout, adapter.send(&team_id, &agent_id, &task)).await;
                match outcome {
                    Ok(Ok(output)) => DispatchEntry {
                        agent_id,
                        role,
                        ok: true,
                        detail: output,
                    },
                    Ok(Err(e)) => DispatchEntry {
                        agent_id,
                        role,
                        ok: false,
                        detail: e.to_string(),
                    },
                    Err(_) => {
                        adapter.cancel(&agent_id);
                        DispatchEntry {
                            agent_id,
                            role,
                            ok: false,
                            detail: format!(
                                "timed out after {}s",
                                timeout.as_secs()
                            ),
                        }
                    }
                }
            }
        });

        let mut results = join_all(calls).await;
        results.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        if let Err(e) = dissolve_everywhere(&self.store, &self.bus, &self.tokens, &team_id) {
            warn!(team_id = %team_id, error = %e, "Dispatch teardown failed");
        }

        Ok(DispatchReport {
            team_name: team_name.to_string(),
            results,
        })
    }
}
