//! Abort-and-redirect for an in-flight team: cancel current calls, announce
//! the direction change in group chat, and re-prompt every target.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::agent::AgentAdapter;
use crate::bus::MessageBus;
use crate::error::{Result, SquadronError};
use crate::state::TeamStore;

/// Synthetic author of steering announcements.
const ORCHESTRATOR_ID: &str = "orchestrator";
const ORCHESTRATOR_ROLE: &str = "Orchestrator";

#[derive(Debug, Clone, Serialize)]
pub struct SteerReport {
    pub aborted: Vec<String>,
    pub steered: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Steering {
    store: Arc<TeamStore>,
    bus: Arc<MessageBus>,
    adapter: Arc<AgentAdapter>,
}

impl Steering {
    pub fn new(store: Arc<TeamStore>, bus: Arc<MessageBus>, adapter: Arc<AgentAdapter>) -> Self {
        Self {
            store,
            bus,
            adapter,
        }
    }

    /// Every target ends up in `steered` or `failed`; `aborted` records
    /// which of them had an in-flight call cut short.
    pub async fn steer(
        &self,
        team: &str,
        directive: &str,
        subset: Option<Vec<String>>,
    ) -> Result<SteerReport> {
        let team_id = self.store.resolve_team_id(team)?;
        let roster = self.store.get_team(&team_id)?;

        let mut targets = match subset {
            Some(ids) => {
                for id in &ids {
                    if !roster.agents.contains_key(id) {
                        return Err(SquadronError::NotFound(format!("agent '{}'", id)));
                    }
                }
                ids
            }
            None => roster.agents.keys().cloned().collect(),
        };
        targets.sort();
        if targets.is_empty() {
            return Err(SquadronError::InvalidArgument(
                "steer needs at least one target".into(),
            ));
        }

        let aborted = self.adapter.cancel_team(&targets);
        info!(team_id = %team_id, targets = targets.len(), aborted = aborted.len(), "Steering team");

        self.bus.group_post(
            &team_id,
            ORCHESTRATOR_ID,
            ORCHESTRATOR_ROLE,
            &format!(
                "Direction change: {}\nDrop your current approach and realign; details were sent to each of you.",
                directive
            ),
        );

        let prompt = format!(
            "The operator has redirected the team.\n\nNew directive:\n{}\n\nAbandon your \
             previous instructions where they conflict, check group chat for the announcement, \
             and continue under the new directive.",
            directive
        );

        let redirects = targets.iter().map(|agent_id| {
            let adapter = Arc::clone(&self.adapter);
            let team_id = team_id.clone();
            let prompt = prompt.clone();
            let agent_id = agent_id.clone();
            async move {
                let outcome = adapter.send(&team_id, &agent_id, &prompt).await;
                (agent_id, outcome.is_ok())
            }
        });

        let mut steered = Vec::new();
        let mut failed = Vec::new();
        for (agent_id, ok) in join_all(redirects).await {
            if ok {
                steered.push(agent_id);
            } else {
                failed.push(agent_id);
            }
        }

        Ok(SteerReport {
            aborted,
            steered,
            failed,
        })
    }
}
