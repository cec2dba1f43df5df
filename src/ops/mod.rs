//! Operator-facing operations over the state store and the adapter: direct
//! messaging, broadcast, relay, and the task lifecycle with auto-start.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::agent::{AgentAdapter, TokenStore};
use crate::bus::MessageBus;
use crate::error::{Result, SquadronError};
use crate::state::{AgentStatus, Task, TeamStore, TeamSummary};

/// Per-agent outcome of a fan-out operation.
#[derive(Debug, Clone, Serialize)]
pub struct FanoutEntry {
    pub agent_id: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignReport {
    pub task: Task,
    pub auto_started: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteReport {
    pub task_id: String,
    pub unblocked: Vec<String>,
    pub started: Vec<String>,
}

/// Destroys a team everywhere: state, bus channels, identity tokens.
pub fn dissolve_everywhere(
    store: &TeamStore,
    bus: &MessageBus,
    tokens: &TokenStore,
    team_id: &str,
) -> Result<Vec<String>> {
    let members = store.dissolve_team(team_id)?;
    bus.dissolve_team(team_id, &members);
    tokens.revoke_all(&members);
    Ok(members)
}

pub struct Operations {
    store: Arc<TeamStore>,
    bus: Arc<MessageBus>,
    tokens: Arc<TokenStore>,
    adapter: Arc<AgentAdapter>,
}

impl Operations {
    pub fn new(
        store: Arc<TeamStore>,
        bus: Arc<MessageBus>,
        tokens: Arc<TokenStore>,
        adapter: Arc<AgentAdapter>,
    ) -> Self {
        Self {
            store,
            bus,
            tokens,
            adapter,
        }
    }

    pub fn store(&self) -> &Arc<TeamStore> {
        &self.store
    }

    pub fn dissolve_team(&self, team: &str) -> Result<Vec<String>> {
        let team_id = self.store.resolve_team_id(team)?;
        dissolve_everywhere(&self.store, &self.bus, &self.tokens, &team_id)
    }

    /// One synchronous agent turn. Refuses with `busy` rather than queueing,
    /// so the operator gets immediate feedback.
    pub async fn send_message(&self, team: &str, agent_id: &str, text: &str) -> Result<String> {
        let team_id = self.store.resolve_team_id(team)?;
        let agent = self.store.get_agent(&team_id, agent_id)?;
        if agent.is_working() {
            return Err(SquadronError::Busy(agent_id.to_string()));
        }
        self.adapter.send(&team_id, agent_id, text).await
    }

    /// Concurrent send to the subset (default: everyone), skipping agents
    /// that are mid-call.
    pub async fn broadcast(
        &self,
        team: &str,
        text: &str,
        subset: Option<Vec<String>>,
    ) -> Result<Vec<FanoutEntry>> {
        let team_id = self.store.resolve_team_id(team)?;
        let roster = self.store.get_team(&team_id)?;

        let mut target_ids = match subset {
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
        target_ids.sort();

        let mut entries = Vec::new();
        let mut sends = Vec::new();
        for id in target_ids {
            let agent = &roster.agents[&id];
            if agent.is_working() {
                entries.push(FanoutEntry {
                    agent_id: id,
                    ok: false,
                    detail: "skipped: currently working".into(),
                });
                continue;
            }
            let adapter = Arc::clone(&self.adapter);
            let team_id = team_id.clone();
            let text = text.to_string();
            sends.push(async move {
                let outcome = adapter.send(&team_id, &id, &text).await;
                match outcome {
                    Ok(output) => FanoutEntry {
                        agent_id: id,
                        ok: true,
                        detail: output,
                    },
                    Err(e) => FanoutEntry {
                        agent_id: id,
                        ok: false,
                        detail: e.to_string(),
                    },
                }
            });
        }

        entries.extend(join_all(sends).await);
        entries.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(entries)
    }

    /// Forwards one agent's last output to a teammate or to everyone else.
    pub async fn relay(
        &self,
        team: &str,
        from: &str,
        to: Option<String>,
        to_all: bool,
        prefix: Option<String>,
    ) -> Result<Vec<FanoutEntry>> {
        let team_id = self.store.resolve_team_id(team)?;
        let source = self.store.get_agent(&team_id, from)?;
        let output = source.last_output.clone().ok_or_else(|| {
            SquadronError::InvalidArgument(format!("agent '{}' has no output to relay", from))
        })?;

        let text = match prefix {
            Some(p) => format!("{}\n\n{}", p, output),
            None => output,
        };

        let subset = match (to, to_all) {
            (Some(target), _) => Some(vec![target]),
            (None, true) => {
                let roster = self.store.get_team(&team_id)?;
                let mut others: Vec<String> = roster
                    .agents
                    .keys()
                    .filter(|id| id.as_str() != from)
                    .cloned()
                    .collect();
                others.sort();
                Some(others)
            }
            (None, false) => {
                return Err(SquadronError::InvalidArgument(
                    "relay needs a destination: 'to' or 'toAll'".into(),
                ))
            }
        };

        self.broadcast(&team_id, &text, subset).await
    }

    /// Creates the task; when its prerequisites are already met and the
    /// assignee is idle, kicks it off in the background.
    pub async fn assign_task(
        &self,
        team: &str,
        assignee: &str,
        description: &str,
        prerequisites: Vec<String>,
    ) -> Result<AssignReport> {
        let team_id = self.store.resolve_team_id(team)?;
        let task = self
            .store
            .create_task(&team_id, assignee, description, prerequisites)?;

        let auto_started = self.try_kick(&team_id, &task.id)?;
        Ok(AssignReport { task, auto_started })
    }

    /// Completes the task (defaulting the result to the assignee's last
    /// output) and auto-starts any now-unblocked tasks with idle assignees.
    pub async fn complete_task(
        &self,
        team: &str,
        task_id: &str,
        result: Option<String>,
    ) -> Result<CompleteReport> {
        let team_id = self.store.resolve_team_id(team)?;

        let recorded = match result {
            Some(r) => Some(r),
            None => {
                let roster = self.store.get_team(&team_id)?;
                roster
                    .tasks
                    .get(task_id)
                    .and_then(|t| roster.agents.get(&t.assignee))
                    .and_then(|a| a.last_output.clone())
            }
        };

        let unblocked = self.store.complete_task(&team_id, task_id, recorded)?;

        let mut started = Vec::new();
        for id in &unblocked {
            match self.try_kick(&team_id, id) {
                Ok(true) => started.push(id.clone()),
                Ok(false) => {}
                Err(e) => warn!(task_id = %id, error = %e, "Auto-start failed"),
            }
        }

        Ok(CompleteReport {
            task_id: task_id.to_string(),
            unblocked,
            started,
        })
    }

    /// Transitions a ready task to in-progress and fires the assignee's
    /// adapter call in the background. Kick failures revert the task to
    /// pending; they never abort the caller.
    fn try_kick(&self, team_id: &str, task_id: &str) -> Result<bool> {
        if !self.store.task_ready(team_id, task_id)? {
            return Ok(false);
        }
        let roster = self.store.get_team(team_id)?;
        let task = roster
            .tasks
            .get(task_id)
            .ok_or_else(|| SquadronError::NotFound(format!("task '{}'", task_id)))?;
        let assignee = roster
            .agents
            .get(&task.assignee)
            .ok_or_else(|| SquadronError::NotFound(format!("agent '{}'", task.assignee)))?;
        if assignee.status != AgentStatus::Idle {
            return Ok(false);
        }

        self.store.start_task(team_id, task_id)?;
        debug!(team_id, task_id, assignee = %task.assignee, "Task auto-started");

        let prompt = format!(
            "You have been assigned task `{}`:\n\n{}\n\nWork it to completion, post progress \
             to group chat, and share any deliverable paths.",
            task.id, task.description
        );
        let adapter = Arc::clone(&self.adapter);
        let store = Arc::clone(&self.store);
        let team_id = team_id.to_string();
        let task_id = task_id.to_string();
        let assignee_id = task.assignee.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = adapter.send(&team_id, &assignee_id, &prompt).await {
                warn!(task_id = %task_id, error = %e, "Task kick failed; reverting to pending");
                let _ = store.revert_task(&team_id, &task_id);
            }
        });
        self.adapter.track(handle);
        Ok(true)
    }

    pub fn get_output(&self, team: &str, agent_id: &str) -> Result<String> {
        let team_id = self.store.resolve_team_id(team)?;
        let agent = self.store.get_agent(&team_id, agent_id)?;
        agent.last_output.ok_or_else(|| {
            SquadronError::NotFound(format!("agent '{}' has produced no output yet", agent_id))
        })
    }

    pub fn task_status(&self, team: &str) -> Result<Vec<Task>> {
        let team_id = self.store.resolve_team_id(team)?;
        let roster = self.store.get_team(&team_id)?;
        let mut tasks: Vec<Task> = roster.tasks.into_values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    pub fn list_agents(&self) -> Vec<TeamSummary> {
        self.store.team_summaries()
    }

    /// One-screen rollup of a team: roster state plus the task table.
    pub fn get_team_report(&self, team: &str) -> Result<serde_json::Value> {
        let team_id = self.store.resolve_team_id(team)?;
        let roster = self.store.get_team(&team_id)?;

        let mut agents: Vec<serde_json::Value> = roster
            .agents
            .values()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "role": a.role,
                    "isLead": a.is_lead,
                    "status": a.status.to_string(),
                    "lastOutput": a.last_output,
                    "tasks": a.task_ids,
                })
            })
            .collect();
        agents.sort_by_key(|v| v["id"].as_str().map(String::from));

        let mut tasks: Vec<serde_json::Value> = roster
            .tasks
            .values()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "description": t.description,
                    "status": t.status.to_string(),
                    "assignee": t.assignee,
                    "result": t.result,
                })
            })
            .collect();
        tasks.sort_by_key(|v| v["id"].as_str().map(String::from));

        Ok(serde_json::json!({
            "team": { "id": roster.id, "name": roster.name },
            "agents": agents,
            "tasks": tasks,
        }))
    }
}
