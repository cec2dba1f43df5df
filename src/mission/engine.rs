//! The mission state machine.
//!
//! A failed worker never aborts the run: its outcome is recorded and the
//! mission proceeds through verification and compilation. Only a failure of
//! the engine's own calls (the lead during compilation) turns the mission
//! terminal with an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use super::prompts;
use super::registry::MissionRegistry;
use super::types::{
    parse_fix_assignments, CommsSnapshot, MissionPhase, MissionRecord, MissionStatusView,
    VerifyAttempt, WorkerResult,
};
use super::verify::run_verify;
use crate::agent::{AgentAdapter, TokenStore};
use crate::bus::MessageBus;
use crate::config::MissionConfig;
use crate::error::{Result, SquadronError};
use crate::ops::dissolve_everywhere;
use crate::state::{Agent, AgentConfig, TeamStore};

pub struct MissionEngine {
    store: Arc<TeamStore>,
    bus: Arc<MessageBus>,
    tokens: Arc<TokenStore>,
    adapter: Arc<AgentAdapter>,
    registry: Arc<MissionRegistry>,
    config: MissionConfig,
}

impl MissionEngine {
    pub fn new(
        store: Arc<TeamStore>,
        bus: Arc<MessageBus>,
        tokens: Arc<TokenStore>,
        adapter: Arc<AgentAdapter>,
        registry: Arc<MissionRegistry>,
        config: MissionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            tokens,
            adapter,
            registry,
            config,
        })
    }

    /// Creates the team and starts the run in the background, returning the
    /// mission id immediately. Exactly one spec must be flagged lead.
    pub fn launch(
        self: &Arc<Self>,
        objective: &str,
        work_dir: &PathBuf,
        team_name: &str,
        specs: Vec<AgentConfig>,
        verify_cmd: Option<String>,
        max_retries: Option<u32>,
    ) -> Result<String> {
        let lead_count = specs.iter().filter(|s| s.is_lead).count();
        if lead_count != 1 {
            return Err(SquadronError::InvalidArgument(format!(
                "a mission needs exactly one lead spec, got {}",
                lead_count
            )));
        }

        let specs: Vec<AgentConfig> = specs
            .into_iter()
            .map(|mut s| {
                if s.cwd.is_none() {
                    s.cwd = Some(work_dir.clone());
                }
                s
            })
            .collect();

        let team = self.store.create_team(team_name, specs)?;
        let lead_id = team
            .lead()
            .map(|a| a.id.clone())
            .ok_or_else(|| SquadronError::InvalidArgument("lead spec lost in creation".into()))?;
        let mut worker_ids: Vec<String> = team
            .agents
            .keys()
            .filter(|id| **id != lead_id)
            .cloned()
            .collect();
        worker_ids.sort();

        let record = MissionRecord::new(
            objective,
            team.id.clone(),
            team.name.clone(),
            lead_id,
            worker_ids,
            verify_cmd,
            max_retries.unwrap_or(self.config.max_fix_retries),
        );
        let mission_id = record.id.clone();
        info!(mission_id = %mission_id, team_id = %team.id, "Mission launched");
        self.registry.insert(record);

        let engine = Arc::clone(self);
        let id = mission_id.clone();
        tokio::spawn(async move {
            engine.run(&id).await;
        });

        Ok(mission_id)
    }

    async fn run(&self, mission_id: &str) {
        if let Err(e) = self.drive(mission_id).await {
            warn!(mission_id, error = %e, "Mission failed at the engine level");
            self.registry.update(mission_id, |r| {
                r.phase = MissionPhase::Error;
                r.error = Some(e.to_string());
            });
        }
        self.finalize(mission_id).await;
    }

    async fn drive(&self, mission_id: &str) -> Result<()> {
        let record = self.registry.get(mission_id)?;
        let team = self.store.get_team(&record.team_id)?;
        let lead = team
            .agents
            .get(&record.lead_id)
            .cloned()
            .ok_or_else(|| SquadronError::NotFound(format!("lead '{}'", record.lead_id)))?;
        let workers: Vec<Agent> = record
            .worker_ids
            .iter()
            .filter_map(|id| team.agents.get(id).cloned())
            .collect();

        self.execute(mission_id, &record, &lead, &workers).await;

        if let Some(cmd) = record.verify_cmd.clone() {
            self.verify_and_fix(mission_id, &record, &lead, &cmd).await;
        }

        self.review(mission_id).await
    }

    /// Executing: the lead is kicked without awaiting; workers run
    /// concurrently to completion; then the lead's kickoff is collected.
    async fn execute(
        &self,
        mission_id: &str,
        record: &MissionRecord,
        lead: &Agent,
        workers: &[Agent],
    ) {
        let worker_refs: Vec<&Agent> = workers.iter().collect();

        let lead_prompt = prompts::lead_kickoff(&record.objective, &worker_refs);
        let lead_call = {
            let adapter = Arc::clone(&self.adapter);
            let team_id = record.team_id.clone();
            let lead_id = lead.id.clone();
            tokio::spawn(async move { adapter.send(&team_id, &lead_id, &lead_prompt).await })
        };

        let worker_calls = workers.iter().map(|worker| {
            let adapter = Arc::clone(&self.adapter);
            let team_id = record.team_id.clone();
            let prompt = prompts::worker_kickoff(&record.objective, worker, &worker_refs);
            let worker_id = worker.id.clone();
            async move {
                let outcome = adapter.send(&team_id, &worker_id, &prompt).await;
                (worker_id, outcome)
            }
        });

        for (worker_id, outcome) in join_all(worker_calls).await {
            let result = match outcome {
                Ok(output) => WorkerResult {
                    agent_id: worker_id.clone(),
                    ok: true,
                    output,
                },
                Err(e) => WorkerResult {
                    agent_id: worker_id.clone(),
                    ok: false,
                    output: e.to_string(),
                },
            };
            self.registry.update(mission_id, |r| {
                r.worker_results.insert(worker_id.clone(), result);
            });
        }

        // Kickoff errors are recorded, never raised.
        let kickoff = match lead_call.await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => format!("(kickoff error) {}", e),
            Err(e) => format!("(kickoff join error) {}", e),
        };
        self.registry
            .update(mission_id, |r| r.lead_kickoff = Some(kickoff));
    }

    /// Verifying/fixing loop: each failed attempt within the retry budget
    /// buys one fix round; the final failure falls through to review.
    async fn verify_and_fix(
        &self,
        mission_id: &str,
        record: &MissionRecord,
        lead: &Agent,
        cmd: &str,
    ) {
        let deadline = Duration::from_secs(self.config.verify_timeout_secs);
        let mut attempt = 0u32;

        loop {
            self.registry.set_phase(mission_id, MissionPhase::Verifying);
            attempt += 1;

            let outcome = run_verify(cmd, &lead.cwd, deadline).await;
            info!(mission_id, attempt, passed = outcome.passed, "Verification attempt");
            self.registry.update(mission_id, |r| {
                r.attempts.push(VerifyAttempt {
                    attempt,
                    passed: outcome.passed,
                    output: outcome.output.clone(),
                });
            });

            if outcome.passed || attempt > record.max_retries {
                return;
            }

            self.registry.set_phase(mission_id, MissionPhase::Fixing);
            self.fix_round(mission_id, record, &outcome.output).await;
        }
    }

    /// Asks the lead for fix assignments and runs the recognizable ones.
    /// Everything here degrades to "no fix" rather than failing the mission.
    async fn fix_round(&self, mission_id: &str, record: &MissionRecord, failure_output: &str) {
        let prompt = prompts::fix_round(failure_output);
        let response = match self
            .adapter
            .send(&record.team_id, &record.lead_id, &prompt)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(mission_id, error = %e, "Lead unavailable for fix round");
                return;
            }
        };

        let assignments: Vec<_> = parse_fix_assignments(&response)
            .into_iter()
            .filter(|a| {
                let known = record.worker_ids.contains(&a.agent_id);
                if !known {
                    warn!(mission_id, agent_id = %a.agent_id, "Dropping fix for unknown agent");
                }
                known
            })
            .collect();

        if assignments.is_empty() {
            return;
        }

        let fixes = assignments.into_iter().map(|assignment| {
            let adapter = Arc::clone(&self.adapter);
            let team_id = record.team_id.clone();
            async move {
                let outcome = adapter.send(&team_id, &assignment.agent_id, &assignment.task).await;
                (assignment.agent_id, outcome)
            }
        });

        for (agent_id, outcome) in join_all(fixes).await {
            let result = match outcome {
                Ok(output) => WorkerResult {
                    agent_id: agent_id.clone(),
                    ok: true,
                    output,
                },
                Err(e) => WorkerResult {
                    agent_id: agent_id.clone(),
                    ok: false,
                    output: e.to_string(),
                },
            };
            self.registry.update(mission_id, |r| {
                r.worker_results.insert(agent_id.clone(), result);
            });
        }
    }

    /// Reviewing: one compilation call to the lead. This is the only
    /// adapter failure that makes the mission itself fail.
    async fn review(&self, mission_id: &str) -> Result<()> {
        self.registry.set_phase(mission_id, MissionPhase::Reviewing);
        let record = self.registry.get(mission_id)?;

        let mut workers: Vec<WorkerResult> = record.worker_results.values().cloned().collect();
        workers.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let prompt = prompts::compilation(&record.objective, &workers, record.attempts.last());
        let report = self
            .adapter
            .send(&record.team_id, &record.lead_id, &prompt)
            .await?;

        self.registry.update(mission_id, |r| {
            r.final_report = Some(report);
            r.phase = MissionPhase::Completed;
        });
        info!(mission_id, "Mission completed");
        Ok(())
    }

    /// Terminal entry: capture the comms snapshot, dissolve the team, and
    /// schedule eviction of the record.
    async fn finalize(&self, mission_id: &str) {
        let Ok(record) = self.registry.get(mission_id) else {
            return;
        };

        let mut members = record.worker_ids.clone();
        members.push(record.lead_id.clone());

        let snapshot = CommsSnapshot {
            group: self.bus.group_snapshot(&record.team_id),
            dms: self.bus.dm_snapshot(&members),
            lead: self.bus.lead_snapshot_by(&members),
            artifacts: self.bus.get_shared(&record.team_id),
        };
        self.registry.update(mission_id, |r| {
            r.comms = Some(snapshot);
            r.completed_at = Some(chrono::Utc::now());
        });

        if let Err(e) =
            dissolve_everywhere(&self.store, &self.bus, &self.tokens, &record.team_id)
        {
            warn!(mission_id, error = %e, "Mission team teardown failed");
        }

        let registry = Arc::clone(&self.registry);
        let retention = Duration::from_secs(self.config.retention_secs);
        let id = mission_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if registry.remove(&id).is_some() {
                info!(mission_id = %id, "Mission record evicted after retention");
            }
        });
    }

    // Operator-facing reads.

    pub fn status(&self, mission_id: &str) -> Result<MissionStatusView> {
        Ok(self.registry.get(mission_id)?.status_view())
    }

    /// Polls until the mission is terminal, then deletes the record and
    /// returns the final view.
    pub async fn await_mission(
        &self,
        mission_id: &str,
        poll_ms: Option<u64>,
        timeout_ms: Option<u64>,
    ) -> Result<MissionStatusView> {
        let poll = Duration::from_millis(poll_ms.unwrap_or(self.config.await_poll_ms));
        let deadline = Duration::from_millis(timeout_ms.unwrap_or(self.config.await_timeout_ms));
        let started = tokio::time::Instant::now();

        loop {
            let record = self.registry.get(mission_id)?;
            if record.is_terminal() {
                let view = record.status_view();
                self.registry.remove(mission_id);
                return Ok(view);
            }
            if started.elapsed() >= deadline {
                return Err(SquadronError::Timeout(format!(
                    "mission '{}' still {} after {}ms",
                    mission_id, record.phase, deadline.as_millis()
                )));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// The snapshot captured at terminal entry; `not_ready` before that.
    pub fn mission_comms(&self, mission_id: &str) -> Result<CommsSnapshot> {
        let record = self.registry.get(mission_id)?;
        if !record.is_terminal() {
            return Err(SquadronError::NotReady(format!(
                "mission '{}' is still {}; comms snapshot arrives at terminal",
                mission_id, record.phase
            )));
        }
        record.comms.ok_or_else(|| {
            SquadronError::NotReady(format!("mission '{}' snapshot not captured yet", mission_id))
        })
    }

    /// Live channel view for a team that still exists.
    pub fn team_comms(&self, team: &str) -> Result<CommsSnapshot> {
        let team_id = self.store.resolve_team_id(team)?;
        let roster = self.store.get_team(&team_id)?;
        let members: Vec<String> = roster.agents.keys().cloned().collect();

        Ok(CommsSnapshot {
            group: self.bus.group_snapshot(&team_id),
            dms: self.bus.dm_snapshot(&members),
            lead: self.bus.lead_snapshot_by(&members),
            artifacts: self.bus.get_shared(&team_id),
        })
    }

    pub fn registry(&self) -> &Arc<MissionRegistry> {
        &self.registry
    }
}
