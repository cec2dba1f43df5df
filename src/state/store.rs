use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::task::{Task, TaskStatus};
use super::team::{Agent, AgentConfig, AgentStatus, Team};
use crate::error::{Result, SquadronError};

/// Public roster projection of an agent, safe to hand to other teams.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub role: String,
    pub specialization: Option<String>,
    #[serde(rename = "isLead")]
    pub is_lead: bool,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,
}

impl AgentSummary {
    fn from_agent(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            role: agent.role.clone(),
            specialization: agent.specialization.clone(),
            is_lead: agent.is_lead,
            status: agent.status,
            task_ids: agent.task_ids.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamSummary {
    pub id: String,
    pub name: String,
    pub agents: Vec<AgentSummary>,
}

/// Owns every team and, through teams, every agent and task.
///
/// All mutation goes through one coarse lock; callers get cloned snapshots
/// back so nothing borrows into the map.
pub struct TeamStore {
    teams: RwLock<HashMap<String, Team>>,
    default_cwd: PathBuf,
}

impl TeamStore {
    pub fn new(default_cwd: PathBuf) -> Self {
        Self {
            teams: RwLock::new(HashMap::new()),
            default_cwd,
        }
    }

    pub fn create_team(&self, name: &str, configs: Vec<AgentConfig>) -> Result<Team> {
        for config in &configs {
            if config.role.trim().is_empty() {
                return Err(SquadronError::InvalidArgument(
                    "agent role must be non-empty".into(),
                ));
            }
        }

        let mut team = Team::new(name);
        for config in configs {
            let agent = Agent::from_config(config, &self.default_cwd);
            team.agents.insert(agent.id.clone(), agent);
        }

        info!(team_id = %team.id, name = %team.name, agents = team.agents.len(), "Team created");

        let snapshot = team.clone();
        self.teams.write().insert(team.id.clone(), team);
        Ok(snapshot)
    }

    /// Accepts a team id or a unique team name.
    pub fn resolve_team_id(&self, team: &str) -> Result<String> {
        let teams = self.teams.read();
        if teams.contains_key(team) {
            return Ok(team.to_string());
        }
        let mut matches = teams.values().filter(|t| t.name == team);
        match (matches.next(), matches.next()) {
            (Some(t), None) => Ok(t.id.clone()),
            (Some(_), Some(_)) => Err(SquadronError::InvalidArgument(format!(
                "team name '{}' is ambiguous; use the team id",
                team
            ))),
            _ => Err(SquadronError::NotFound(format!("team '{}'", team))),
        }
    }

    pub fn get_team(&self, team_id: &str) -> Result<Team> {
        self.teams
            .read()
            .get(team_id)
            .cloned()
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))
    }

    pub fn get_agent(&self, team_id: &str, agent_id: &str) -> Result<Agent> {
        let teams = self.teams.read();
        let team = teams
            .get(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        team.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| SquadronError::NotFound(format!("agent '{}'", agent_id)))
    }

    pub fn add_agent(&self, team_id: &str, config: AgentConfig) -> Result<Agent> {
        if config.role.trim().is_empty() {
            return Err(SquadronError::InvalidArgument(
                "agent role must be non-empty".into(),
            ));
        }

        let mut teams = self.teams.write();
        let team = teams
            .get_mut(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;

        let agent = Agent::from_config(config, &self.default_cwd);
        let snapshot = agent.clone();
        debug!(team_id, agent_id = %agent.id, "Agent added");
        team.agents.insert(agent.id.clone(), agent);
        Ok(snapshot)
    }

    /// Fails with `busy` while the agent is working or still holds tasks.
    pub fn remove_agent(&self, team_id: &str, agent_id: &str) -> Result<()> {
        let mut teams = self.teams.write();
        let team = teams
            .get_mut(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        let agent = team
            .agents
            .get(agent_id)
            .ok_or_else(|| SquadronError::NotFound(format!("agent '{}'", agent_id)))?;

        if agent.is_working() || !agent.task_ids.is_empty() {
            return Err(SquadronError::Busy(agent_id.to_string()));
        }

        team.agents.remove(agent_id);
        debug!(team_id, agent_id, "Agent removed");
        Ok(())
    }

    pub fn create_task(
        &self,
        team_id: &str,
        assignee: &str,
        description: &str,
        prerequisites: Vec<String>,
    ) -> Result<Task> {
        let mut teams = self.teams.write();
        let team = teams
            .get_mut(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        if !team.agents.contains_key(assignee) {
            return Err(SquadronError::NotFound(format!("agent '{}'", assignee)));
        }
        for prereq in &prerequisites {
            if !team.tasks.contains_key(prereq) {
                return Err(SquadronError::InvalidArgument(format!(
                    "prerequisite '{}' is not a task of this team",
                    prereq
                )));
            }
        }

        let task = Task::new(assignee, description, prerequisites);
        let snapshot = task.clone();
        if let Some(agent) = team.agents.get_mut(assignee) {
            agent.task_ids.push(task.id.clone());
        }
        debug!(team_id, task_id = %task.id, assignee, "Task created");
        team.tasks.insert(task.id.clone(), task);
        Ok(snapshot)
    }

    /// True iff every prerequisite of the task is completed.
    pub fn task_ready(&self, team_id: &str, task_id: &str) -> Result<bool> {
        let teams = self.teams.read();
        let team = teams
            .get(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        let task = team
            .tasks
            .get(task_id)
            .ok_or_else(|| SquadronError::NotFound(format!("task '{}'", task_id)))?;
        Ok(task.prerequisites.iter().all(|p| {
            team.tasks
                .get(p)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        }))
    }

    pub fn start_task(&self, team_id: &str, task_id: &str) -> Result<()> {
        self.transition_task(team_id, task_id, TaskStatus::Pending, TaskStatus::InProgress)
    }

    /// The one sanctioned regression: an auto-start kick that failed hands
    /// the task back to the pending pool.
    pub fn revert_task(&self, team_id: &str, task_id: &str) -> Result<()> {
        self.transition_task(team_id, task_id, TaskStatus::InProgress, TaskStatus::Pending)
    }

    fn transition_task(
        &self,
        team_id: &str,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        let mut teams = self.teams.write();
        let team = teams
            .get_mut(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        let task = team
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SquadronError::NotFound(format!("task '{}'", task_id)))?;

        if task.status != from {
            return Err(SquadronError::InvalidArgument(format!(
                "task '{}' is {}, expected {}",
                task_id, task.status, from
            )));
        }
        task.status = to;
        Ok(())
    }

    /// Marks the task completed and returns the ids of pending tasks whose
    /// every prerequisite is now completed.
    pub fn complete_task(
        &self,
        team_id: &str,
        task_id: &str,
        result: Option<String>,
    ) -> Result<Vec<String>> {
        let mut teams = self.teams.write();
        let team = teams
            .get_mut(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        let task = team
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SquadronError::NotFound(format!("task '{}'", task_id)))?;

        if task.status == TaskStatus::Completed {
            return Err(SquadronError::InvalidArgument(format!(
                "task '{}' is already completed",
                task_id
            )));
        }
        task.status = TaskStatus::Completed;
        task.result = result;
        task.completed_at = Some(Utc::now());
        let assignee = task.assignee.clone();

        if let Some(agent) = team.agents.get_mut(&assignee) {
            agent.task_ids.retain(|id| id != task_id);
        }

        let completed: Vec<String> = team
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect();

        let mut unblocked: Vec<String> = team
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.prerequisites.contains(&task_id.to_string())
                    && t.prerequisites.iter().all(|p| completed.contains(p))
            })
            .map(|t| t.id.clone())
            .collect();
        unblocked.sort();

        debug!(team_id, task_id, unblocked = unblocked.len(), "Task completed");
        Ok(unblocked)
    }

    /// Destroys the team and returns its member agent ids so the caller can
    /// purge the message bus.
    pub fn dissolve_team(&self, team_id: &str) -> Result<Vec<String>> {
        let mut teams = self.teams.write();
        let team = teams
            .remove(team_id)
            .ok_or_else(|| SquadronError::NotFound(format!("team '{}'", team_id)))?;
        info!(team_id, name = %team.name, "Team dissolved");
        Ok(team.agents.keys().cloned().collect())
    }

    // Runtime field mutators used by the adapter.

    pub fn set_agent_status(&self, team_id: &str, agent_id: &str, status: AgentStatus) {
        let mut teams = self.teams.write();
        if let Some(team) = teams.get_mut(team_id)
            && let Some(agent) = team.agents.get_mut(agent_id)
        {
            agent.status = status;
        }
    }

    pub fn set_last_output(&self, team_id: &str, agent_id: &str, output: impl Into<String>) {
        let mut teams = self.teams.write();
        if let Some(team) = teams.get_mut(team_id)
            && let Some(agent) = team.agents.get_mut(agent_id)
        {
            agent.last_output = Some(output.into());
        }
    }

    pub fn set_continuation(&self, team_id: &str, agent_id: &str, handle: Option<String>) {
        let mut teams = self.teams.write();
        if let Some(team) = teams.get_mut(team_id)
            && let Some(agent) = team.agents.get_mut(agent_id)
        {
            agent.continuation = handle;
        }
    }

    // Lookup helpers for the comms service and the instruction composer.

    /// Locates an agent without knowing its team.
    pub fn team_of_agent(&self, agent_id: &str) -> Option<(String, Agent)> {
        let teams = self.teams.read();
        for team in teams.values() {
            if let Some(agent) = team.agents.get(agent_id) {
                return Some((team.id.clone(), agent.clone()));
            }
        }
        None
    }

    pub fn team_summaries(&self) -> Vec<TeamSummary> {
        let teams = self.teams.read();
        let mut summaries: Vec<TeamSummary> = teams
            .values()
            .map(|team| {
                let mut agents: Vec<AgentSummary> =
                    team.agents.values().map(AgentSummary::from_agent).collect();
                agents.sort_by(|a, b| a.id.cmp(&b.id));
                TeamSummary {
                    id: team.id.clone(),
                    name: team.name.clone(),
                    agents,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    pub fn other_team_summaries(&self, excluding_team: &str) -> Vec<TeamSummary> {
        self.team_summaries()
            .into_iter()
            .filter(|t| t.id != excluding_team)
            .collect()
    }
}
