use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{Artifact, ChatMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    Executing,
    Verifying,
    Fixing,
    Reviewing,
    Completed,
    Error,
}

impl MissionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executing => write!(f, "executing"),
            Self::Verifying => write!(f, "verifying"),
            Self::Fixing => write!(f, "fixing"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub agent_id: String,
    pub ok: bool,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyAttempt {
    pub attempt: u32,
    pub passed: bool,
    pub output: String,
}

/// Channel contents captured at terminal entry, kept for post-mortems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommsSnapshot {
    pub group: Vec<ChatMessage>,
    pub dms: HashMap<String, Vec<ChatMessage>>,
    pub lead: Vec<ChatMessage>,
    pub artifacts: Vec<Artifact>,
}

/// A lead's fix instruction for one worker, parsed out of its prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAssignment {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct MissionRecord {
    pub id: String,
    pub objective: String,
    pub team_id: String,
    pub team_name: String,
    pub phase: MissionPhase,
    pub lead_id: String,
    pub worker_ids: Vec<String>,
    pub worker_results: HashMap<String, WorkerResult>,
    pub verify_cmd: Option<String>,
    pub max_retries: u32,
    pub attempts: Vec<VerifyAttempt>,
    /// Output of the lead's kickoff call; errors land here silently.
    pub lead_kickoff: Option<String>,
    pub final_report: Option<String>,
    pub error: Option<String>,
    pub comms: Option<CommsSnapshot>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionRecord {
    pub fn new(
        objective: impl Into<String>,
        team_id: impl Into<String>,
        team_name: impl Into<String>,
        lead_id: impl Into<String>,
        worker_ids: Vec<String>,
        verify_cmd: Option<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: format!("mission-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            objective: objective.into(),
            team_id: team_id.into(),
            team_name: team_name.into(),
            phase: MissionPhase::Executing,
            lead_id: lead_id.into(),
            worker_ids,
            worker_results: HashMap::new(),
            verify_cmd,
            max_retries,
            attempts: Vec::new(),
            lead_kickoff: None,
            final_report: None,
            error: None,
            comms: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn status_view(&self) -> MissionStatusView {
        let mut workers: Vec<WorkerResult> = self.worker_results.values().cloned().collect();
        workers.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        MissionStatusView {
            id: self.id.clone(),
            objective: self.objective.clone(),
            team_name: self.team_name.clone(),
            phase: self.phase,
            lead_id: self.lead_id.clone(),
            worker_ids: self.worker_ids.clone(),
            workers,
            attempts: self.attempts.clone(),
            final_report: self.final_report.clone(),
            error: self.error.clone(),
        }
    }
}

/// Operator-facing projection of a mission.
#[derive(Debug, Clone, Serialize)]
pub struct MissionStatusView {
    pub id: String,
    pub objective: String,
    #[serde(rename = "teamName")]
    pub team_name: String,
    pub phase: MissionPhase,
    #[serde(rename = "leadId")]
    pub lead_id: String,
    #[serde(rename = "workerIds")]
    pub worker_ids: Vec<String>,
    pub workers: Vec<WorkerResult>,
    pub attempts: Vec<VerifyAttempt>,
    #[serde(rename = "finalReport")]
    pub final_report: Option<String>,
    pub error: Option<String>,
}

/// Extracts the first balanced `[...]` block and parses it permissively.
/// Unparseable text degrades to no assignments rather than an error.
pub fn parse_fix_assignments(text: &str) -> Vec<FixAssignment> {
    let Some(block) = first_bracket_block(text) else {
        return Vec::new();
    };
    serde_json::from_str(block).unwrap_or_default()
}

fn first_bracket_block(text: &str) -> Option<&str> {
    let open = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[open..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..open + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fix_assignments_from_prose() {
        let text = r#"Here is my plan to address the failures:
[{"agentId": "dev-1", "task": "fix the build"}, {"agentId": "dev-2", "task": "rerun tests"}]
Let me know if anything is unclear."#;

        let fixes = parse_fix_assignments(text);
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].agent_id, "dev-1");
        assert_eq!(fixes[1].task, "rerun tests");
    }

    #[test]
    fn test_parse_fix_assignments_empty_array() {
        assert!(parse_fix_assignments("nothing to fix: []").is_empty());
    }

    #[test]
    fn test_parse_fix_assignments_no_json() {
        assert!(parse_fix_assignments("I could not produce assignments").is_empty());
        assert!(parse_fix_assignments("broken [ {\"agentId\": ").is_empty());
    }

    #[test]
    fn test_parse_fix_assignments_nested_brackets_in_strings() {
        let text = r#"[{"agentId": "a", "task": "handle [edge] cases"}]"#;
        let fixes = parse_fix_assignments(text);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].task, "handle [edge] cases");
    }

    #[test]
    fn test_mission_record_terminal() {
        let mut record = MissionRecord::new("obj", "t-1", "alpha", "lead-1", vec![], None, 2);
        assert!(!record.is_terminal());
        record.phase = MissionPhase::Completed;
        assert!(record.is_terminal());
        record.phase = MissionPhase::Error;
        assert!(record.is_terminal());
    }
}
