use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::task::Task;
use crate::config::DEFAULT_MODEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    #[default]
    WorkspaceWrite,
    DangerFullAccess,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WorkspaceWrite => write!(f, "workspace-write"),
            Self::DangerFullAccess => write!(f, "danger-full-access"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    Untrusted,
    OnRequest,
    OnFailure,
    #[default]
    Never,
}

impl std::fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Untrusted => write!(f, "untrusted"),
            Self::OnRequest => write!(f, "on-request"),
            Self::OnFailure => write!(f, "on-failure"),
            Self::Never => write!(f, "never"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    XHigh,
    High,
    Medium,
    Low,
    Minimal,
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::XHigh => write!(f, "xhigh"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Minimal => write!(f, "minimal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Working,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Working => write!(f, "working"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Spawn-time description of an agent. Everything except `role` has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AgentConfig {
    pub role: String,
    pub specialization: Option<String>,
    pub model: Option<String>,
    pub sandbox: Option<SandboxMode>,
    pub approval: Option<ApprovalPolicy>,
    pub reasoning: Option<ReasoningEffort>,
    #[serde(rename = "isLead")]
    pub is_lead: bool,
    pub cwd: Option<PathBuf>,
    /// Extra instructions appended to the composed system prompt.
    pub instructions: Option<String>,
}

impl AgentConfig {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn lead(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            is_lead: true,
            ..Default::default()
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub specialization: Option<String>,
    pub model: String,
    pub sandbox: SandboxMode,
    pub approval: ApprovalPolicy,
    pub reasoning: ReasoningEffort,
    pub is_lead: bool,
    pub cwd: PathBuf,
    pub instructions: String,

    /// Opaque resumable-thread handle from the downstream session.
    pub continuation: Option<String>,
    pub status: AgentStatus,
    pub last_output: Option<String>,
    /// Ids of tasks assigned to this agent and not yet completed.
    pub task_ids: Vec<String>,
}

impl Agent {
    /// Materialize a config with defaults applied. The id gets a random
    /// 12-hex tail so concurrent creations never collide.
    pub fn from_config(config: AgentConfig, default_cwd: &PathBuf) -> Self {
        let tail: String = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let reasoning = config.reasoning.unwrap_or(if config.is_lead {
            ReasoningEffort::XHigh
        } else {
            ReasoningEffort::High
        });

        Self {
            id: format!("{}-{}", config.role, tail),
            role: config.role,
            specialization: config.specialization,
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            sandbox: config.sandbox.unwrap_or_default(),
            approval: config.approval.unwrap_or_default(),
            reasoning,
            is_lead: config.is_lead,
            cwd: config.cwd.unwrap_or_else(|| default_cwd.clone()),
            instructions: config.instructions.unwrap_or_default(),
            continuation: None,
            status: AgentStatus::Idle,
            last_output: None,
            task_ids: Vec::new(),
        }
    }

    pub fn is_working(&self) -> bool {
        self.status == AgentStatus::Working
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub agents: HashMap<String, Agent>,
    pub tasks: HashMap<String, Task>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: format!("team-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            name: name.into(),
            created_at: Utc::now(),
            agents: HashMap::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn lead(&self) -> Option<&Agent> {
        self.agents.values().find(|a| a.is_lead)
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}
