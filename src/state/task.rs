use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub assignee: String,
    pub prerequisites: Vec<String>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        assignee: impl Into<String>,
        description: impl Into<String>,
        prerequisites: Vec<String>,
    ) -> Self {
        Self {
            id: format!("task-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            description: description.into(),
            status: TaskStatus::Pending,
            assignee: assignee.into(),
            prerequisites,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
