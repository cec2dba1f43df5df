use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from: String,
    pub role: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(from: impl Into<String>, role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            from: from.into(),
            role: role.into(),
            text: text.into(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub from: String,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// What a `wait` call resolved to: either fresh unread counts, a timeout,
/// or the end of the caller's team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitOutcome {
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
    pub dissolved: bool,
    #[serde(rename = "groupChat")]
    pub group: usize,
    pub dms: usize,
    #[serde(rename = "leadChat")]
    pub lead: usize,
}

impl WaitOutcome {
    pub fn delivered(group: usize, dms: usize, lead: usize) -> Self {
        Self {
            timed_out: false,
            dissolved: false,
            group,
            dms,
            lead,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            dissolved: false,
            group: 0,
            dms: 0,
            lead: 0,
        }
    }

    pub fn dissolved() -> Self {
        Self {
            timed_out: false,
            dissolved: true,
            group: 0,
            dms: 0,
            lead: 0,
        }
    }
}
