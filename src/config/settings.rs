use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, SquadronError};

/// Model used for agents that do not specify one.
pub const DEFAULT_MODEL: &str = "gpt-5.3-codex";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SquadronConfig {
    pub adapter: AdapterConfig,
    pub dispatch: DispatchConfig,
    pub mission: MissionConfig,
    pub comms: CommsConfig,
}

impl SquadronConfig {
    /// Load from `squadron.toml` in the given directory, falling back to
    /// defaults when the file is absent. The core reads no environment
    /// variables; this file is the only external input.
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("squadron.toml");
        let config: Self = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.adapter.call_deadline_secs == 0 {
            errors.push("adapter.call_deadline_secs must be greater than 0");
        }
        if self.dispatch.call_timeout_secs == 0 {
            errors.push("dispatch.call_timeout_secs must be greater than 0");
        }
        if self.mission.verify_timeout_secs == 0 {
            errors.push("mission.verify_timeout_secs must be greater than 0");
        }
        if self.mission.await_poll_ms == 0 {
            errors.push("mission.await_poll_ms must be greater than 0");
        }
        if self.comms.wait_min_ms > self.comms.wait_max_ms {
            errors.push("comms.wait_min_ms must not exceed comms.wait_max_ms");
        }
        if self.comms.wait_default_ms < self.comms.wait_min_ms
            || self.comms.wait_default_ms > self.comms.wait_max_ms
        {
            errors.push("comms.wait_default_ms must fall within [wait_min_ms, wait_max_ms]");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SquadronError::Config(errors.join("; ")))
        }
    }
}

/// Downstream child-process session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Program spawned as the downstream session.
    pub program: String,
    pub args: Vec<String>,
    /// Upper bound on a single agent call.
    pub call_deadline_secs: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            program: "codex".to_string(),
            args: vec!["proto".to_string()],
            call_deadline_secs: 3 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-agent timeout for fan-out dispatch calls.
    pub call_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionConfig {
    /// How long a terminal mission's comms snapshot stays retrievable.
    pub retention_secs: u64,
    pub verify_timeout_secs: u64,
    pub await_poll_ms: u64,
    pub await_timeout_ms: u64,
    pub max_fix_retries: u32,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            retention_secs: 30 * 60,
            verify_timeout_secs: 10 * 60,
            await_poll_ms: 3_000,
            await_timeout_ms: 60 * 60 * 1_000,
            max_fix_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommsConfig {
    pub max_chat_chars: usize,
    pub max_share_chars: usize,
    pub wait_min_ms: u64,
    pub wait_max_ms: u64,
    pub wait_default_ms: u64,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            max_chat_chars: 50_000,
            max_share_chars: 100_000,
            wait_min_ms: 1_000,
            wait_max_ms: 60_000,
            wait_default_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SquadronConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mission.max_fix_retries, 2);
        assert_eq!(config.comms.wait_default_ms, 30_000);
    }

    #[test]
    fn test_validate_rejects_inverted_wait_bounds() {
        let mut config = SquadronConfig::default();
        config.comms.wait_min_ms = 90_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wait_min_ms"));
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SquadronConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.adapter.call_deadline_secs, 3 * 60 * 60);
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("squadron.toml"),
            "[mission]\nretention_secs = 60\n",
        )
        .await
        .unwrap();

        let config = SquadronConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.mission.retention_secs, 60);
        assert_eq!(config.dispatch.call_timeout_secs, 30 * 60);
    }
}
