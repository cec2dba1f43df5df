use thiserror::Error;

#[derive(Error, Debug)]
pub enum SquadronError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Agent {0} is busy; wait for its current call to finish")]
    Busy(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Downstream error: {0}")]
    Remote(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SquadronError {
    /// Stable machine-readable tag for wire surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Busy(_) => "busy",
            Self::Unauthorized(_) => "unauthorized",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::Timeout(_) => "timeout",
            Self::Canceled(_) => "canceled",
            Self::Transport(_) => "transport",
            Self::Remote(_) => "remote_error",
            Self::Parse(_) => "parse_error",
            Self::NotReady(_) => "not_ready",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
        }
    }

    /// True when the downstream session itself failed and a reconnect may help.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// True when a downstream error indicates the continuation no longer
    /// resolves on the other side. Matched on message text because the child
    /// does not emit a dedicated code for it.
    pub fn is_stale_continuation(&self) -> bool {
        match self {
            Self::Remote(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("thread") || lower.contains("not found")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SquadronError>;
