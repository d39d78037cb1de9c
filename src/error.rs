use crate::types::IssueStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout occurred during {operation}")]
    Timeout { operation: String },

    #[error("Rate limited by {url}")]
    RateLimited { url: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid port range: {0}")]
    InvalidPortRange(String),

    #[error("Invalid target format: {0}")]
    InvalidTarget(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Wordlist error: {0}")]
    Wordlist(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config serialization error: {0}")]
    ConfigSerialization(#[from] toml::ser::Error),

    #[error("State store error: {0}")]
    State(String),

    #[error("Cannot move issue from {from} to {to}")]
    InvalidTransition { from: IssueStatus, to: IssueStatus },

    #[error("{kind} scanner unavailable: {reason}")]
    ScannerUnavailable { kind: String, reason: String },

    #[error("Reporting error: {0}")]
    Reporting(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ScanError {
    /// Whether a probe that failed with this error is worth retrying.
    ///
    /// Refused or reset connections, timeouts and 429 responses are transient.
    /// Malformed requests and everything outside the network layer are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ScanError::Network(_) | ScanError::Timeout { .. } | ScanError::RateLimited { .. } => true,
            ScanError::Http(e) => !e.is_builder() && !e.is_redirect() && !e.is_status(),
            _ => false,
        }
    }

    /// Configuration-class errors abort a scanner before any probe is sent.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScanError::Config(_)
                | ScanError::InvalidPortRange(_)
                | ScanError::InvalidTarget(_)
                | ScanError::InvalidInput(_)
                | ScanError::Wordlist(_)
                | ScanError::ScannerUnavailable { .. }
        )
    }
}
