//! Crate-wide error type.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One failed alert channel inside an aggregate notification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub channel: String,
    pub message: String,
}

impl std::fmt::Display for ChannelFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.channel, self.message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("browser render failed: {0}")]
    Render(String),

    #[error("failed to extract content: {0}")]
    Extract(String),

    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("{} of {total} alert channel(s) failed: {}", failures.len(), join_failures(failures))]
    Notify {
        total: usize,
        failures: Vec<ChannelFailure>,
    },

    #[error("monitor {0} is already running")]
    AlreadyRunning(String),

    #[error("monitor {0} is not running")]
    NotRunning(String),

    #[error("monitor {0} has not been initialized")]
    NotInitialized(String),

    #[error("a monitor for {0} already exists")]
    DuplicateMonitor(String),

    #[error("monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn join_failures(failures: &[ChannelFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
