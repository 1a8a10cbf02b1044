use serde_json::{Value, json};
use thiserror::Error;

/// Failure taxonomy shared by every state component. None of these cross the
/// subsystem boundary as an error; each resolves to a default value plus a
/// journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Parse,
    Oversize,
    Io,
    Timeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse_failure",
            Self::Oversize => "oversize_failure",
            Self::Io => "io_failure",
            Self::Timeout => "timeout_failure",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateFailure {
    #[error("state is unparseable or structurally invalid: {0}")]
    Parse(String),
    #[error("state is {found} bytes, limit is {limit}")]
    Oversize { found: u64, limit: u64 },
    #[error("state i/o failed: {0}")]
    Io(String),
}

impl StateFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Parse(_) => FailureKind::Parse,
            Self::Oversize { .. } => FailureKind::Oversize,
            Self::Io(_) => FailureKind::Io,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryFailure {
    #[error("query worker timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("query worker exited with {}: {stderr}", exit_label(.code))]
    Exit { code: Option<i32>, stderr: String },
    #[error("query worker output rejected: {0}")]
    Output(String),
    #[error("query worker could not be started: {0}")]
    Spawn(String),
    #[error("query worker unavailable: {0}")]
    Unavailable(String),
    #[error("query worker cancelled")]
    Cancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "signal".to_string(),
    }
}

impl QueryFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } | Self::Cancelled => FailureKind::Timeout,
            Self::Output(_) => FailureKind::Parse,
            Self::Exit { .. } | Self::Spawn(_) | Self::Unavailable(_) => FailureKind::Io,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Exit { .. } => "worker_error",
            Self::Output(_) => "invalid_output",
            Self::Spawn(_) => "setup_error",
            Self::Unavailable(_) => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }

    /// Structured form handed back to callers in place of a payload.
    pub fn to_value(&self) -> Value {
        json!({
            "status": self.status(),
            "kind": self.kind().as_str(),
            "error": self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FailureKind, QueryFailure, StateFailure};

    #[test]
    fn timeout_failure_serializes_with_reason() {
        let failure = QueryFailure::Timeout { timeout_secs: 300 };
        let value = failure.to_value();
        assert_eq!(value["status"], "timeout");
        assert_eq!(value["kind"], "timeout_failure");
        assert!(
            value["error"]
                .as_str()
                .expect("error string")
                .contains("300s")
        );
    }

    #[test]
    fn exit_failure_without_code_reports_signal() {
        let failure = QueryFailure::Exit {
            code: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(failure.to_string(), "query worker exited with signal: killed");
        assert_eq!(failure.kind(), FailureKind::Io);
    }

    #[test]
    fn oversize_maps_to_oversize_kind() {
        let failure = StateFailure::Oversize {
            found: 300_000,
            limit: 262_144,
        };
        assert_eq!(failure.kind().as_str(), "oversize_failure");
    }
}
