//! Error types for the exporter.

use serde::Serialize;
use thiserror::Error;

/// Why a single jail could not be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The query did not complete within the configured timeout.
    Timeout,
    /// The response could not be parsed.
    Malformed,
    /// `fail2ban-client` exited with a failure status.
    CommandFailed,
    /// The control channel could not be reached at all.
    Unreachable,
}

impl ErrorKind {
    /// Label value used in the exposition output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Malformed => "malformed",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from talking to the Fail2ban control channel.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The control channel is unreachable.
    #[error("Fail2ban control channel unreachable: {0}")]
    Connection(String),

    /// The response to a channel-level query could not be parsed.
    #[error("Malformed response from Fail2ban: {0}")]
    Malformed(String),
}

/// A failed query for a single jail.
#[derive(Debug, Clone, Error)]
#[error("Failed to query jail '{jail}' ({kind}): {message}")]
pub struct JailQueryError {
    /// Jail that was being queried.
    pub jail: String,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human readable detail.
    pub message: String,
}

impl JailQueryError {
    /// Create a new jail query error.
    pub fn new(jail: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            jail: jail.into(),
            kind,
            message: message.into(),
        }
    }
}

/// A poll cycle that produced no snapshot.
#[derive(Debug, Clone, Error)]
#[error("Snapshot build failed: {0}")]
pub struct BuildFailure(#[from] pub ClientError);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::Timeout.as_str(), "timeout");
        assert_eq!(ErrorKind::Malformed.as_str(), "malformed");
        assert_eq!(ErrorKind::CommandFailed.as_str(), "command_failed");
        assert_eq!(ErrorKind::Unreachable.to_string(), "unreachable");
    }

    #[test]
    fn test_jail_query_error_display() {
        let err = JailQueryError::new("sshd", ErrorKind::Timeout, "no response after 5000ms");
        assert_eq!(
            err.to_string(),
            "Failed to query jail 'sshd' (timeout): no response after 5000ms"
        );
    }

    #[test]
    fn test_build_failure_wraps_client_error() {
        let failure = BuildFailure::from(ClientError::Connection("socket missing".to_string()));
        assert!(failure.to_string().contains("socket missing"));
    }
}
