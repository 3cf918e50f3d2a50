//! Error types for medic.
//!
//! Three families, kept separate so a persistence failure never masks the
//! outcome of a device action:
//! - `TransportError`: anything that went wrong talking to the device tools
//! - `ScoreboardError`: loading or saving the learned weights
//! - `MedicError`: what the engine reports to its caller

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::Mode;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for a failed diagnosis/action flow
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for bad input (unknown mode, malformed config)
pub const EXIT_USAGE: i32 = 2;

/// Exit code when no device could be reached
pub const EXIT_NO_DEVICE: i32 = 69;

/// Failure of a single device command, or of device discovery.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no devices found")]
    NoDevices,

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed ({status})\n{output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },

    #[error("timeout after {}s: {command}", .after.as_secs())]
    Timeout {
        command: String,
        after: Duration,
        output: String,
    },

    #[error("cancelled: {command}")]
    Cancelled { command: String },
}

impl TransportError {
    /// Combined stdout/stderr captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            TransportError::Failed { output, .. } | TransportError::Timeout { output, .. } => {
                output
            }
            _ => "",
        }
    }

    /// Caller-triggered cancellation. Never retried or followed by a fallback.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Scoreboard persistence failure. Always non-fatal to the caller's flow.
#[derive(Error, Debug)]
pub enum ScoreboardError {
    #[error("scoreboard io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scoreboard json error at {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ScoreboardError {
    /// The file does not exist yet (first run)
    pub fn is_missing(&self) -> bool {
        matches!(self, ScoreboardError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Errors surfaced by the engine and the action catalog.
#[derive(Error, Debug)]
pub enum MedicError {
    #[error("unknown mode: {0:?}")]
    UnknownMode(String),

    #[error("action {action} cannot apply in mode {mode}")]
    UnsupportedTransition { action: String, mode: Mode },

    #[error("action {action} has no transition for its target mode")]
    UnknownTarget { action: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("config error: {0}")]
    Config(String),
}

impl MedicError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MedicError::UnknownMode(_) | MedicError::Config(_) => EXIT_USAGE,
            MedicError::Transport(TransportError::NoDevices) => EXIT_NO_DEVICE,
            _ => EXIT_FAILURE,
        }
    }

    /// The transport error underneath, if this is a device failure.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            MedicError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mode_message_is_verbatim() {
        let err = MedicError::UnknownMode("Warp-Speed".to_string());
        assert_eq!(err.to_string(), "unknown mode: \"Warp-Speed\"");
        assert_eq!(err.exit_code(), EXIT_USAGE);
    }

    #[test]
    fn test_unsupported_transition_names_action_and_mode() {
        let err = MedicError::UnsupportedTransition {
            action: "set_mode_safemode".to_string(),
            mode: Mode::Fastboot,
        };
        let msg = err.to_string();
        assert!(msg.contains("set_mode_safemode"));
        assert!(msg.contains("fastboot"));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_missing_scoreboard_is_recognised() {
        let missing = ScoreboardError::Io {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(missing.is_missing());
        let denied = ScoreboardError::Io {
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!denied.is_missing());
    }

    #[test]
    fn test_timeout_is_distinct_from_failure() {
        let timeout = TransportError::Timeout {
            command: "adb reboot".to_string(),
            after: Duration::from_secs(20),
            output: "partial".to_string(),
        };
        let failed = TransportError::Failed {
            command: "adb reboot".to_string(),
            status: "exit status: 1".to_string(),
            output: "error: device offline".to_string(),
        };
        assert!(timeout.to_string().starts_with("timeout after 20s"));
        assert!(timeout.is_timeout());
        assert!(!failed.is_timeout());
        assert_eq!(timeout.output(), "partial");
        assert!(failed.to_string().contains("error: device offline"));
    }

    #[test]
    fn test_no_devices_exit_code() {
        let err = MedicError::from(TransportError::NoDevices);
        assert_eq!(err.exit_code(), EXIT_NO_DEVICE);
        assert!(err.as_transport().is_some());
    }

    #[test]
    fn test_cancelled_is_flagged() {
        let err = TransportError::Cancelled {
            command: "fastboot reboot".to_string(),
        };
        assert!(err.is_cancelled());
        assert_eq!(err.output(), "");
    }
}
