//! Custom error types for process-key-scheduler.
//!
//! This module provides structured error types using `thiserror`. Only
//! [`PksError::Configuration`] and [`PksError::InvalidTransition`] are ever
//! returned synchronously by the scheduler; every per-tick failure is turned
//! into a log entry and an [`EngineEvent::Error`](crate::engine::EngineEvent).

use std::io;
use thiserror::Error;

use crate::engine::SendingState;

/// Main error type for process-key-scheduler operations.
#[derive(Error, Debug)]
pub enum PksError {
    /// The scheduler was asked to start with an unusable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A step references a key name with no platform mapping.
    #[error("unknown key name '{key}'")]
    UnknownKey { key: String },

    /// A text or combo step has no text payload.
    #[error("step {index} has no text content")]
    EmptyContent { index: usize },

    /// The event poster returned failure or raised a transport error.
    #[error("failed to post '{step}' to {target}: {reason}")]
    PosterFailure {
        step: String,
        target: String,
        reason: String,
    },

    /// The watchdog found the target window and process gone.
    #[error("target '{name}' (pid {pid}) is no longer available")]
    TargetLost { name: String, pid: u32 },

    /// An operation was requested from a state that does not allow it.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SendingState,
    },

    /// A sequence position was outside the sequence.
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error finding the window of a target process.
    #[error("window error: {0}")]
    Window(String),

    /// Platform-specific operation is not supported.
    #[error("operation not supported on this platform: {0}")]
    UnsupportedPlatform(String),

    /// Error registering or handling hotkey.
    #[error("hotkey error: {0}")]
    Hotkey(String),

    /// The scheduler task is no longer running.
    #[error("scheduler task has shut down")]
    SchedulerClosed,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for process-key-scheduler operations.
pub type Result<T> = std::result::Result<T, PksError>;

impl PksError {
    /// Create a new Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new UnknownKey error.
    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Create a new PosterFailure error.
    pub fn poster_failure(
        step: impl Into<String>,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PosterFailure {
            step: step.into(),
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a new TargetLost error.
    pub fn target_lost(name: impl Into<String>, pid: u32) -> Self {
        Self::TargetLost {
            name: name.into(),
            pid,
        }
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new UnsupportedPlatform error.
    pub fn unsupported_platform(message: impl Into<String>) -> Self {
        Self::UnsupportedPlatform(message.into())
    }

    /// Create a new Window error.
    pub fn window(message: impl Into<String>) -> Self {
        Self::Window(message.into())
    }

    /// Create a new Hotkey error.
    pub fn hotkey(message: impl Into<String>) -> Self {
        Self::Hotkey(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PksError::unknown_key("Retrun");
        assert_eq!(err.to_string(), "unknown key name 'Retrun'");

        let err = PksError::configuration("step sequence is empty");
        assert_eq!(err.to_string(), "configuration error: step sequence is empty");

        let err = PksError::InvalidTransition {
            operation: "start",
            state: SendingState::Paused,
        };
        assert_eq!(err.to_string(), "cannot start while paused");

        let err = PksError::target_lost("Terminal", 4711);
        assert_eq!(
            err.to_string(),
            "target 'Terminal' (pid 4711) is no longer available"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let pks_err: PksError = io_err.into();
        assert!(matches!(pks_err, PksError::Io(_)));
    }
}
