//! Error types for rsipp
//!
//! Configuration errors surface at assignment time. Process failures are
//! aggregated by the runner and reported once, after every agent finished.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rsipp
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("No settable field '{name}' defined")]
    UnknownField { name: String },

    #[error("Invalid value for '{field}': expected {expected}")]
    InvalidValue { field: String, expected: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === Launch Errors ===
    #[error("Failed to launch '{cmd}': {source}")]
    Launch {
        cmd: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse command '{cmd}': {reason}")]
    CommandParse { cmd: String, reason: String },

    #[error("Command is empty after parsing: '{0}'")]
    EmptyCommand(String),

    #[error("Command submitted more than once: '{0}'")]
    DuplicateCommand(String),

    // === Runner Errors ===
    #[error("Not all processes from a prior run have completed")]
    RunIncomplete,

    #[error("Process results have not been cleared from previous run")]
    ResultsNotCleared,

    #[error("pids {pids:?} failed to complete after {secs} seconds")]
    Timeout { pids: Vec<u32>, secs: f64 },

    #[error("Unable to stop all agents, still alive: {0:?}")]
    Supervisory(Vec<u32>),

    #[error("Cannot {action} while runner is {state}")]
    InvalidState { action: String, state: String },

    // === Agent Failures ===
    #[error("{0}")]
    SippFailure(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid value error
    pub fn invalid_value(field: &str, expected: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Create an unknown field error
    pub fn unknown_field(name: &str) -> Self {
        Self::UnknownField {
            name: name.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Whether this error came from a deadline rather than an agent failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
