//! Error types for the DSS qualifier
//!
//! Configuration and resource errors are raised before any scenario runs.
//! Scenario aborts travel through the same type so that `?` can carry a
//! high-severity check failure out of a scenario body.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the DSS qualifier
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid suite definition '{path}': {reason}")]
    SuiteParse { path: String, reason: String },

    // === Resource Errors ===
    #[error("Resource '{0}' is not declared in the suite")]
    ResourceNotFound(String),

    #[error("Resource '{name}' is a {actual} but a {expected} is required")]
    ResourceKind {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Scenario '{scenario}' requires resource '{role}' which was not bound")]
    MissingResource { scenario: String, role: String },

    #[error("Unknown scenario type '{0}'. Use 'dss-qualifier list' to see available scenarios")]
    UnknownScenario(String),

    #[error("Invalid parameter '{name}' for scenario '{scenario}': {reason}")]
    InvalidParameter {
        scenario: String,
        name: String,
        reason: String,
    },

    // === Scenario Errors ===
    #[error("Cannot {action} while scenario is {phase}")]
    InvalidPhase { action: String, phase: String },

    #[error("'{name}' is not a documented {kind} of scenario '{scenario}'")]
    Undocumented {
        scenario: String,
        kind: String,
        name: String,
    },

    #[error("Scenario cannot continue: {0}")]
    ScenarioCannotContinue(String),

    #[error("Test run cannot continue: {0}")]
    TestRunCannotContinue(String),

    #[error("Test run was not successful: {failed} of {total} scenarios failed")]
    TestRunFailed { failed: usize, total: usize },

    // === DSS Errors ===
    #[error("Failed to obtain access token for scope '{scope}': {message}")]
    Auth { scope: String, message: String },

    #[error("HTTP client error: {0}")]
    Http(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a resource kind mismatch error
    pub fn resource_kind(name: &str, expected: &str, actual: &str) -> Self {
        Self::ResourceKind {
            name: name.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a missing resource binding error
    pub fn missing_resource(scenario: &str, role: &str) -> Self {
        Self::MissingResource {
            scenario: scenario.to_string(),
            role: role.to_string(),
        }
    }

    /// Create an invalid phase error
    pub fn invalid_phase(action: &str, phase: impl std::fmt::Display) -> Self {
        Self::InvalidPhase {
            action: action.to_string(),
            phase: phase.to_string(),
        }
    }

    /// Create an undocumented test case/step/check error
    pub fn undocumented(scenario: &str, kind: &str, name: &str) -> Self {
        Self::Undocumented {
            scenario: scenario.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    /// Create an invalid scenario parameter error
    pub fn invalid_parameter(scenario: &str, name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            scenario: scenario.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a file read error
    pub fn file_read(path: &std::path::Path, error: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.display().to_string(),
            error: error.to_string(),
        }
    }

    /// Short machine-readable code used in reports
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::ConfigParse(_) | Error::SuiteParse { .. } => "CONFIGURATION",
            Error::ResourceNotFound(_)
            | Error::ResourceKind { .. }
            | Error::MissingResource { .. }
            | Error::InvalidParameter { .. } => "RESOURCE",
            Error::UnknownScenario(_) => "UNKNOWN_SCENARIO",
            Error::InvalidPhase { .. } | Error::Undocumented { .. } => "SCENARIO_DEFINITION",
            Error::ScenarioCannotContinue(_) => "SCENARIO_CANNOT_CONTINUE",
            Error::TestRunCannotContinue(_) => "TEST_RUN_CANNOT_CONTINUE",
            Error::TestRunFailed { .. } => "TEST_RUN_FAILED",
            Error::Auth { .. } => "AUTH",
            Error::Http(_) => "HTTP",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether this error must stop the remaining scenarios of a run
    pub fn aborts_run(&self) -> bool {
        matches!(self, Error::TestRunCannotContinue(_))
    }
}
