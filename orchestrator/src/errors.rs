//! Error types for the fleet orchestrator

use thiserror::Error;

/// Planning errors, surfaced before any device is touched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Unsupported capability: device {device_id} lacks {capability_id}")]
    UnsupportedCapability {
        device_id: String,
        capability_id: String,
    },

    #[error("Ambiguous target: {0}")]
    AmbiguousTarget(String),

    #[error("Conflicting parameters: {first} and {second} are mutually exclusive for {capability_id}")]
    ConflictingParameters {
        capability_id: String,
        first: String,
        second: String,
    },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
}

/// Main error type for the fleet orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Planning error: {0}")]
    PlanError(#[from] PlanError),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Registry error: {0}")]
    RegistryError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Rollout error: {0}")]
    RolloutError(String),

    #[error("Credential error: {0}")]
    CredentialError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
