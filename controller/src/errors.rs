//! Error types for the release controller

use thiserror::Error;

/// Main error type for the release controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Persistence failure; aborts the current transition unchanged
    #[error("Store error: {0}")]
    StoreError(String),

    /// Backend deploy/undeploy/scale failure
    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Platform not found: {0}")]
    PlatformNotFound(String),

    #[error("Deployment record not found for release {name}-v{version}")]
    DeploymentRecordNotFound { name: String, version: u32 },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Upgrade rejected: {0}")]
    UpgradeRejected(String),

    #[error("Release [{release_name}] is busy, {event} not accepted")]
    NotAccepted { release_name: String, event: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Persistence failures propagate out of every step untouched
    pub fn is_store_failure(&self) -> bool {
        matches!(self, ControllerError::StoreError(_))
    }

    pub fn is_not_accepted(&self) -> bool {
        matches!(self, ControllerError::NotAccepted { .. })
    }

    /// Reclassify an IO/JSON failure raised by a store backend
    pub fn into_store(self) -> Self {
        match self {
            ControllerError::IoError(e) => ControllerError::StoreError(e.to_string()),
            ControllerError::JsonError(e) => ControllerError::StoreError(e.to_string()),
            other => other,
        }
    }
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        ControllerError::Internal(format!("{err:#}"))
    }
}
