//! Release models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::AppStatus;

/// Status code of a release version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    Unknown,
    Deployed,
    Deleted,
    Failed,
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            StatusCode::Unknown => "UNKNOWN",
            StatusCode::Deployed => "DEPLOYED",
            StatusCode::Deleted => "DELETED",
            StatusCode::Failed => "FAILED",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub status_code: StatusCode,

    /// Live per-app statuses, filled in by status queries only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platform_status: Vec<AppStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Info {
    pub status: Status,
    pub description: String,
    pub first_deployed: DateTime<Utc>,
    #[serde(default)]
    pub last_deployed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,
}

impl Info {
    pub fn underway(description: impl Into<String>) -> Self {
        Self {
            status: Status {
                status_code: StatusCode::Unknown,
                platform_status: Vec::new(),
            },
            description: description.into(),
            first_deployed: Utc::now(),
            last_deployed: None,
            deleted: None,
        }
    }
}

/// Name and version of the package a release was rendered from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
}

/// One version of a named release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub version: u32,
    pub platform_name: String,
    #[serde(default)]
    pub config_values: serde_json::Value,
    /// Rendered manifest, a JSON array of app manifests
    pub manifest: String,
    pub pkg: PackageMetadata,
    pub info: Info,
}

impl Release {
    pub fn status_code(&self) -> StatusCode {
        self.info.status.status_code
    }

    pub fn description(&self) -> &str {
        &self.info.description
    }

    pub fn is(&self, code: StatusCode) -> bool {
        self.status_code() == code
    }

    /// Set a terminal status and stamp the matching timestamp
    pub fn set_status(&mut self, code: StatusCode, description: impl Into<String>) {
        self.info.status.status_code = code;
        self.info.status.platform_status.clear();
        self.info.description = description.into();
        match code {
            StatusCode::Deployed => self.info.last_deployed = Some(Utc::now()),
            StatusCode::Deleted => self.info.deleted = Some(Utc::now()),
            StatusCode::Unknown | StatusCode::Failed => {}
        }
    }

    pub fn label(&self) -> String {
        format!("{}-v{}", self.name, self.version)
    }
}
