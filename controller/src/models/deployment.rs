//! Deployment models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// State reported by a backend for one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    Unknown,
    Deploying,
    Deployed,
    Failed,
    Complete,
}

/// Backend status of a deployed app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub deployment_id: String,
    pub state: DeploymentState,
    #[serde(default)]
    pub instances: u32,
}

impl AppStatus {
    pub fn of(deployment_id: impl Into<String>, state: DeploymentState) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            state,
            instances: 0,
        }
    }
}

/// Logical app name to backend deployment id for one release version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub release_name: String,
    pub release_version: u32,
    pub deployments: BTreeMap<String, String>,
}

impl DeploymentRecord {
    pub fn new(
        release_name: impl Into<String>,
        release_version: u32,
        deployments: BTreeMap<String, String>,
    ) -> Self {
        Self {
            release_name: release_name.into(),
            release_version,
            deployments,
        }
    }

    pub fn deployment_id(&self, app_name: &str) -> Option<&str> {
        self.deployments.get(app_name).map(String::as_str)
    }

    pub fn deployment_ids(&self) -> Vec<&str> {
        self.deployments.values().map(String::as_str).collect()
    }
}

/// Everything a backend needs to start one app of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDeploymentRequest {
    pub release_name: String,
    pub release_version: u32,
    pub app_name: String,
    pub resource: String,
    #[serde(default)]
    pub application_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub deployment_properties: BTreeMap<String, String>,
}

impl AppDeploymentRequest {
    /// Instance count from the `count` deployment property, 1 when absent
    pub fn count(&self) -> u32 {
        self.deployment_properties
            .get(COUNT_PROPERTY)
            .and_then(|c| c.parse().ok())
            .unwrap_or(1)
    }
}

pub const COUNT_PROPERTY: &str = "count";
