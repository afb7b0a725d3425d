//! API models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reference to a package in the package repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentifier {
    pub package_name: String,
    /// Latest uploaded version when absent
    #[serde(default)]
    pub package_version: Option<String>,
}

/// Release level settings for an install
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallProperties {
    pub release_name: String,
    pub platform_name: String,
    #[serde(default)]
    pub config_values: serde_json::Value,
}

/// Install a package as a new release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub package_identifier: PackageIdentifier,
    pub install_properties: InstallProperties,
}

/// Release level settings for an upgrade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeProperties {
    pub release_name: String,
    #[serde(default)]
    pub config_values: serde_json::Value,
}

/// Upgrade an installed release to a new package or configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    pub package_identifier: PackageIdentifier,
    pub upgrade_properties: UpgradeProperties,
    /// Health check budget; the controller default applies when absent
    #[serde(default)]
    pub timeout_millis: Option<u64>,
    /// Upgrade even when the rendered manifests are identical
    #[serde(default)]
    pub force: bool,
    /// Apps redeployed on a forced upgrade; every app when empty
    #[serde(default)]
    pub app_names: Vec<String>,
}

/// Roll a release back to a prior version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub release_name: String,
    /// Target version, 0 selects the previous usable version
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub timeout_millis: Option<u64>,
}

/// Delete options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProperties {
    /// Also remove the package from the repository
    #[serde(default)]
    pub delete_package: bool,
}

/// Instance count change for one app of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequestItem {
    pub name: String,
    pub count: u32,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Scale apps of a release without creating a new version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub scale: Vec<ScaleRequestItem>,
}
