//! Settings file management

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files under the storage layout
    #[serde(default)]
    pub log_to_file: bool,

    /// Deployment platforms releases can target
    #[serde(default = "default_platforms")]
    pub platforms: Vec<PlatformSettings>,

    /// Upgrade health check configuration
    #[serde(default)]
    pub health_check: HealthCheckSettings,

    /// Maximum number of operations executing at once across releases
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,

    /// How long a caller waits for an accepted operation to report back
    #[serde(default = "default_accept_timeout_secs")]
    pub accept_timeout_secs: u64,

    /// Replay interrupted operations on startup
    #[serde(default = "default_true")]
    pub resume_on_startup: bool,
}

fn default_true() -> bool {
    true
}

fn default_platforms() -> Vec<PlatformSettings> {
    vec![PlatformSettings::default()]
}

fn default_max_concurrent_operations() -> usize {
    8
}

fn default_accept_timeout_secs() -> u64 {
    60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            platforms: default_platforms(),
            health_check: HealthCheckSettings::default(),
            max_concurrent_operations: default_max_concurrent_operations(),
            accept_timeout_secs: default_accept_timeout_secs(),
            resume_on_startup: true,
        }
    }
}

/// Kind of backend behind a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Local,
    Memory,
}

/// Deployment platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    pub name: String,

    #[serde(default = "default_platform_kind")]
    pub kind: PlatformKind,

    /// Working directory for local instances, under the storage layout when absent
    #[serde(default)]
    pub work_dir: Option<String>,
}

fn default_platform_name() -> String {
    "default".to_string()
}

fn default_platform_kind() -> PlatformKind {
    PlatformKind::Local
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            name: default_platform_name(),
            kind: default_platform_kind(),
            work_dir: None,
        }
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    /// Delay between two health checks of an upgrade
    #[serde(default = "default_sleep_millis")]
    pub sleep_millis: u64,

    /// Upgrade health check budget when the request gives none
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,
}

fn default_sleep_millis() -> u64 {
    1000
}

fn default_timeout_millis() -> u64 {
    300_000
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            sleep_millis: default_sleep_millis(),
            timeout_millis: default_timeout_millis(),
        }
    }
}
