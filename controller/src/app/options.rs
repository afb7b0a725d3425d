//! Application configuration options

use std::time::Duration;

use crate::storage::layout::StorageLayout;
use crate::storage::settings::{PlatformSettings, Settings};
use crate::workers::release_machine;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Deployment platforms
    pub platforms: Vec<PlatformSettings>,

    /// Lifecycle machine options
    pub machine: release_machine::Options,

    /// Maximum number of operations executing at once
    pub max_concurrent_operations: usize,

    /// How long a caller waits for an accepted operation
    pub accept_timeout: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            platforms: vec![PlatformSettings::default()],
            machine: release_machine::Options::default(),
            max_concurrent_operations: 8,
            accept_timeout: Duration::from_secs(60),
        }
    }
}

impl AppOptions {
    /// Options from a settings file rooted at `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                resume_on_startup: settings.resume_on_startup,
                ..Default::default()
            },
            storage: StorageOptions { layout },
            platforms: settings.platforms.clone(),
            machine: release_machine::Options {
                health_check_interval: Duration::from_millis(settings.health_check.sleep_millis),
                default_upgrade_timeout: Duration::from_millis(settings.health_check.timeout_millis),
            },
            max_concurrent_operations: settings.max_concurrent_operations.max(1),
            accept_timeout: Duration::from_secs(settings.accept_timeout_secs),
        }
    }
}

/// Lifecycle options for the controller
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Replay interrupted operations on startup
    pub resume_on_startup: bool,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            resume_on_startup: true,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,
}
