//! Deployment backends

pub mod local;
pub mod memory;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{AppDeploymentRequest, AppStatus};
use crate::storage::settings::{PlatformKind, PlatformSettings};

/// Backend able to run the apps of a release
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Start an app and return its deployment id
    async fn deploy(&self, request: AppDeploymentRequest) -> Result<String, ControllerError>;

    async fn undeploy(&self, deployment_id: &str) -> Result<(), ControllerError>;

    async fn status(&self, deployment_id: &str) -> Result<AppStatus, ControllerError>;

    async fn scale(
        &self,
        deployment_id: &str,
        count: u32,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError>;

    /// Get the backend type
    fn platform_type(&self) -> &str;
}

/// Platform name to backend lookup
#[derive(Default, Clone)]
pub struct DeployerRegistry {
    deployers: HashMap<String, Arc<dyn Deployer>>,
}

impl DeployerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platform_name: impl Into<String>, deployer: Arc<dyn Deployer>) -> Self {
        self.register(platform_name, deployer);
        self
    }

    pub fn register(&mut self, platform_name: impl Into<String>, deployer: Arc<dyn Deployer>) {
        self.deployers.insert(platform_name.into(), deployer);
    }

    pub fn lookup(&self, platform_name: &str) -> Result<Arc<dyn Deployer>, ControllerError> {
        self.deployers
            .get(platform_name)
            .cloned()
            .ok_or_else(|| ControllerError::PlatformNotFound(platform_name.to_string()))
    }

    pub fn contains(&self, platform_name: &str) -> bool {
        self.deployers.contains_key(platform_name)
    }

    pub fn platform_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.deployers.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Factory for creating deployers from platform settings
pub struct DeployerFactory;

impl DeployerFactory {
    pub fn create(platform: &PlatformSettings, work_root: &Dir) -> Arc<dyn Deployer> {
        match platform.kind {
            PlatformKind::Local => {
                let work_dir = match &platform.work_dir {
                    Some(dir) => Dir::new(dir),
                    None => work_root.subdir(&platform.name),
                };
                Arc::new(local::LocalDeployer::new(work_dir))
            }
            PlatformKind::Memory => Arc::new(memory::InMemoryDeployer::new()),
        }
    }

    pub fn registry(platforms: &[PlatformSettings], work_root: &Dir) -> DeployerRegistry {
        platforms.iter().fold(DeployerRegistry::new(), |registry, platform| {
            registry.with(platform.name.clone(), Self::create(platform, work_root))
        })
    }
}
