//! Application state management

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::decision::DecisionStep;
use crate::deploy::delete_step::DeleteStep;
use crate::deploy::deploy_step::DeployStep;
use crate::deploy::health_check::HealthCheckStep;
use crate::deploy::strategy::RedBlackUpgradeStrategy;
use crate::deployer::{DeployerFactory, DeployerRegistry};
use crate::errors::ControllerError;
use crate::manifest::diff::DigestDiffEngine;
use crate::service::controller::LifecycleController;
use crate::service::release_service::ReleaseService;
use crate::storage::fs::{
    FileDeploymentMapStore, FileMachineStore, FilePackageRepository, FileReleaseStore,
};
use crate::storage::{DeploymentMapStore, MachineStore, PackageRepository, ReleaseStore};
use crate::workers::release_machine::{LogObserver, MachineContext};

/// Stores behind the controller
#[derive(Clone)]
pub struct Stores {
    pub releases: Arc<dyn ReleaseStore>,
    pub deployment_maps: Arc<dyn DeploymentMapStore>,
    pub machines: Arc<dyn MachineStore>,
    pub packages: Arc<dyn PackageRepository>,
}

/// Main application state
pub struct AppState {
    pub stores: Stores,

    /// Deployers by platform name
    pub deployers: Arc<DeployerRegistry>,

    /// Release lifecycle controller
    pub controller: Arc<LifecycleController>,
}

impl AppState {
    /// Initialize application state on JSON file stores
    pub async fn init(options: &AppOptions) -> Result<Self, ControllerError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        layout.setup().await?;

        let stores = Stores {
            releases: Arc::new(FileReleaseStore::new(layout.releases_dir())),
            deployment_maps: Arc::new(FileDeploymentMapStore::new(layout.deployments_dir())),
            machines: Arc::new(FileMachineStore::new(layout.machines_dir())),
            packages: Arc::new(FilePackageRepository::new(layout.packages_dir())),
        };
        let deployers = Arc::new(DeployerFactory::registry(&options.platforms, &layout.work_dir()));
        info!("Platforms available: {:?}", deployers.platform_names());

        Ok(Self::assemble(stores, deployers, options))
    }

    /// Wire the service, strategy and controller on top of given stores
    pub fn assemble(stores: Stores, deployers: Arc<DeployerRegistry>, options: &AppOptions) -> Self {
        let service = ReleaseService::new(
            stores.releases.clone(),
            stores.deployment_maps.clone(),
            stores.packages.clone(),
            deployers.clone(),
            Arc::new(DigestDiffEngine),
        );

        let delete_step = Arc::new(DeleteStep::new(stores.releases.clone(), deployers.clone()));
        let strategy = RedBlackUpgradeStrategy::new(
            DeployStep::new(
                stores.releases.clone(),
                stores.deployment_maps.clone(),
                deployers.clone(),
            ),
            HealthCheckStep::new(stores.deployment_maps.clone(), deployers.clone()),
            DecisionStep::new(
                stores.releases.clone(),
                stores.deployment_maps.clone(),
                delete_step,
            ),
        );

        let context = Arc::new(MachineContext {
            operations: Arc::new(service),
            strategy: strategy.into_shared(),
            machines: stores.machines.clone(),
            observer: Arc::new(LogObserver),
            pool: Arc::new(Semaphore::new(options.max_concurrent_operations)),
            options: options.machine.clone(),
        });
        let controller = Arc::new(LifecycleController::new(context, options.accept_timeout));

        Self {
            stores,
            deployers,
            controller,
        }
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        info!("Shutting down application state...");
        self.controller.shutdown().await
    }
}
