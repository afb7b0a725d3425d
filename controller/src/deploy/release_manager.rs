//! Whole-release backend actions: install, delete, scale, status

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{error, info, warn};

use release_api::models::ScaleRequest;

use crate::deploy::delete_step::DeleteStep;
use crate::deploy::deploy_step::deployment_request;
use crate::deployer::DeployerRegistry;
use crate::errors::ControllerError;
use crate::manifest;
use crate::models::deployment::{AppStatus, DeploymentRecord, DeploymentState};
use crate::models::release::{Release, StatusCode};
use crate::storage::{DeploymentMapStore, ReleaseStore};

pub const INSTALL_COMPLETE: &str = "Install complete";
pub const INSTALL_FAILED: &str = "Install failed";
pub const DELETE_FAILED: &str = "Could not delete release, manual intervention needed.";

pub struct ReleaseManager {
    releases: Arc<dyn ReleaseStore>,
    deployment_maps: Arc<dyn DeploymentMapStore>,
    deployers: Arc<DeployerRegistry>,
    delete_step: Arc<DeleteStep>,
}

impl ReleaseManager {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        deployment_maps: Arc<dyn DeploymentMapStore>,
        deployers: Arc<DeployerRegistry>,
        delete_step: Arc<DeleteStep>,
    ) -> Self {
        Self {
            releases,
            deployment_maps,
            deployers,
            delete_step,
        }
    }

    /// Deploy every app of a saved release version.
    ///
    /// Backend failures end as FAILED `Install failed` with the record of
    /// whatever did deploy saved. Store failures propagate.
    pub async fn install(&self, mut release: Release) -> Result<Release, ControllerError> {
        let mut deployments = BTreeMap::new();
        let outcome = self.deploy_all(&release, &mut deployments).await;

        let record = DeploymentRecord::new(&release.name, release.version, deployments);
        self.deployment_maps.save(&record).await?;

        match outcome {
            Ok(()) => {
                release.set_status(StatusCode::Deployed, INSTALL_COMPLETE);
                info!("Installed release {}", release.label());
            }
            Err(e) if e.is_store_failure() => return Err(e),
            Err(e) => {
                error!("Install of {} failed: {}", release.label(), e);
                release.set_status(StatusCode::Failed, INSTALL_FAILED);
            }
        }
        self.releases.save(&release).await?;
        Ok(release)
    }

    async fn deploy_all(
        &self,
        release: &Release,
        deployments: &mut BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let apps = manifest::parse(&release.manifest)?;
        let deployer = self.deployers.lookup(&release.platform_name)?;
        for app in &apps {
            let deployment_id = deployer.deploy(deployment_request(release, app)).await?;
            deployments.insert(app.name.clone(), deployment_id);
        }
        Ok(())
    }

    /// Undeploy every app of the release and mark it DELETED
    pub async fn delete(&self, mut release: Release) -> Result<Release, ControllerError> {
        let record = match self
            .deployment_maps
            .find_by_name_and_version(&release.name, release.version)
            .await?
        {
            Some(record) => record,
            None => {
                warn!("No deployment record for {}, nothing to undeploy", release.label());
                DeploymentRecord::new(&release.name, release.version, BTreeMap::new())
            }
        };
        let app_names: BTreeSet<String> = record.deployments.keys().cloned().collect();

        match self.delete_step.delete(&mut release, &record, &app_names, true).await {
            Ok(undeployed) => {
                info!("Deleted release {} ({} apps)", release.label(), undeployed.len());
                Ok(release)
            }
            Err(e) if e.is_store_failure() => Err(e),
            Err(e) => {
                error!("Release {} could not be deleted: {}", release.label(), e);
                release.set_status(StatusCode::Failed, DELETE_FAILED);
                self.releases.save(&release).await?;
                Ok(release)
            }
        }
    }

    /// Adjust instance counts of named apps. The release version is unchanged.
    pub async fn scale(&self, release: &Release, request: &ScaleRequest) -> Result<(), ControllerError> {
        let record = self
            .deployment_maps
            .find_required(&release.name, release.version)
            .await?;
        let deployer = self.deployers.lookup(&release.platform_name)?;

        for item in &request.scale {
            let deployment_id = record.deployment_id(&item.name).ok_or_else(|| {
                ControllerError::ValidationError(format!(
                    "App [{}] is not part of release {}",
                    item.name,
                    release.label()
                ))
            })?;
            deployer.scale(deployment_id, item.count, &item.properties).await?;
            info!("Scaled {} of {} to {}", item.name, release.label(), item.count);
        }
        Ok(())
    }

    /// Attach live per-app statuses
    pub async fn status(&self, mut release: Release) -> Result<Release, ControllerError> {
        let Some(record) = self
            .deployment_maps
            .find_by_name_and_version(&release.name, release.version)
            .await?
        else {
            return Ok(release);
        };
        let deployer = self.deployers.lookup(&release.platform_name)?;

        let mut statuses = Vec::with_capacity(record.deployments.len());
        for deployment_id in record.deployment_ids() {
            let status = match deployer.status(deployment_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!("Status of {} unavailable: {}", deployment_id, e);
                    AppStatus::of(deployment_id, DeploymentState::Unknown)
                }
            };
            statuses.push(status);
        }
        release.info.status.platform_status = statuses;
        Ok(release)
    }
}
