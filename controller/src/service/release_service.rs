//! Release service
//!
//! Entry points the lifecycle machine calls from its state actions. Every
//! method reads and writes the stores directly; nothing here is cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use release_api::models::{
    DeleteProperties, InstallRequest, RollbackRequest, ScaleRequest, UpgradeRequest,
};

use crate::deploy::decision::EXISTING_DELETE_FAILED;
use crate::deploy::delete_step::DeleteStep;
use crate::deploy::release_manager::ReleaseManager;
use crate::deployer::DeployerRegistry;
use crate::errors::ControllerError;
use crate::manifest::diff::{DiffEngine, ReleaseDiff};
use crate::manifest::{self, Package};
use crate::models::release::{Info, Release, StatusCode};
use crate::storage::{DeploymentMapStore, PackageRepository, ReleaseStore};

pub const INSTALL_UNDERWAY: &str = "Initial install underway";
pub const UPGRADE_UNDERWAY: &str = "Upgrade install underway";
pub const ROLLBACK_UNDERWAY: &str = "Rollback install underway";
pub const INTERRUPTED: &str = "Operation interrupted by a controller restart.";
pub const NO_DIFFERENCE: &str =
    "Package to upgrade has no difference than existing deployed/deleted package. Not upgrading.";

/// Where a rollback continues once its target is known
#[derive(Debug, Clone, PartialEq)]
pub enum RollbackPlan {
    /// Nothing is live, reinstall the target as a new version
    Install { target: Release },
    /// Red/black upgrade from the live version towards the target
    Upgrade { target: Release },
}

impl RollbackPlan {
    pub fn target(&self) -> &Release {
        match self {
            RollbackPlan::Install { target } | RollbackPlan::Upgrade { target } => target,
        }
    }
}

/// What recovery found and finished before an interrupted operation replays
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Nothing was left half done
    Clean,
    /// An UNKNOWN latest version was undeployed and closed
    Reverted(Release),
    /// The latest version was already DEPLOYED; these older DEPLOYED versions
    /// were retired in its place
    Retired(Vec<Release>),
}

/// Release operations driven by the lifecycle machine
#[async_trait]
pub trait ReleaseOperations: Send + Sync {
    async fn install(&self, request: &InstallRequest) -> Result<Release, ControllerError>;

    /// Reinstall a prior version's package and manifest as a new version
    async fn install_from_release(&self, target: &Release) -> Result<Release, ControllerError>;

    /// Save the candidate version and compute what changes
    async fn create_upgrade_report(&self, request: &UpgradeRequest) -> Result<ReleaseDiff, ControllerError>;

    async fn create_rollback_report(&self, target: &Release) -> Result<ReleaseDiff, ControllerError>;

    async fn resolve_rollback(&self, request: &RollbackRequest) -> Result<RollbackPlan, ControllerError>;

    /// Finish or undo what a crash left half done before an operation is replayed
    async fn recover_interrupted_upgrade(&self, release_name: &str) -> Result<Recovery, ControllerError>;

    async fn delete(
        &self,
        release_name: &str,
        properties: &DeleteProperties,
    ) -> Result<Release, ControllerError>;

    async fn scale(&self, release_name: &str, request: &ScaleRequest) -> Result<Release, ControllerError>;

    /// Latest version with live app statuses
    async fn status(&self, release_name: &str) -> Result<Release, ControllerError>;

    /// Every version, newest first
    async fn history(&self, release_name: &str) -> Result<Vec<Release>, ControllerError>;

    /// Rendered manifest of a version, the latest when none is given
    async fn manifest(&self, release_name: &str, version: Option<u32>) -> Result<String, ControllerError>;
}

pub struct ReleaseService {
    releases: Arc<dyn ReleaseStore>,
    deployment_maps: Arc<dyn DeploymentMapStore>,
    packages: Arc<dyn PackageRepository>,
    deployers: Arc<DeployerRegistry>,
    diff_engine: Arc<dyn DiffEngine>,
    delete_step: Arc<DeleteStep>,
    manager: ReleaseManager,
}

impl ReleaseService {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        deployment_maps: Arc<dyn DeploymentMapStore>,
        packages: Arc<dyn PackageRepository>,
        deployers: Arc<DeployerRegistry>,
        diff_engine: Arc<dyn DiffEngine>,
    ) -> Self {
        let delete_step = Arc::new(DeleteStep::new(releases.clone(), deployers.clone()));
        let manager = ReleaseManager::new(
            releases.clone(),
            deployment_maps.clone(),
            deployers.clone(),
            delete_step.clone(),
        );
        Self {
            releases,
            deployment_maps,
            packages,
            deployers,
            diff_engine,
            delete_step,
            manager,
        }
    }

    async fn latest_required(&self, release_name: &str) -> Result<Release, ControllerError> {
        self.releases
            .find_latest(release_name)
            .await?
            .ok_or_else(|| ControllerError::ReleaseNotFound(release_name.to_string()))
    }

    async fn deployed_required(&self, release_name: &str) -> Result<Release, ControllerError> {
        self.releases
            .find_latest_deployed(release_name)
            .await?
            .ok_or_else(|| {
                ControllerError::ReleaseNotFound(format!("no deployed version of {}", release_name))
            })
    }

    async fn next_version(&self, release_name: &str) -> Result<u32, ControllerError> {
        Ok(self
            .releases
            .find_latest(release_name)
            .await?
            .map(|r| r.version + 1)
            .unwrap_or(1))
    }

    fn new_version(
        name: &str,
        version: u32,
        platform_name: &str,
        package: &Package,
        config_values: serde_json::Value,
        description: &str,
    ) -> Result<Release, ControllerError> {
        let manifest = manifest::render(package, &config_values)?;
        Ok(Release {
            name: name.to_string(),
            version,
            platform_name: platform_name.to_string(),
            config_values,
            manifest,
            pkg: package.metadata.clone(),
            info: Info::underway(description),
        })
    }

    fn copy_of(target: &Release, version: u32, description: &str) -> Release {
        Release {
            name: target.name.clone(),
            version,
            platform_name: target.platform_name.clone(),
            config_values: target.config_values.clone(),
            manifest: target.manifest.clone(),
            pkg: target.pkg.clone(),
            info: Info::underway(description),
        }
    }

    /// Deployment ids recorded for a version, empty when it has no record
    async fn deployment_ids(&self, release: &Release) -> Result<BTreeSet<String>, ControllerError> {
        Ok(self
            .deployment_maps
            .find_by_name_and_version(&release.name, release.version)
            .await?
            .map(|r| r.deployments.into_values().collect())
            .unwrap_or_default())
    }

    /// Undeploy what an UNKNOWN version deployed on its own and close it
    async fn revert_unknown(&self, mut latest: Release) -> Result<Release, ControllerError> {
        let deployed = self.releases.find_latest_deployed(&latest.name).await?;
        let shared = match &deployed {
            Some(live) => self.deployment_ids(live).await?,
            None => BTreeSet::new(),
        };

        if let Some(record) = self
            .deployment_maps
            .find_by_name_and_version(&latest.name, latest.version)
            .await?
        {
            let own: BTreeSet<String> = record
                .deployments
                .iter()
                .filter(|(_, id)| !shared.contains(*id))
                .map(|(app, _)| app.clone())
                .collect();
            warn!(
                "Undeploying {:?} left behind by interrupted {}",
                own,
                latest.label()
            );
            self.delete_step.delete(&mut latest, &record, &own, false).await?;
        }

        let code = if deployed.is_some() {
            StatusCode::Failed
        } else {
            StatusCode::Deleted
        };
        latest.set_status(code, INTERRUPTED);
        self.releases.save(&latest).await?;
        Ok(latest)
    }

    /// Retire an older version still DEPLOYED after its replacement was
    /// promoted. Apps whose deployment the replacement carried forward stay.
    async fn retire_stale(
        &self,
        source: &mut Release,
        kept: &BTreeSet<String>,
    ) -> Result<(), ControllerError> {
        warn!("Retiring {} left DEPLOYED by an interrupted upgrade", source.label());
        let Some(record) = self
            .deployment_maps
            .find_by_name_and_version(&source.name, source.version)
            .await?
        else {
            source.set_status(StatusCode::Deleted, "Delete complete");
            return self.releases.save(source).await;
        };

        let superseded: BTreeSet<String> = record
            .deployments
            .iter()
            .filter(|(_, id)| !kept.contains(*id))
            .map(|(app, _)| app.clone())
            .collect();
        match self.delete_step.delete(source, &record, &superseded, true).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_store_failure() => Err(e),
            Err(e) => {
                error!("Release {} could not be retired: {}", source.label(), e);
                source.set_status(StatusCode::Failed, EXISTING_DELETE_FAILED);
                self.releases.save(source).await
            }
        }
    }
}

#[async_trait]
impl ReleaseOperations for ReleaseService {
    async fn install(&self, request: &InstallRequest) -> Result<Release, ControllerError> {
        let properties = &request.install_properties;
        let name = &properties.release_name;

        if !self.deployers.contains(&properties.platform_name) {
            return Err(ControllerError::PlatformNotFound(properties.platform_name.clone()));
        }
        if let Some(latest) = self.releases.find_latest(name).await? {
            if !latest.is(StatusCode::Deleted) {
                return Err(ControllerError::ValidationError(format!(
                    "Release with the name [{}] already exists and it is not deleted.",
                    name
                )));
            }
        }

        let package = self.packages.fetch(&request.package_identifier).await?;
        let version = self.next_version(name).await?;
        let release = Self::new_version(
            name,
            version,
            &properties.platform_name,
            &package,
            properties.config_values.clone(),
            INSTALL_UNDERWAY,
        )?;
        self.releases.save(&release).await?;

        info!(
            "Installing {} from package {}:{}",
            release.label(),
            package.metadata.name,
            package.metadata.version
        );
        self.manager.install(release).await
    }

    async fn install_from_release(&self, target: &Release) -> Result<Release, ControllerError> {
        if let Some(deployed) = self.releases.find_latest_deployed(&target.name).await? {
            return Err(ControllerError::ValidationError(format!(
                "Release {} is still deployed, cannot reinstall version {}",
                deployed.label(),
                target.version
            )));
        }

        let version = self.next_version(&target.name).await?;
        let release = Self::copy_of(target, version, INSTALL_UNDERWAY);
        self.releases.save(&release).await?;

        info!("Reinstalling {} as {}", target.label(), release.label());
        self.manager.install(release).await
    }

    async fn create_upgrade_report(&self, request: &UpgradeRequest) -> Result<ReleaseDiff, ControllerError> {
        let name = &request.upgrade_properties.release_name;
        let existing = self.deployed_required(name).await?;
        let package = self.packages.fetch(&request.package_identifier).await?;
        let version = self.next_version(name).await?;

        let mut candidate = Self::new_version(
            name,
            version,
            &existing.platform_name,
            &package,
            request.upgrade_properties.config_values.clone(),
            UPGRADE_UNDERWAY,
        )?;

        let mut changed = self.diff_engine.changed_apps(&existing, &candidate)?;
        if request.force {
            if request.app_names.is_empty() {
                changed.extend(manifest::parse(&candidate.manifest)?.into_iter().map(|a| a.name));
            } else {
                changed.extend(request.app_names.iter().cloned());
            }
        }
        if changed.is_empty() {
            return Err(ControllerError::UpgradeRejected(NO_DIFFERENCE.to_string()));
        }

        candidate.info.first_deployed = existing.info.first_deployed;
        self.releases.save(&candidate).await?;
        info!(
            "Upgrading {} to {}, changed apps {:?}",
            existing.label(),
            candidate.label(),
            changed
        );

        Ok(ReleaseDiff {
            existing,
            candidate,
            changed_app_names: changed,
        })
    }

    async fn create_rollback_report(&self, target: &Release) -> Result<ReleaseDiff, ControllerError> {
        let existing = self.deployed_required(&target.name).await?;
        let version = self.next_version(&target.name).await?;
        let candidate = Self::copy_of(target, version, ROLLBACK_UNDERWAY);

        let changed = self.diff_engine.changed_apps(&existing, &candidate)?;
        self.releases.save(&candidate).await?;
        info!(
            "Rolling back {} to the manifest of {} as {}, changed apps {:?}",
            existing.label(),
            target.label(),
            candidate.label(),
            changed
        );

        Ok(ReleaseDiff {
            existing,
            candidate,
            changed_app_names: changed,
        })
    }

    async fn resolve_rollback(&self, request: &RollbackRequest) -> Result<RollbackPlan, ControllerError> {
        let name = &request.release_name;
        let target = if request.version == 0 {
            self.releases.find_for_rollback(name).await?.ok_or_else(|| {
                ControllerError::ReleaseNotFound(format!("no version of {} to roll back to", name))
            })?
        } else {
            let target = self
                .releases
                .find_by_name_and_version(name, request.version)
                .await?
                .ok_or_else(|| {
                    ControllerError::ReleaseNotFound(format!("{}-v{}", name, request.version))
                })?;
            if !target.is(StatusCode::Deployed) && !target.is(StatusCode::Deleted) {
                return Err(ControllerError::ValidationError(format!(
                    "Cannot roll back to {} with status {}",
                    target.label(),
                    target.status_code()
                )));
            }
            target
        };

        let latest = self.latest_required(name).await?;
        let live = self.releases.find_latest_deployed(name).await?;
        if latest.is(StatusCode::Deleted) || live.is_none() {
            Ok(RollbackPlan::Install { target })
        } else {
            Ok(RollbackPlan::Upgrade { target })
        }
    }

    async fn recover_interrupted_upgrade(&self, release_name: &str) -> Result<Recovery, ControllerError> {
        let Some(latest) = self.releases.find_latest(release_name).await? else {
            return Ok(Recovery::Clean);
        };
        if latest.is(StatusCode::Unknown) {
            return self.revert_unknown(latest).await.map(Recovery::Reverted);
        }
        if !latest.is(StatusCode::Deployed) {
            return Ok(Recovery::Clean);
        }

        let stale: Vec<Release> = self
            .releases
            .history(release_name)
            .await?
            .into_iter()
            .filter(|r| r.version < latest.version && r.is(StatusCode::Deployed))
            .collect();
        if stale.is_empty() {
            return Ok(Recovery::Clean);
        }

        let kept = self.deployment_ids(&latest).await?;
        let mut retired = Vec::with_capacity(stale.len());
        for mut source in stale {
            self.retire_stale(&mut source, &kept).await?;
            retired.push(source);
        }
        Ok(Recovery::Retired(retired))
    }

    async fn delete(
        &self,
        release_name: &str,
        properties: &DeleteProperties,
    ) -> Result<Release, ControllerError> {
        let latest = self.latest_required(release_name).await?;
        let release = if latest.is(StatusCode::Deleted) {
            info!("Release {} is already deleted", latest.label());
            latest
        } else {
            self.manager.delete(latest).await?
        };

        if properties.delete_package && release.is(StatusCode::Deleted) {
            if self.packages.delete(&release.pkg.name).await? {
                info!("Deleted package {}", release.pkg.name);
            }
        }
        Ok(release)
    }

    async fn scale(&self, release_name: &str, request: &ScaleRequest) -> Result<Release, ControllerError> {
        let release = self.deployed_required(release_name).await?;
        self.manager.scale(&release, request).await?;
        self.manager.status(release).await
    }

    async fn status(&self, release_name: &str) -> Result<Release, ControllerError> {
        let latest = self.latest_required(release_name).await?;
        self.manager.status(latest).await
    }

    async fn history(&self, release_name: &str) -> Result<Vec<Release>, ControllerError> {
        let mut history = self.releases.history(release_name).await?;
        if history.is_empty() {
            return Err(ControllerError::ReleaseNotFound(release_name.to_string()));
        }
        history.reverse();
        Ok(history)
    }

    async fn manifest(&self, release_name: &str, version: Option<u32>) -> Result<String, ControllerError> {
        let release = match version {
            Some(version) => self
                .releases
                .find_by_name_and_version(release_name, version)
                .await?
                .ok_or_else(|| {
                    ControllerError::ReleaseNotFound(format!("{}-v{}", release_name, version))
                })?,
            None => self.latest_required(release_name).await?,
        };
        Ok(release.manifest)
    }
}
