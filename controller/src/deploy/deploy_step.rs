//! Deploy the changed apps of a candidate release

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{error, info};

use crate::deployer::DeployerRegistry;
use crate::errors::ControllerError;
use crate::manifest::{self, AppManifest};
use crate::models::deployment::{AppDeploymentRequest, DeploymentRecord};
use crate::models::release::{Release, StatusCode};
use crate::storage::{DeploymentMapStore, ReleaseStore};

pub const DEPLOY_FAILED_DESCRIPTION: &str = "Could not deploy app.";

pub struct DeployStep {
    releases: Arc<dyn ReleaseStore>,
    deployment_maps: Arc<dyn DeploymentMapStore>,
    deployers: Arc<DeployerRegistry>,
}

impl DeployStep {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        deployment_maps: Arc<dyn DeploymentMapStore>,
        deployers: Arc<DeployerRegistry>,
    ) -> Self {
        Self {
            releases,
            deployment_maps,
            deployers,
        }
    }

    /// Deploy the candidate apps named in `changed`, carry every other
    /// existing deployment id forward, and write the candidate's record.
    ///
    /// A backend failure marks the candidate FAILED and returns an empty
    /// set; the record then holds whatever did deploy so the rollback path
    /// can remove it. Store failures propagate.
    pub async fn deploy_apps(
        &self,
        existing: &Release,
        candidate: &mut Release,
        changed: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, ControllerError> {
        let existing_record = self
            .deployment_maps
            .find_required(&existing.name, existing.version)
            .await?;

        let mut deployments = BTreeMap::new();
        let outcome = self.deploy(candidate, changed, &mut deployments).await;

        for (app_name, deployment_id) in &existing_record.deployments {
            if !changed.contains(app_name) {
                deployments
                    .entry(app_name.clone())
                    .or_insert_with(|| deployment_id.clone());
            }
        }

        let record = DeploymentRecord::new(&candidate.name, candidate.version, deployments);
        self.deployment_maps.save(&record).await?;

        match outcome {
            Ok(deployed) => {
                info!("Deployed {:?} for {}", deployed, candidate.label());
                Ok(changed.clone())
            }
            Err(e) if e.is_store_failure() => Err(e),
            Err(e) => {
                error!("Could not deploy apps of {}: {}", candidate.label(), e);
                candidate.set_status(StatusCode::Failed, DEPLOY_FAILED_DESCRIPTION);
                self.releases.save(candidate).await?;
                Ok(BTreeSet::new())
            }
        }
    }

    async fn deploy(
        &self,
        candidate: &Release,
        changed: &BTreeSet<String>,
        deployments: &mut BTreeMap<String, String>,
    ) -> Result<Vec<String>, ControllerError> {
        let apps = manifest::parse(&candidate.manifest)?;
        let deployer = self.deployers.lookup(&candidate.platform_name)?;

        let mut deployed = Vec::new();
        for app in apps.iter().filter(|a| changed.contains(&a.name)) {
            let deployment_id = deployer.deploy(deployment_request(candidate, app)).await?;
            deployments.insert(app.name.clone(), deployment_id);
            deployed.push(app.name.clone());
        }
        Ok(deployed)
    }
}

/// Build the backend request for one app of a release
pub fn deployment_request(release: &Release, app: &AppManifest) -> AppDeploymentRequest {
    AppDeploymentRequest {
        release_name: release.name.clone(),
        release_version: release.version,
        app_name: app.name.clone(),
        resource: app.resource.clone(),
        application_properties: app.application_properties.clone(),
        deployment_properties: app.deployment_properties.clone(),
    }
}
