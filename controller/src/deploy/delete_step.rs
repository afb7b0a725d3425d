//! Undeploy a subset of a release's apps

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::deployer::DeployerRegistry;
use crate::errors::ControllerError;
use crate::models::deployment::{DeploymentRecord, DeploymentState};
use crate::models::release::{Release, StatusCode};
use crate::storage::ReleaseStore;

pub struct DeleteStep {
    releases: Arc<dyn ReleaseStore>,
    deployers: Arc<DeployerRegistry>,
}

impl DeleteStep {
    pub fn new(releases: Arc<dyn ReleaseStore>, deployers: Arc<DeployerRegistry>) -> Self {
        Self {
            releases,
            deployers,
        }
    }

    /// Undeploy the entries of `record` whose app name is in `app_names`,
    /// then optionally mark the release DELETED.
    ///
    /// The first failing undeploy aborts the pass and is returned; apps
    /// undeployed before it stay undeployed. Entries the backend no longer
    /// knows are skipped. Returns the undeployed deployment ids.
    pub async fn delete(
        &self,
        release: &mut Release,
        record: &DeploymentRecord,
        app_names: &BTreeSet<String>,
        mark_deleted: bool,
    ) -> Result<Vec<String>, ControllerError> {
        let deployer = self.deployers.lookup(&release.platform_name)?;
        let mut undeployed = Vec::new();

        for (app_name, deployment_id) in &record.deployments {
            if !app_names.contains(app_name) {
                continue;
            }

            let known = match deployer.status(deployment_id).await {
                Ok(status) => status.state != DeploymentState::Unknown,
                Err(e) => {
                    warn!("Status of {} unavailable, undeploying anyway: {}", deployment_id, e);
                    true
                }
            };
            if !known {
                warn!(
                    "For release {}, did not undeploy app {} as the backend does not know it",
                    release.name, deployment_id
                );
                continue;
            }

            deployer.undeploy(deployment_id).await?;
            info!("Undeployed {} ({}) of {}", app_name, deployment_id, release.label());
            undeployed.push(deployment_id.clone());
        }

        if mark_deleted {
            release.set_status(StatusCode::Deleted, "Delete complete");
            self.releases.save(release).await?;
        }

        Ok(undeployed)
    }
}
