//! Health verdict for a candidate release

use std::sync::Arc;

use tracing::{debug, warn};

use crate::deployer::DeployerRegistry;
use crate::errors::ControllerError;
use crate::models::deployment::DeploymentState;
use crate::models::release::Release;
use crate::storage::DeploymentMapStore;

pub struct HealthCheckStep {
    deployment_maps: Arc<dyn DeploymentMapStore>,
    deployers: Arc<DeployerRegistry>,
}

impl HealthCheckStep {
    pub fn new(deployment_maps: Arc<dyn DeploymentMapStore>, deployers: Arc<DeployerRegistry>) -> Self {
        Self {
            deployment_maps,
            deployers,
        }
    }

    /// Healthy iff every app of the candidate's record reports `deployed`.
    /// Stops at the first app that does not; a status error counts as not
    /// deployed. Store failures propagate.
    pub async fn is_healthy(&self, candidate: &Release) -> Result<bool, ControllerError> {
        let Some(record) = self
            .deployment_maps
            .find_by_name_and_version(&candidate.name, candidate.version)
            .await?
        else {
            warn!("No deployment record for {}, not healthy", candidate.label());
            return Ok(false);
        };
        let deployer = self.deployers.lookup(&candidate.platform_name)?;

        for (app_name, deployment_id) in &record.deployments {
            let state = match deployer.status(deployment_id).await {
                Ok(status) => status.state,
                Err(e) => {
                    warn!("Status of {} ({}) unavailable: {}", app_name, deployment_id, e);
                    DeploymentState::Unknown
                }
            };
            if state != DeploymentState::Deployed {
                debug!(
                    "App {} of {} is {:?}, not healthy yet",
                    app_name,
                    candidate.label(),
                    state
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}
