//! Promote or roll back a candidate release after health checks

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, info};

use crate::deploy::delete_step::DeleteStep;
use crate::errors::ControllerError;
use crate::models::release::{Release, StatusCode};
use crate::storage::{DeploymentMapStore, ReleaseStore};

pub const UPGRADE_COMPLETE: &str = "Upgrade complete";
pub const ROLLBACK_COMPLETE: &str = "Rollback complete";
pub const EXISTING_DELETE_FAILED: &str =
    "Could not delete existing application, manual intervention needed.";
pub const REPLACING_DELETE_FAILED: &str =
    "Could not delete replacing release application, manual intervention needed.";

/// Final health outcome of an upgrade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    TimedOut,
    Cancelled,
}

impl Verdict {
    pub fn failure_description(&self, timeout_millis: u64) -> String {
        match self {
            Verdict::Cancelled => format!("Cancelled after {} ms.", timeout_millis),
            _ => format!(
                "Did not detect apps in replacing release as healthy after {} ms.",
                timeout_millis
            ),
        }
    }
}

pub struct DecisionStep {
    releases: Arc<dyn ReleaseStore>,
    deployment_maps: Arc<dyn DeploymentMapStore>,
    delete_step: Arc<DeleteStep>,
}

impl DecisionStep {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        deployment_maps: Arc<dyn DeploymentMapStore>,
        delete_step: Arc<DeleteStep>,
    ) -> Self {
        Self {
            releases,
            deployment_maps,
            delete_step,
        }
    }

    /// Apply a verdict end to end
    pub async fn handle(
        &self,
        verdict: Verdict,
        existing: &mut Release,
        candidate: &mut Release,
        changed: &BTreeSet<String>,
        timeout_millis: u64,
        rollback: bool,
    ) -> Result<(), ControllerError> {
        match verdict {
            Verdict::Healthy => {
                self.promote(candidate, rollback).await?;
                self.retire_source(existing, changed).await
            }
            _ => self.roll_back(candidate, changed, verdict, timeout_millis).await,
        }
    }

    /// Mark the candidate DEPLOYED
    pub async fn promote(&self, candidate: &mut Release, rollback: bool) -> Result<(), ControllerError> {
        let description = if rollback {
            ROLLBACK_COMPLETE
        } else {
            UPGRADE_COMPLETE
        };
        candidate.set_status(StatusCode::Deployed, description);
        self.releases.save(candidate).await?;
        info!("Release {} has been DEPLOYED", candidate.label());
        Ok(())
    }

    /// Undeploy the superseded apps of the existing release and mark it DELETED
    pub async fn retire_source(
        &self,
        existing: &mut Release,
        changed: &BTreeSet<String>,
    ) -> Result<(), ControllerError> {
        info!("Deleting changed applications from existing release {}", existing.label());
        let result = match self
            .deployment_maps
            .find_required(&existing.name, existing.version)
            .await
        {
            Ok(record) => self.delete_step.delete(existing, &record, changed, true).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_store_failure() => Err(e),
            Err(e) => {
                error!("Release {} could not be deleted: {}", existing.label(), e);
                existing.set_status(StatusCode::Failed, EXISTING_DELETE_FAILED);
                self.releases.save(existing).await
            }
        }
    }

    /// Undeploy the candidate's changed apps and mark it FAILED. A candidate
    /// already FAILED by the deploy step keeps its description.
    pub async fn roll_back(
        &self,
        candidate: &mut Release,
        changed: &BTreeSet<String>,
        verdict: Verdict,
        timeout_millis: u64,
    ) -> Result<(), ControllerError> {
        if verdict == Verdict::TimedOut {
            error!(
                "New release {} was not detected as healthy after {} ms, keeping existing release",
                candidate.label(),
                timeout_millis
            );
        }

        let result = match self
            .deployment_maps
            .find_required(&candidate.name, candidate.version)
            .await
        {
            Ok(record) => self.delete_step.delete(candidate, &record, changed, false).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => {
                if !candidate.is(StatusCode::Failed) {
                    candidate.set_status(
                        StatusCode::Failed,
                        verdict.failure_description(timeout_millis),
                    );
                }
                self.releases.save(candidate).await
            }
            Err(e) if e.is_store_failure() => Err(e),
            Err(e) => {
                error!("Release {} could not be deleted: {}", candidate.label(), e);
                candidate.set_status(StatusCode::Failed, REPLACING_DELETE_FAILED);
                self.releases.save(candidate).await
            }
        }
    }
}
