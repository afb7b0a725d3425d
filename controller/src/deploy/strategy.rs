//! Red/black upgrade strategy
//!
//! The lifecycle machine drives the strategy one state at a time: deploy the
//! changed apps, then alternate between waiting and health checking until
//! [`wait_outcome`] settles, then promote or cancel.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::deploy::decision::{DecisionStep, Verdict};
use crate::deploy::deploy_step::DeployStep;
use crate::deploy::health_check::HealthCheckStep;
use crate::errors::ControllerError;
use crate::manifest::diff::ReleaseDiff;
use crate::models::release::Release;

/// Step actions of an upgrade
#[async_trait]
pub trait UpgradeStrategy: Send + Sync {
    async fn deploy_apps(&self, diff: &mut ReleaseDiff) -> Result<BTreeSet<String>, ControllerError>;

    async fn check_status(&self, candidate: &Release) -> Result<bool, ControllerError>;

    /// Healthy path, part one
    async fn promote(&self, diff: &mut ReleaseDiff, rollback: bool) -> Result<(), ControllerError>;

    /// Healthy path, part two
    async fn delete_source(&self, diff: &mut ReleaseDiff) -> Result<(), ControllerError>;

    /// Timeout or cancel path
    async fn cancel(
        &self,
        diff: &mut ReleaseDiff,
        verdict: Verdict,
        timeout_millis: u64,
    ) -> Result<(), ControllerError>;
}

/// Next move of an upgrade sitting in the wait state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Healthy,
    Failed,
    Cancelled,
    Recheck,
}

/// Decide from the last health result. No result yet always rechecks, so
/// a zero timeout still gets exactly one health check.
pub fn wait_outcome(
    status: Option<bool>,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    cancelled: bool,
) -> WaitOutcome {
    if cancelled {
        return WaitOutcome::Cancelled;
    }
    match status {
        Some(true) => WaitOutcome::Healthy,
        Some(false) if now >= cutoff => WaitOutcome::Failed,
        _ => WaitOutcome::Recheck,
    }
}

pub struct RedBlackUpgradeStrategy {
    deploy_step: DeployStep,
    health_check: HealthCheckStep,
    decision: DecisionStep,
}

impl RedBlackUpgradeStrategy {
    pub fn new(deploy_step: DeployStep, health_check: HealthCheckStep, decision: DecisionStep) -> Self {
        Self {
            deploy_step,
            health_check,
            decision,
        }
    }

    pub fn into_shared(self) -> Arc<dyn UpgradeStrategy> {
        Arc::new(self)
    }
}

#[async_trait]
impl UpgradeStrategy for RedBlackUpgradeStrategy {
    async fn deploy_apps(&self, diff: &mut ReleaseDiff) -> Result<BTreeSet<String>, ControllerError> {
        self.deploy_step
            .deploy_apps(&diff.existing, &mut diff.candidate, &diff.changed_app_names)
            .await
    }

    async fn check_status(&self, candidate: &Release) -> Result<bool, ControllerError> {
        self.health_check.is_healthy(candidate).await
    }

    async fn promote(&self, diff: &mut ReleaseDiff, rollback: bool) -> Result<(), ControllerError> {
        self.decision.promote(&mut diff.candidate, rollback).await
    }

    async fn delete_source(&self, diff: &mut ReleaseDiff) -> Result<(), ControllerError> {
        self.decision
            .retire_source(&mut diff.existing, &diff.changed_app_names)
            .await
    }

    async fn cancel(
        &self,
        diff: &mut ReleaseDiff,
        verdict: Verdict,
        timeout_millis: u64,
    ) -> Result<(), ControllerError> {
        self.decision
            .roll_back(&mut diff.candidate, &diff.changed_app_names, verdict, timeout_millis)
            .await
    }
}
