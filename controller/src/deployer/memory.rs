//! Simulated backend keeping deployments in memory

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::deployer::Deployer;
use crate::errors::ControllerError;
use crate::models::deployment::{AppDeploymentRequest, AppStatus, DeploymentState};

#[derive(Debug, Clone)]
struct SimulatedApp {
    app_name: String,
    instances: u32,
}

#[derive(Default)]
struct Inner {
    apps: HashMap<String, SimulatedApp>,
    next_id: u64,
    default_state: Option<DeploymentState>,
    app_states: HashMap<String, DeploymentState>,
    failing_deploys: HashSet<String>,
    failing_undeploys: HashSet<String>,
    failing_status: HashSet<String>,
    deployed: Vec<AppDeploymentRequest>,
    undeployed: Vec<String>,
}

/// In-memory deployer. Every live deployment reports `deployed` unless a
/// state is configured for its app name or for all apps.
#[derive(Default)]
pub struct InMemoryDeployer {
    inner: RwLock<Inner>,
}

impl InMemoryDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// State reported by every live deployment without an app specific state
    pub fn set_default_state(&self, state: DeploymentState) {
        self.write().default_state = Some(state);
    }

    pub fn set_app_state(&self, app_name: &str, state: DeploymentState) {
        self.write().app_states.insert(app_name.to_string(), state);
    }

    /// Make deploys of the named app fail
    pub fn fail_deploy_of(&self, app_name: &str) {
        self.write().failing_deploys.insert(app_name.to_string());
    }

    /// Make undeploys of the given deployment id fail
    pub fn fail_undeploy_of(&self, deployment_id: &str) {
        self.write().failing_undeploys.insert(deployment_id.to_string());
    }

    /// Make status queries of the named app fail
    pub fn fail_status_of(&self, app_name: &str) {
        self.write().failing_status.insert(app_name.to_string());
    }

    pub fn is_live(&self, deployment_id: &str) -> bool {
        self.read().apps.contains_key(deployment_id)
    }

    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().apps.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn instances(&self, deployment_id: &str) -> Option<u32> {
        self.read().apps.get(deployment_id).map(|a| a.instances)
    }

    /// Deploy requests received, in order
    pub fn deploy_requests(&self) -> Vec<AppDeploymentRequest> {
        self.read().deployed.clone()
    }

    /// Undeployed ids, in order
    pub fn undeployed_ids(&self) -> Vec<String> {
        self.read().undeployed.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Deployer for InMemoryDeployer {
    async fn deploy(&self, request: AppDeploymentRequest) -> Result<String, ControllerError> {
        let mut inner = self.write();
        if inner.failing_deploys.contains(&request.app_name) {
            return Err(ControllerError::DeployError(format!(
                "Simulated deploy failure for app [{}]",
                request.app_name
            )));
        }

        inner.next_id += 1;
        let deployment_id = format!(
            "{}-v{}-{}-{}",
            request.release_name, request.release_version, request.app_name, inner.next_id
        );
        debug!("Simulated deploy of {} as {}", request.app_name, deployment_id);

        inner.apps.insert(
            deployment_id.clone(),
            SimulatedApp {
                app_name: request.app_name.clone(),
                instances: request.count(),
            },
        );
        inner.deployed.push(request);
        Ok(deployment_id)
    }

    async fn undeploy(&self, deployment_id: &str) -> Result<(), ControllerError> {
        let mut inner = self.write();
        if inner.failing_undeploys.contains(deployment_id) {
            return Err(ControllerError::DeployError(format!(
                "Simulated undeploy failure for [{}]",
                deployment_id
            )));
        }
        if inner.apps.remove(deployment_id).is_none() {
            return Err(ControllerError::DeployError(format!(
                "Deployment [{}] is not running",
                deployment_id
            )));
        }
        inner.undeployed.push(deployment_id.to_string());
        Ok(())
    }

    async fn status(&self, deployment_id: &str) -> Result<AppStatus, ControllerError> {
        let inner = self.read();
        let Some(app) = inner.apps.get(deployment_id) else {
            return Ok(AppStatus::of(deployment_id, DeploymentState::Unknown));
        };
        if inner.failing_status.contains(&app.app_name) {
            return Err(ControllerError::DeployError(format!(
                "Simulated status failure for [{}]",
                deployment_id
            )));
        }

        let state = inner
            .app_states
            .get(&app.app_name)
            .copied()
            .or(inner.default_state)
            .unwrap_or(DeploymentState::Deployed);

        Ok(AppStatus {
            deployment_id: deployment_id.to_string(),
            state,
            instances: app.instances,
        })
    }

    async fn scale(
        &self,
        deployment_id: &str,
        count: u32,
        _properties: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let mut inner = self.write();
        let app = inner.apps.get_mut(deployment_id).ok_or_else(|| {
            ControllerError::DeployError(format!("Deployment [{}] is not running", deployment_id))
        })?;
        app.instances = count;
        Ok(())
    }

    fn platform_type(&self) -> &str {
        "memory"
    }
}
