//! Local process backend

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::deployer::Deployer;
use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{AppDeploymentRequest, AppStatus, DeploymentState};

struct LocalApp {
    request: AppDeploymentRequest,
    instances: Vec<Child>,
}

/// Runs every app instance as a child process of the controller.
///
/// The resource is an executable path, optionally prefixed with `file://`.
/// Application properties are passed as `--key=value` arguments and the
/// `count` deployment property sets the number of instances.
pub struct LocalDeployer {
    work_dir: Dir,
    apps: Mutex<HashMap<String, LocalApp>>,
}

impl LocalDeployer {
    pub fn new(work_dir: Dir) -> Self {
        Self {
            work_dir,
            apps: Mutex::new(HashMap::new()),
        }
    }

    fn deployment_id(request: &AppDeploymentRequest) -> String {
        format!(
            "{}.{}-v{}",
            request.release_name, request.app_name, request.release_version
        )
    }

    async fn spawn_instance(
        &self,
        deployment_id: &str,
        request: &AppDeploymentRequest,
        index: u32,
    ) -> anyhow::Result<Child> {
        let program = request
            .resource
            .strip_prefix("file://")
            .unwrap_or(&request.resource);

        let instance_dir = self.work_dir.subdir(deployment_id);
        instance_dir.create().await?;
        let stdout = std::fs::File::create(instance_dir.path().join(format!("stdout_{}.log", index)))
            .context("Failed to create stdout log")?;
        let stderr = std::fs::File::create(instance_dir.path().join(format!("stderr_{}.log", index)))
            .context("Failed to create stderr log")?;

        let args: Vec<String> = request
            .application_properties
            .iter()
            .map(|(key, value)| format!("--{}={}", key, value))
            .collect();

        debug!("Spawning {} {:?} for {}", program, args, deployment_id);
        Command::new(program)
            .args(&args)
            .current_dir(instance_dir.path())
            .env("INSTANCE_INDEX", index.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", program))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, LocalApp>> {
        self.apps.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn stop_all(instances: Vec<Child>) {
    for mut child in instances {
        if let Err(e) = child.start_kill() {
            debug!("Instance already stopped: {}", e);
        }
        let _ = child.wait().await;
    }
}

#[async_trait]
impl Deployer for LocalDeployer {
    async fn deploy(&self, request: AppDeploymentRequest) -> Result<String, ControllerError> {
        let deployment_id = Self::deployment_id(&request);
        let mut instances = Vec::new();

        for index in 0..request.count() {
            match self.spawn_instance(&deployment_id, &request, index).await {
                Ok(child) => instances.push(child),
                Err(e) => {
                    stop_all(instances).await;
                    return Err(ControllerError::DeployError(format!("{e:#}")));
                }
            }
        }

        info!("Deployed {} with {} instance(s)", deployment_id, instances.len());
        self.lock()
            .insert(deployment_id.clone(), LocalApp { request, instances });
        Ok(deployment_id)
    }

    async fn undeploy(&self, deployment_id: &str) -> Result<(), ControllerError> {
        let app = self.lock().remove(deployment_id).ok_or_else(|| {
            ControllerError::DeployError(format!("Deployment [{}] is not running", deployment_id))
        })?;
        stop_all(app.instances).await;
        info!("Undeployed {}", deployment_id);
        Ok(())
    }

    async fn status(&self, deployment_id: &str) -> Result<AppStatus, ControllerError> {
        let mut apps = self.lock();
        let Some(app) = apps.get_mut(deployment_id) else {
            return Ok(AppStatus::of(deployment_id, DeploymentState::Unknown));
        };

        let mut running = 0;
        let mut failed = 0;
        for child in app.instances.iter_mut() {
            match child.try_wait()? {
                None => running += 1,
                Some(status) if !status.success() => failed += 1,
                Some(_) => {}
            }
        }

        let state = if app.instances.is_empty() {
            DeploymentState::Unknown
        } else if failed > 0 {
            DeploymentState::Failed
        } else if running > 0 {
            DeploymentState::Deployed
        } else {
            DeploymentState::Complete
        };

        Ok(AppStatus {
            deployment_id: deployment_id.to_string(),
            state,
            instances: running,
        })
    }

    async fn scale(
        &self,
        deployment_id: &str,
        count: u32,
        properties: &BTreeMap<String, String>,
    ) -> Result<(), ControllerError> {
        let (mut request, current) = {
            let apps = self.lock();
            let app = apps.get(deployment_id).ok_or_else(|| {
                ControllerError::DeployError(format!(
                    "Deployment [{}] is not running",
                    deployment_id
                ))
            })?;
            (app.request.clone(), app.instances.len() as u32)
        };
        request.deployment_properties.extend(properties.clone());

        if count < current {
            let surplus = {
                let mut apps = self.lock();
                match apps.get_mut(deployment_id) {
                    Some(app) => app.instances.split_off(count as usize),
                    None => Vec::new(),
                }
            };
            stop_all(surplus).await;
        } else {
            for index in current..count {
                let child = self
                    .spawn_instance(deployment_id, &request, index)
                    .await
                    .map_err(|e| ControllerError::DeployError(format!("{e:#}")))?;
                match self.lock().get_mut(deployment_id) {
                    Some(app) => app.instances.push(child),
                    None => warn!("Deployment {} removed while scaling", deployment_id),
                }
            }
        }

        info!("Scaled {} from {} to {} instance(s)", deployment_id, current, count);
        Ok(())
    }

    fn platform_type(&self) -> &str {
        "local"
    }
}
