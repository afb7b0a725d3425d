//! Shared fixtures for the unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;

use helmsman::deploy::decision::{DecisionStep, Verdict};
use helmsman::deploy::delete_step::DeleteStep;
use helmsman::deploy::deploy_step::DeployStep;
use helmsman::deploy::fsm::ReleaseState;
use helmsman::deploy::health_check::HealthCheckStep;
use helmsman::deploy::strategy::{RedBlackUpgradeStrategy, UpgradeStrategy};
use helmsman::deployer::memory::InMemoryDeployer;
use helmsman::deployer::DeployerRegistry;
use helmsman::errors::ControllerError;
use helmsman::manifest::diff::{DigestDiffEngine, ReleaseDiff};
use helmsman::manifest::{AppManifest, Package};
use helmsman::models::deployment::DeploymentRecord;
use helmsman::models::release::{Info, PackageMetadata, Release, StatusCode};
use helmsman::service::controller::LifecycleController;
use helmsman::service::release_service::ReleaseService;
use helmsman::storage::memory::{
    MemoryDeploymentMapStore, MemoryMachineStore, MemoryPackageRepository, MemoryReleaseStore,
};
use helmsman::storage::{DeploymentMapStore, MachineStore, PackageRepository, ReleaseStore};
use helmsman::workers::release_machine::{self, MachineContext, MachineObserver};
use release_api::models::{
    InstallProperties, InstallRequest, PackageIdentifier, UpgradeProperties, UpgradeRequest,
};

pub const PLATFORM: &str = "default";

pub fn package(name: &str, version: &str, apps: &[(&str, &str)]) -> Package {
    Package {
        metadata: PackageMetadata {
            name: name.to_string(),
            version: version.to_string(),
        },
        apps: apps
            .iter()
            .map(|(app, app_version)| AppManifest {
                name: app.to_string(),
                resource: format!("maven://io.helmsman:{}", app),
                version: app_version.to_string(),
                application_properties: BTreeMap::new(),
                deployment_properties: BTreeMap::new(),
            })
            .collect(),
    }
}

pub fn release(name: &str, version: u32, code: StatusCode, apps: &[(&str, &str)]) -> Release {
    let pkg = package("ticktock", "1.0.0", apps);
    let mut release = Release {
        name: name.to_string(),
        version,
        platform_name: PLATFORM.to_string(),
        config_values: serde_json::Value::Null,
        manifest: serde_json::to_string(&pkg.apps).unwrap(),
        pkg: pkg.metadata,
        info: Info::underway("test"),
    };
    release.set_status(code, "test");
    release
}

pub fn record(name: &str, version: u32, entries: &[(&str, &str)]) -> DeploymentRecord {
    DeploymentRecord::new(
        name,
        version,
        entries
            .iter()
            .map(|(app, id)| (app.to_string(), id.to_string()))
            .collect(),
    )
}

pub fn names(apps: &[&str]) -> BTreeSet<String> {
    apps.iter().map(|a| a.to_string()).collect()
}

pub fn install_request(release_name: &str, package_version: &str) -> InstallRequest {
    InstallRequest {
        package_identifier: PackageIdentifier {
            package_name: "ticktock".to_string(),
            package_version: Some(package_version.to_string()),
        },
        install_properties: InstallProperties {
            release_name: release_name.to_string(),
            platform_name: PLATFORM.to_string(),
            config_values: serde_json::Value::Null,
        },
    }
}

pub fn upgrade_request(release_name: &str, package_version: &str, timeout_millis: u64) -> UpgradeRequest {
    UpgradeRequest {
        package_identifier: PackageIdentifier {
            package_name: "ticktock".to_string(),
            package_version: Some(package_version.to_string()),
        },
        upgrade_properties: UpgradeProperties {
            release_name: release_name.to_string(),
            config_values: json!(null),
        },
        timeout_millis: Some(timeout_millis),
        force: false,
        app_names: Vec::new(),
    }
}

/// Records every state entry per release name
#[derive(Default)]
pub struct RecordingObserver {
    entries: Mutex<Vec<(String, ReleaseState)>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn states(&self, release_name: &str) -> Vec<ReleaseState> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == release_name)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        self.errors.lock().unwrap().clear();
    }
}

impl MachineObserver for RecordingObserver {
    fn state_entered(&self, release_name: &str, state: ReleaseState) {
        self.entries
            .lock()
            .unwrap()
            .push((release_name.to_string(), state));
    }

    fn error_recorded(&self, _release_name: &str, error: &str) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Strategy wrapper counting cancel actions and overriding health verdicts
pub struct CountingStrategy {
    inner: Arc<dyn UpgradeStrategy>,
    cancels: AtomicUsize,
    checks: AtomicUsize,
    healthy_override: Mutex<Option<bool>>,
}

impl CountingStrategy {
    pub fn new(inner: Arc<dyn UpgradeStrategy>) -> Self {
        Self {
            inner,
            cancels: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            healthy_override: Mutex::new(None),
        }
    }

    pub fn always(&self, healthy: bool) {
        *self.healthy_override.lock().unwrap() = Some(healthy);
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpgradeStrategy for CountingStrategy {
    async fn deploy_apps(&self, diff: &mut ReleaseDiff) -> Result<BTreeSet<String>, ControllerError> {
        self.inner.deploy_apps(diff).await
    }

    async fn check_status(&self, candidate: &Release) -> Result<bool, ControllerError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let forced = *self.healthy_override.lock().unwrap();
        match forced {
            Some(healthy) => Ok(healthy),
            None => self.inner.check_status(candidate).await,
        }
    }

    async fn promote(&self, diff: &mut ReleaseDiff, rollback: bool) -> Result<(), ControllerError> {
        self.inner.promote(diff, rollback).await
    }

    async fn delete_source(&self, diff: &mut ReleaseDiff) -> Result<(), ControllerError> {
        self.inner.delete_source(diff).await
    }

    async fn cancel(
        &self,
        diff: &mut ReleaseDiff,
        verdict: Verdict,
        timeout_millis: u64,
    ) -> Result<(), ControllerError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.inner.cancel(diff, verdict, timeout_millis).await
    }
}

/// Release store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyReleaseStore {
    inner: MemoryReleaseStore,
    failing: AtomicBool,
}

impl FlakyReleaseStore {
    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReleaseStore for FlakyReleaseStore {
    async fn save(&self, release: &Release) -> Result<(), ControllerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ControllerError::StoreError("release store unavailable".to_string()));
        }
        self.inner.save(release).await
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>, ControllerError> {
        self.inner.history(name).await
    }
}

/// Full controller over in-memory stores and the simulated backend
pub struct Harness {
    pub releases: Arc<MemoryReleaseStore>,
    pub deployment_maps: Arc<MemoryDeploymentMapStore>,
    pub machines: Arc<MemoryMachineStore>,
    pub packages: Arc<MemoryPackageRepository>,
    pub deployer: Arc<InMemoryDeployer>,
    pub observer: Arc<RecordingObserver>,
    pub strategy: Arc<CountingStrategy>,
    pub controller: LifecycleController,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_machines(Arc::new(MemoryMachineStore::new())).await
    }

    /// Harness sharing persisted state with a previous one
    pub async fn with_machines(machines: Arc<MemoryMachineStore>) -> Self {
        Self::build(
            Arc::new(MemoryReleaseStore::new()),
            Arc::new(MemoryDeploymentMapStore::new()),
            machines,
            Arc::new(InMemoryDeployer::new()),
        )
        .await
    }

    pub async fn build(
        releases: Arc<MemoryReleaseStore>,
        deployment_maps: Arc<MemoryDeploymentMapStore>,
        machines: Arc<MemoryMachineStore>,
        deployer: Arc<InMemoryDeployer>,
    ) -> Self {
        let packages = Arc::new(MemoryPackageRepository::new());
        packages
            .upload(&package("ticktock", "1.0.0", &[("time", "1.0.0"), ("log", "1.0.0")]))
            .await
            .unwrap();
        packages
            .upload(&package("ticktock", "1.1.0", &[("time", "1.1.0"), ("log", "1.0.0")]))
            .await
            .unwrap();

        let registry = Arc::new(DeployerRegistry::new().with(PLATFORM, deployer.clone()));
        let release_store: Arc<dyn ReleaseStore> = releases.clone();
        let map_store: Arc<dyn DeploymentMapStore> = deployment_maps.clone();

        let service = ReleaseService::new(
            release_store.clone(),
            map_store.clone(),
            packages.clone(),
            registry.clone(),
            Arc::new(DigestDiffEngine),
        );
        let delete_step = Arc::new(DeleteStep::new(release_store.clone(), registry.clone()));
        let inner = RedBlackUpgradeStrategy::new(
            DeployStep::new(release_store.clone(), map_store.clone(), registry.clone()),
            HealthCheckStep::new(map_store.clone(), registry.clone()),
            DecisionStep::new(release_store.clone(), map_store.clone(), delete_step),
        );
        let strategy = Arc::new(CountingStrategy::new(inner.into_shared()));
        let observer = Arc::new(RecordingObserver::default());

        let machine_store: Arc<dyn MachineStore> = machines.clone();
        let context = Arc::new(MachineContext {
            operations: Arc::new(service),
            strategy: strategy.clone(),
            machines: machine_store,
            observer: observer.clone(),
            pool: Arc::new(Semaphore::new(4)),
            options: release_machine::Options {
                health_check_interval: Duration::from_millis(10),
                default_upgrade_timeout: Duration::from_millis(200),
            },
        });
        let controller = LifecycleController::new(context, Duration::from_secs(5));

        Self {
            releases,
            deployment_maps,
            machines,
            packages,
            deployer,
            observer,
            strategy,
            controller,
        }
    }

    pub async fn settle(&self, release_name: &str) {
        self.controller
            .await_idle(release_name, Duration::from_secs(5))
            .await
            .unwrap();
    }

    pub async fn release(&self, release_name: &str, version: u32) -> Release {
        self.releases
            .find_by_name_and_version(release_name, version)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn deployments(&self, release_name: &str, version: u32) -> DeploymentRecord {
        self.deployment_maps
            .find_required(release_name, version)
            .await
            .unwrap()
    }
}
