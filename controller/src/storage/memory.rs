//! In-memory stores

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::manifest::Package;
use crate::models::deployment::DeploymentRecord;
use crate::models::machine::MachineRecord;
use crate::models::release::Release;
use crate::storage::{
    compare_versions, DeploymentMapStore, MachineStore, PackageRepository, ReleaseStore,
};

/// Releases keyed by name then version
#[derive(Default)]
pub struct MemoryReleaseStore {
    entries: RwLock<HashMap<String, BTreeMap<u32, Release>>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn save(&self, release: &Release) -> Result<(), ControllerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(release.name.clone())
            .or_default()
            .insert(release.version, release.clone());
        Ok(())
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>, ControllerError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(name)
            .map(|versions| versions.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryDeploymentMapStore {
    entries: RwLock<HashMap<(String, u32), DeploymentRecord>>,
}

impl MemoryDeploymentMapStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentMapStore for MemoryDeploymentMapStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), ControllerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (record.release_name.clone(), record.release_version),
            record.clone(),
        );
        Ok(())
    }

    async fn find_by_name_and_version(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Option<DeploymentRecord>, ControllerError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(&(name.to_string(), version)).cloned())
    }
}

#[derive(Default)]
pub struct MemoryMachineStore {
    entries: RwLock<HashMap<String, MachineRecord>>,
}

impl MemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MachineStore for MemoryMachineStore {
    async fn save(&self, record: &MachineRecord) -> Result<(), ControllerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(record.release_name.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, release_name: &str) -> Result<Option<MachineRecord>, ControllerError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(release_name).cloned())
    }

    async fn list(&self) -> Result<Vec<MachineRecord>, ControllerError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<MachineRecord> = entries.values().cloned().collect();
        records.sort_by(|a, b| a.release_name.cmp(&b.release_name));
        Ok(records)
    }
}

#[derive(Default)]
pub struct MemoryPackageRepository {
    entries: RwLock<HashMap<String, Vec<Package>>>,
}

impl MemoryPackageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PackageRepository for MemoryPackageRepository {
    async fn upload(&self, package: &Package) -> Result<(), ControllerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let versions = entries.entry(package.metadata.name.clone()).or_default();
        versions.retain(|p| p.metadata.version != package.metadata.version);
        versions.push(package.clone());
        versions.sort_by(|a, b| compare_versions(&a.metadata.version, &b.metadata.version));
        Ok(())
    }

    async fn versions(&self, name: &str) -> Result<Vec<Package>, ControllerError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(name).cloned().unwrap_or_default())
    }

    async fn delete(&self, name: &str) -> Result<bool, ControllerError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries.remove(name).is_some())
    }
}
