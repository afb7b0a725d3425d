//! JSON file stores
//!
//! Every entry is one pretty-printed JSON document written atomically, so a
//! crash leaves either the previous or the new content in place. IO and
//! serialization failures surface as store errors.

use async_trait::async_trait;

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::manifest::Package;
use crate::models::deployment::DeploymentRecord;
use crate::models::machine::MachineRecord;
use crate::models::release::Release;
use crate::storage::{
    compare_versions, DeploymentMapStore, MachineStore, PackageRepository, ReleaseStore,
};

fn version_file(version: u32) -> String {
    format!("v{:06}.json", version)
}

/// `<dir>/<release name>/v<version>.json`
pub struct FileReleaseStore {
    dir: Dir,
}

impl FileReleaseStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl ReleaseStore for FileReleaseStore {
    async fn save(&self, release: &Release) -> Result<(), ControllerError> {
        self.dir
            .subdir(&release.name)
            .file(&version_file(release.version))
            .write_json(release)
            .await
            .map_err(ControllerError::into_store)
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>, ControllerError> {
        let files = self
            .dir
            .subdir(name)
            .list_files("json")
            .await
            .map_err(ControllerError::into_store)?;

        let mut releases = Vec::with_capacity(files.len());
        for file in files {
            let release: Release = file.read_json().await.map_err(ControllerError::into_store)?;
            releases.push(release);
        }
        releases.sort_by_key(|r| r.version);
        Ok(releases)
    }

    async fn find_by_name_and_version(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Option<Release>, ControllerError> {
        self.dir
            .subdir(name)
            .file(&version_file(version))
            .read_json_opt()
            .await
            .map_err(ControllerError::into_store)
    }
}

/// `<dir>/<release name>/v<version>.json`
pub struct FileDeploymentMapStore {
    dir: Dir,
}

impl FileDeploymentMapStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl DeploymentMapStore for FileDeploymentMapStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), ControllerError> {
        self.dir
            .subdir(&record.release_name)
            .file(&version_file(record.release_version))
            .write_json(record)
            .await
            .map_err(ControllerError::into_store)
    }

    async fn find_by_name_and_version(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Option<DeploymentRecord>, ControllerError> {
        self.dir
            .subdir(name)
            .file(&version_file(version))
            .read_json_opt()
            .await
            .map_err(ControllerError::into_store)
    }
}

/// `<dir>/<release name>.json`
pub struct FileMachineStore {
    dir: Dir,
}

impl FileMachineStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl MachineStore for FileMachineStore {
    async fn save(&self, record: &MachineRecord) -> Result<(), ControllerError> {
        self.dir
            .file(&format!("{}.json", record.release_name))
            .write_json(record)
            .await
            .map_err(ControllerError::into_store)
    }

    async fn load(&self, release_name: &str) -> Result<Option<MachineRecord>, ControllerError> {
        self.dir
            .file(&format!("{}.json", release_name))
            .read_json_opt()
            .await
            .map_err(ControllerError::into_store)
    }

    async fn list(&self) -> Result<Vec<MachineRecord>, ControllerError> {
        let files = self
            .dir
            .list_files("json")
            .await
            .map_err(ControllerError::into_store)?;

        let mut records = Vec::with_capacity(files.len());
        for file in files {
            records.push(file.read_json().await.map_err(ControllerError::into_store)?);
        }
        Ok(records)
    }
}

/// `<dir>/<package name>/<package version>.json`
pub struct FilePackageRepository {
    dir: Dir,
}

impl FilePackageRepository {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl PackageRepository for FilePackageRepository {
    async fn upload(&self, package: &Package) -> Result<(), ControllerError> {
        self.dir
            .subdir(&package.metadata.name)
            .file(&format!("{}.json", package.metadata.version))
            .write_json(package)
            .await
            .map_err(ControllerError::into_store)
    }

    async fn versions(&self, name: &str) -> Result<Vec<Package>, ControllerError> {
        let files = self
            .dir
            .subdir(name)
            .list_files("json")
            .await
            .map_err(ControllerError::into_store)?;

        let mut packages: Vec<Package> = Vec::with_capacity(files.len());
        for file in files {
            packages.push(file.read_json().await.map_err(ControllerError::into_store)?);
        }
        packages.sort_by(|a, b| compare_versions(&a.metadata.version, &b.metadata.version));
        Ok(packages)
    }

    async fn delete(&self, name: &str) -> Result<bool, ControllerError> {
        let dir = self.dir.subdir(name);
        let existed = dir.exists().await;
        dir.delete().await.map_err(ControllerError::into_store)?;
        Ok(existed)
    }
}
