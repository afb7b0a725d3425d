//! Storage interfaces
//!
//! The controller core only sees these traits. Implementations exist for
//! memory ([`memory`]) and for JSON files under the storage layout ([`fs`]).

pub mod fs;
pub mod layout;
pub mod memory;
pub mod settings;

use std::cmp::Ordering;

use async_trait::async_trait;

use release_api::models::PackageIdentifier;

use crate::errors::ControllerError;
use crate::manifest::Package;
use crate::models::deployment::DeploymentRecord;
use crate::models::machine::MachineRecord;
use crate::models::release::{Release, StatusCode};

/// Durable record of every release version
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Insert or replace the (name, version) entry
    async fn save(&self, release: &Release) -> Result<(), ControllerError>;

    /// All versions of a release, ascending by version
    async fn history(&self, name: &str) -> Result<Vec<Release>, ControllerError>;

    async fn find_latest(&self, name: &str) -> Result<Option<Release>, ControllerError> {
        Ok(self.history(name).await?.pop())
    }

    async fn find_latest_deployed(&self, name: &str) -> Result<Option<Release>, ControllerError> {
        Ok(self
            .history(name)
            .await?
            .into_iter()
            .rev()
            .find(|r| r.is(StatusCode::Deployed)))
    }

    async fn find_by_name_and_version(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Option<Release>, ControllerError> {
        Ok(self
            .history(name)
            .await?
            .into_iter()
            .find(|r| r.version == version))
    }

    /// The latest version when it was deleted, otherwise the newest older
    /// version that was deployed or deleted
    async fn find_for_rollback(&self, name: &str) -> Result<Option<Release>, ControllerError> {
        let mut history = self.history(name).await?;
        let Some(latest) = history.pop() else {
            return Ok(None);
        };
        if latest.is(StatusCode::Deleted) {
            return Ok(Some(latest));
        }
        Ok(history
            .into_iter()
            .rev()
            .find(|r| r.is(StatusCode::Deployed) || r.is(StatusCode::Deleted)))
    }
}

/// Durable (release name, version) to app deployment ids
#[async_trait]
pub trait DeploymentMapStore: Send + Sync {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), ControllerError>;

    async fn find_by_name_and_version(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Option<DeploymentRecord>, ControllerError>;

    async fn find_required(
        &self,
        name: &str,
        version: u32,
    ) -> Result<DeploymentRecord, ControllerError> {
        self.find_by_name_and_version(name, version)
            .await?
            .ok_or_else(|| ControllerError::DeploymentRecordNotFound {
                name: name.to_string(),
                version,
            })
    }
}

/// Persisted state machine records, one per release name
#[async_trait]
pub trait MachineStore: Send + Sync {
    async fn save(&self, record: &MachineRecord) -> Result<(), ControllerError>;

    async fn load(&self, release_name: &str) -> Result<Option<MachineRecord>, ControllerError>;

    async fn list(&self) -> Result<Vec<MachineRecord>, ControllerError>;
}

/// Source of installable packages
#[async_trait]
pub trait PackageRepository: Send + Sync {
    async fn upload(&self, package: &Package) -> Result<(), ControllerError>;

    /// Uploaded versions of a package, ascending
    async fn versions(&self, name: &str) -> Result<Vec<Package>, ControllerError>;

    /// Remove every version of a package, returns whether any existed
    async fn delete(&self, name: &str) -> Result<bool, ControllerError>;

    /// Resolve an identifier, the newest version when none is given
    async fn fetch(&self, identifier: &PackageIdentifier) -> Result<Package, ControllerError> {
        let mut versions = self.versions(&identifier.package_name).await?;
        let found = match &identifier.package_version {
            Some(version) => versions
                .into_iter()
                .find(|p| &p.metadata.version == version),
            None => versions.pop(),
        };
        found.ok_or_else(|| {
            ControllerError::PackageNotFound(format!(
                "{}:{}",
                identifier.package_name,
                identifier.package_version.as_deref().unwrap_or("latest")
            ))
        })
    }
}

/// Order dotted versions numerically where possible
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<Result<u64, String>> {
        v.split(['.', '-'])
            .map(|part| part.parse::<u64>().map_err(|_| part.to_string()))
            .collect()
    };
    parse(a).cmp(&parse(b))
}
