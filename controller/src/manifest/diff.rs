//! Release difference analysis

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ControllerError;
use crate::manifest::{parse, AppManifest};
use crate::models::release::Release;
use crate::utils::sha256_hash;

/// Existing and candidate releases of one upgrade attempt
#[derive(Debug, Clone)]
pub struct ReleaseDiff {
    pub existing: Release,
    pub candidate: Release,
    pub changed_app_names: BTreeSet<String>,
}

impl ReleaseDiff {
    pub fn has_changes(&self) -> bool {
        !self.changed_app_names.is_empty()
    }
}

/// Computes which logical apps differ between two releases
pub trait DiffEngine: Send + Sync {
    fn changed_apps(
        &self,
        existing: &Release,
        candidate: &Release,
    ) -> Result<BTreeSet<String>, ControllerError>;
}

/// Compares a digest of each rendered app manifest
#[derive(Debug, Clone, Default)]
pub struct DigestDiffEngine;

impl DigestDiffEngine {
    fn digests(manifest: &str) -> Result<BTreeMap<String, String>, ControllerError> {
        parse(manifest)?
            .into_iter()
            .map(|app: AppManifest| -> Result<(String, String), ControllerError> {
                let bytes = serde_json::to_vec(&app)?;
                Ok((app.name, sha256_hash(&bytes)))
            })
            .collect()
    }
}

impl DiffEngine for DigestDiffEngine {
    fn changed_apps(
        &self,
        existing: &Release,
        candidate: &Release,
    ) -> Result<BTreeSet<String>, ControllerError> {
        let before = Self::digests(&existing.manifest)?;
        let after = Self::digests(&candidate.manifest)?;

        let mut changed: BTreeSet<String> = after
            .iter()
            .filter(|(name, digest)| before.get(*name) != Some(*digest))
            .map(|(name, _)| name.clone())
            .collect();

        // Apps dropped by the candidate are retired with the old version
        changed.extend(before.keys().filter(|name| !after.contains_key(*name)).cloned());

        Ok(changed)
    }
}
