//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the controller
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Release versions, one directory per release name
    pub fn releases_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("releases"))
    }

    /// Deployment records, one directory per release name
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    /// Persisted state machine records
    pub fn machines_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("machines"))
    }

    /// Uploaded packages, one directory per package name
    pub fn packages_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("packages"))
    }

    /// Working directories of local app instances
    pub fn work_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("work"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), ControllerError> {
        self.releases_dir().create().await?;
        self.deployments_dir().create().await?;
        self.machines_dir().create().await?;
        self.packages_dir().create().await?;
        self.work_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/helmsman");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".helmsman");

        Self::new(base_dir)
    }
}
