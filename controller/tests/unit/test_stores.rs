//! File store unit tests

use helmsman::deploy::fsm::ReleaseState;
use helmsman::filesys::dir::Dir;
use helmsman::models::machine::{MachineRecord, OperationRequest};
use helmsman::models::release::StatusCode;
use helmsman::storage::fs::{
    FileDeploymentMapStore, FileMachineStore, FilePackageRepository, FileReleaseStore,
};
use helmsman::storage::layout::StorageLayout;
use helmsman::storage::{DeploymentMapStore, MachineStore, PackageRepository, ReleaseStore};
use release_api::models::PackageIdentifier;
use tokio_test::{assert_err, assert_ok};

use crate::support::{install_request, package, record, release};

const APPS: &[(&str, &str)] = &[("time", "1.0.0"), ("log", "1.0.0")];

#[tokio::test]
async fn test_release_history_survives_reopen() {
    let dir = Dir::create_temp_dir("helmsman-test").await.unwrap();
    {
        let store = FileReleaseStore::new(dir.clone());
        for (version, code) in [
            (1, StatusCode::Deleted),
            (2, StatusCode::Deployed),
            (10, StatusCode::Failed),
        ] {
            store.save(&release("ticktock", version, code, APPS)).await.unwrap();
        }
    }

    let store = FileReleaseStore::new(dir.clone());
    let versions: Vec<u32> = store
        .history("ticktock")
        .await
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 10]);

    assert_eq!(store.find_latest("ticktock").await.unwrap().unwrap().version, 10);
    assert_eq!(
        store.find_latest_deployed("ticktock").await.unwrap().unwrap().version,
        2
    );
    assert_eq!(
        store.find_for_rollback("ticktock").await.unwrap().unwrap().version,
        2
    );
    assert!(store.find_by_name_and_version("ticktock", 3).await.unwrap().is_none());
    assert!(store.history("missing").await.unwrap().is_empty());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_rollback_target_is_deleted_latest() {
    let dir = Dir::create_temp_dir("helmsman-test").await.unwrap();
    let store = FileReleaseStore::new(dir.clone());
    store
        .save(&release("ticktock", 1, StatusCode::Deployed, APPS))
        .await
        .unwrap();
    store
        .save(&release("ticktock", 2, StatusCode::Deleted, APPS))
        .await
        .unwrap();

    assert_eq!(
        store.find_for_rollback("ticktock").await.unwrap().unwrap().version,
        2
    );
    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_deployment_map_round_trip() {
    let dir = Dir::create_temp_dir("helmsman-test").await.unwrap();
    FileDeploymentMapStore::new(dir.clone())
        .save(&record("ticktock", 1, &[("time", "t-1"), ("log", "l-1")]))
        .await
        .unwrap();

    let store = FileDeploymentMapStore::new(dir.clone());
    let found = store.find_required("ticktock", 1).await.unwrap();
    assert_eq!(found.deployment_id("log"), Some("l-1"));
    assert!(store.find_by_name_and_version("ticktock", 2).await.unwrap().is_none());
    assert_err!(store.find_required("ticktock", 2).await);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_machine_records_list_after_reopen() {
    let dir = Dir::create_temp_dir("helmsman-test").await.unwrap();
    {
        let store = FileMachineStore::new(dir.clone());
        store.save(&MachineRecord::idle("heartbeat")).await.unwrap();

        let mut running = MachineRecord::idle("ticktock");
        running.state = ReleaseState::InstallInstall;
        running.request = Some(OperationRequest::Install(install_request("ticktock", "1.0.0")));
        store.save(&running).await.unwrap();
    }

    let store = FileMachineStore::new(dir.clone());
    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 2);

    let pending: Vec<&str> = records
        .iter()
        .filter(|r| r.needs_resume())
        .map(|r| r.release_name.as_str())
        .collect();
    assert_eq!(pending, vec!["ticktock"]);

    let loaded = store.load("ticktock").await.unwrap().unwrap();
    assert_eq!(loaded.state, ReleaseState::InstallInstall);
    assert!(store.load("missing").await.unwrap().is_none());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_package_versions_sorted_numerically() {
    let dir = Dir::create_temp_dir("helmsman-test").await.unwrap();
    let repository = FilePackageRepository::new(dir.clone());
    for version in ["1.10.0", "1.2.0", "1.9.1"] {
        repository
            .upload(&package("ticktock", version, &[("time", version)]))
            .await
            .unwrap();
    }

    let versions: Vec<String> = repository
        .versions("ticktock")
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.metadata.version)
        .collect();
    assert_eq!(versions, vec!["1.2.0", "1.9.1", "1.10.0"]);

    let latest = repository
        .fetch(&PackageIdentifier {
            package_name: "ticktock".to_string(),
            package_version: None,
        })
        .await
        .unwrap();
    assert_eq!(latest.metadata.version, "1.10.0");

    let missing = repository
        .fetch(&PackageIdentifier {
            package_name: "ticktock".to_string(),
            package_version: Some("2.0.0".to_string()),
        })
        .await;
    assert_err!(missing);

    assert!(repository.delete("ticktock").await.unwrap());
    assert!(!repository.delete("ticktock").await.unwrap());
    assert!(repository.versions("ticktock").await.unwrap().is_empty());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_layout_setup_creates_directories() {
    let dir = Dir::create_temp_dir("helmsman-test").await.unwrap();
    let layout = StorageLayout::new(dir.path());
    assert_ok!(layout.setup().await);

    assert!(layout.releases_dir().exists().await);
    assert!(layout.deployments_dir().exists().await);
    assert!(layout.machines_dir().exists().await);
    assert!(layout.packages_dir().exists().await);

    dir.delete().await.unwrap();
}
