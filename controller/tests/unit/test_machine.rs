//! Lifecycle controller tests: state paths, guards and outcomes

use std::collections::BTreeMap;

use helmsman::deploy::decision::{ROLLBACK_COMPLETE, UPGRADE_COMPLETE};
use helmsman::deploy::deploy_step::DEPLOY_FAILED_DESCRIPTION;
use helmsman::deploy::fsm::ReleaseState;
use helmsman::errors::ControllerError;
use helmsman::models::release::StatusCode;
use helmsman::storage::{MachineStore, PackageRepository, ReleaseStore};
use release_api::models::{DeleteProperties, RollbackRequest, ScaleRequest, ScaleRequestItem};

use crate::support::{install_request, upgrade_request, Harness};

use ReleaseState as S;

async fn installed(h: &Harness, release_name: &str) {
    h.controller
        .install(install_request(release_name, "1.0.0"))
        .await
        .unwrap();
    h.settle(release_name).await;
    h.observer.clear();
}

#[tokio::test]
async fn test_install_takes_three_state_changes() {
    let h = Harness::new().await;

    let release = h
        .controller
        .install(install_request("ticktock", "1.0.0"))
        .await
        .unwrap();
    h.settle("ticktock").await;

    assert_eq!(release.version, 1);
    assert!(release.is(StatusCode::Deployed));
    assert_eq!(release.description(), "Install complete");
    assert_eq!(
        h.observer.states("ticktock"),
        vec![S::Install, S::InstallInstall, S::Initial]
    );
    assert!(h.observer.errors().is_empty());
    assert_eq!(h.deployments("ticktock", 1).await.deployments.len(), 2);

    let persisted = h.machines.load("ticktock").await.unwrap().unwrap();
    assert_eq!(persisted.state, S::Initial);
    assert!(persisted.request.is_none());
}

#[tokio::test]
async fn test_install_rejected_when_release_exists() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;

    let err = h
        .controller
        .install(install_request("ticktock", "1.1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::ValidationError(_)));
    h.settle("ticktock").await;
    assert_eq!(h.controller.state("ticktock"), S::Initial);
}

#[tokio::test]
async fn test_invalid_release_name_is_rejected() {
    let h = Harness::new().await;
    let err = h
        .controller
        .install(install_request("Tick_Tock", "1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::ValidationError(_)));
}

#[tokio::test]
async fn test_upgrade_healthy_takes_nine_state_changes() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    let log_id = h
        .deployments("ticktock", 1)
        .await
        .deployment_id("log")
        .unwrap()
        .to_string();

    let candidate = h
        .controller
        .upgrade(upgrade_request("ticktock", "1.1.0", 1000))
        .await
        .unwrap();
    assert_eq!(candidate.version, 2);
    h.settle("ticktock").await;

    let states = h.observer.states("ticktock");
    assert_eq!(states.len(), 9);
    assert_eq!(
        &states[6..],
        &[
            S::UpgradeDeployTargetAppsSucceed,
            S::UpgradeDeleteSourceApps,
            S::Initial
        ]
    );

    let upgraded = h.release("ticktock", 2).await;
    assert!(upgraded.is(StatusCode::Deployed));
    assert_eq!(upgraded.description(), UPGRADE_COMPLETE);
    assert!(h.release("ticktock", 1).await.is(StatusCode::Deleted));

    // Only the changed app was redeployed
    let record = h.deployments("ticktock", 2).await;
    assert_eq!(record.deployment_id("log"), Some(log_id.as_str()));
    assert!(h.deployer.is_live(&log_id));
    assert!(h.deployer.is_live(record.deployment_id("time").unwrap()));
    assert_eq!(h.deployer.live_ids().len(), 2);
}

#[tokio::test]
async fn test_upgrade_unhealthy_zero_timeout_cancels_once() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.strategy.always(false);

    h.controller
        .upgrade(upgrade_request("ticktock", "1.1.0", 0))
        .await
        .unwrap();
    h.settle("ticktock").await;

    let states = h.observer.states("ticktock");
    assert_eq!(states.len(), 9);
    assert_eq!(
        &states[6..],
        &[S::UpgradeDeployTargetAppsFailed, S::UpgradeCancel, S::Initial]
    );
    assert_eq!(h.strategy.cancels(), 1);
    assert_eq!(h.strategy.checks(), 1);

    let failed = h.release("ticktock", 2).await;
    assert!(failed.is(StatusCode::Failed));
    assert_eq!(
        failed.description(),
        "Did not detect apps in replacing release as healthy after 0 ms."
    );
    assert!(h.release("ticktock", 1).await.is(StatusCode::Deployed));
    assert_eq!(h.deployer.live_ids().len(), 2);
}

#[tokio::test]
async fn test_install_rejected_while_upgrade_waits_then_cancel() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.strategy.always(false);

    h.controller
        .upgrade(upgrade_request("ticktock", "1.1.0", 10_000))
        .await
        .unwrap();

    let err = h
        .controller
        .install(install_request("ticktock", "1.0.0"))
        .await
        .unwrap_err();
    assert!(err.is_not_accepted());

    assert!(h.controller.cancel("ticktock"));
    h.settle("ticktock").await;

    let cancelled = h.release("ticktock", 2).await;
    assert!(cancelled.is(StatusCode::Failed));
    assert_eq!(cancelled.description(), "Cancelled after 10000 ms.");
    assert_eq!(h.strategy.cancels(), 1);
    assert!(h.observer.states("ticktock").contains(&S::UpgradeCancel));
    assert!(!h
        .observer
        .states("ticktock")
        .contains(&S::UpgradeDeployTargetAppsFailed));

    // Nothing left to cancel
    assert!(!h.controller.cancel("ticktock"));
}

#[tokio::test]
async fn test_upgrade_deploy_failure_fails_candidate() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.deployer.fail_deploy_of("time");

    h.controller
        .upgrade(upgrade_request("ticktock", "1.1.0", 10_000))
        .await
        .unwrap();
    h.settle("ticktock").await;

    let failed = h.release("ticktock", 2).await;
    assert!(failed.is(StatusCode::Failed));
    assert_eq!(failed.description(), DEPLOY_FAILED_DESCRIPTION);
    assert!(h.release("ticktock", 1).await.is(StatusCode::Deployed));
    assert_eq!(h.strategy.checks(), 0);
    assert_eq!(h.strategy.cancels(), 1);
}

#[tokio::test]
async fn test_upgrade_without_difference_is_rejected() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;

    let err = h
        .controller
        .upgrade(upgrade_request("ticktock", "1.0.0", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::UpgradeRejected(_)));
    h.settle("ticktock").await;

    let states = h.observer.states("ticktock");
    assert!(states.contains(&S::Error));
    assert_eq!(states.last(), Some(&S::Initial));
    assert_eq!(h.releases.history("ticktock").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_forced_upgrade_redeploys_requested_apps() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    let time_id = h
        .deployments("ticktock", 1)
        .await
        .deployment_id("time")
        .unwrap()
        .to_string();

    let mut request = upgrade_request("ticktock", "1.0.0", 1000);
    request.force = true;
    request.app_names = vec!["log".to_string()];
    h.controller.upgrade(request).await.unwrap();
    h.settle("ticktock").await;

    let record = h.deployments("ticktock", 2).await;
    assert_eq!(record.deployment_id("time"), Some(time_id.as_str()));
    assert!(h.release("ticktock", 2).await.is(StatusCode::Deployed));
}

#[tokio::test]
async fn test_rollback_after_delete_reuses_install_path() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.controller
        .delete("ticktock", DeleteProperties::default())
        .await
        .unwrap();
    h.settle("ticktock").await;
    h.observer.clear();

    let release = h
        .controller
        .rollback(RollbackRequest {
            release_name: "ticktock".to_string(),
            version: 0,
            timeout_millis: None,
        })
        .await
        .unwrap();
    h.settle("ticktock").await;

    assert_eq!(
        h.observer.states("ticktock"),
        vec![
            S::Rollback,
            S::RollbackStart,
            S::Install,
            S::InstallInstall,
            S::Initial
        ]
    );
    assert_eq!(release.version, 2);
    assert!(release.is(StatusCode::Deployed));
    assert_eq!(release.manifest, h.release("ticktock", 1).await.manifest);
}

#[tokio::test]
async fn test_rollback_of_live_release_goes_through_upgrade() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.controller
        .upgrade(upgrade_request("ticktock", "1.1.0", 1000))
        .await
        .unwrap();
    h.settle("ticktock").await;
    h.observer.clear();

    h.controller
        .rollback(RollbackRequest {
            release_name: "ticktock".to_string(),
            version: 1,
            timeout_millis: Some(1000),
        })
        .await
        .unwrap();
    h.settle("ticktock").await;

    let states = h.observer.states("ticktock");
    assert_eq!(&states[..3], &[S::Rollback, S::RollbackStart, S::Upgrade]);
    assert_eq!(states.last(), Some(&S::Initial));

    let rolled_back = h.release("ticktock", 3).await;
    assert!(rolled_back.is(StatusCode::Deployed));
    assert_eq!(rolled_back.description(), ROLLBACK_COMPLETE);
    assert_eq!(rolled_back.manifest, h.release("ticktock", 1).await.manifest);
    assert!(h.release("ticktock", 2).await.is(StatusCode::Deleted));
}

#[tokio::test]
async fn test_delete_takes_three_state_changes() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;

    let release = h
        .controller
        .delete("ticktock", DeleteProperties { delete_package: true })
        .await
        .unwrap();
    h.settle("ticktock").await;

    assert_eq!(
        h.observer.states("ticktock"),
        vec![S::Delete, S::DeleteDelete, S::Initial]
    );
    assert!(release.is(StatusCode::Deleted));
    assert!(h.deployer.live_ids().is_empty());
    assert!(h.packages.versions("ticktock").await.unwrap().is_empty());

    // Deleting again is a no-op
    let again = h
        .controller
        .delete("ticktock", DeleteProperties::default())
        .await
        .unwrap();
    assert_eq!(again.version, 1);
}

#[tokio::test]
async fn test_scale_takes_three_state_changes() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;

    let release = h
        .controller
        .scale(
            "ticktock",
            ScaleRequest {
                scale: vec![ScaleRequestItem {
                    name: "time".to_string(),
                    count: 3,
                    properties: BTreeMap::new(),
                }],
            },
        )
        .await
        .unwrap();
    h.settle("ticktock").await;

    assert_eq!(
        h.observer.states("ticktock"),
        vec![S::Scale, S::ScaleScale, S::Initial]
    );
    assert_eq!(release.version, 1);
    let record = h.deployments("ticktock", 1).await;
    let time_id = record.deployment_id("time").unwrap();
    assert_eq!(h.deployer.instances(time_id), Some(3));
}

#[tokio::test]
async fn test_release_names_run_independently() {
    let h = Harness::new().await;

    let (first, second) = tokio::join!(
        h.controller.install(install_request("ticktock", "1.0.0")),
        h.controller.install(install_request("heartbeat", "1.0.0")),
    );
    assert!(first.unwrap().is(StatusCode::Deployed));
    assert!(second.unwrap().is(StatusCode::Deployed));

    h.settle("ticktock").await;
    h.settle("heartbeat").await;
    assert_eq!(h.observer.states("heartbeat").len(), 3);
    assert_eq!(h.deployer.live_ids().len(), 4);
}

#[tokio::test]
async fn test_status_and_history_queries() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.controller
        .upgrade(upgrade_request("ticktock", "1.1.0", 1000))
        .await
        .unwrap();
    h.settle("ticktock").await;

    let status = h.controller.status("ticktock").await.unwrap();
    assert_eq!(status.version, 2);
    assert_eq!(status.info.status.platform_status.len(), 2);

    let history = h.controller.history("ticktock").await.unwrap();
    let versions: Vec<u32> = history.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![2, 1]);

    let manifest = h.controller.manifest("ticktock", Some(1)).await.unwrap();
    assert!(manifest.contains("1.0.0"));

    let err = h.controller.status("missing").await.unwrap_err();
    assert!(matches!(err, ControllerError::ReleaseNotFound(_)));
}

#[tokio::test]
async fn test_deleted_release_machine_is_dropped() {
    let h = Harness::new().await;
    installed(&h, "ticktock").await;
    h.controller
        .delete("ticktock", DeleteProperties::default())
        .await
        .unwrap();
    h.settle("ticktock").await;
    assert_eq!(h.controller.machine_count(), 1);

    // The next spawn drops the idle machine of the deleted name
    installed(&h, "heartbeat").await;
    assert_eq!(h.controller.machine_count(), 1);
    assert_eq!(h.controller.state("ticktock"), S::Initial);

    // A new machine picks the name up again
    let reinstalled = h
        .controller
        .install(install_request("ticktock", "1.0.0"))
        .await
        .unwrap();
    h.settle("ticktock").await;
    assert_eq!(reinstalled.version, 2);
    assert!(reinstalled.is(StatusCode::Deployed));
    assert_eq!(h.controller.machine_count(), 2);
    assert_eq!(
        h.observer.states("ticktock"),
        vec![S::Install, S::InstallInstall, S::Initial]
    );
}
