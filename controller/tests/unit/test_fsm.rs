//! FSM unit tests

use helmsman::deploy::fsm::{ReleaseEvent, ReleaseFsm, ReleaseState, Trigger};

fn run(fsm: &mut ReleaseFsm, triggers: Vec<Trigger>) -> Vec<ReleaseState> {
    triggers
        .into_iter()
        .map(|trigger| fsm.fire(trigger).unwrap())
        .collect()
}

#[test]
fn test_fsm_initial_state() {
    let fsm = ReleaseFsm::new();
    assert_eq!(fsm.state(), ReleaseState::Initial);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_install_path() {
    let mut fsm = ReleaseFsm::new();
    let states = run(
        &mut fsm,
        vec![Trigger::Event(ReleaseEvent::Install), Trigger::Done, Trigger::Done],
    );
    assert_eq!(
        states,
        vec![
            ReleaseState::Install,
            ReleaseState::InstallInstall,
            ReleaseState::Initial
        ]
    );
}

#[test]
fn test_fsm_upgrade_healthy_path() {
    let mut fsm = ReleaseFsm::new();
    let states = run(
        &mut fsm,
        vec![
            Trigger::Event(ReleaseEvent::Upgrade),
            Trigger::Done,
            Trigger::Done,
            Trigger::Done,
            Trigger::RecheckTargets,
            Trigger::Done,
            Trigger::TargetsHealthy,
            Trigger::Done,
            Trigger::Done,
        ],
    );
    assert_eq!(states.len(), 9);
    assert_eq!(states[3], ReleaseState::UpgradeWaitTargetApps);
    assert_eq!(states[4], ReleaseState::UpgradeCheckTargetApps);
    assert_eq!(states[6], ReleaseState::UpgradeDeployTargetAppsSucceed);
    assert_eq!(states[7], ReleaseState::UpgradeDeleteSourceApps);
    assert_eq!(fsm.state(), ReleaseState::Initial);
}

#[test]
fn test_fsm_upgrade_failed_path() {
    let mut fsm = ReleaseFsm::new();
    let states = run(
        &mut fsm,
        vec![
            Trigger::Event(ReleaseEvent::Upgrade),
            Trigger::Done,
            Trigger::Done,
            Trigger::Done,
            Trigger::RecheckTargets,
            Trigger::Done,
            Trigger::TargetsFailed,
            Trigger::Done,
            Trigger::Done,
        ],
    );
    assert_eq!(
        &states[6..],
        &[
            ReleaseState::UpgradeDeployTargetAppsFailed,
            ReleaseState::UpgradeCancel,
            ReleaseState::Initial
        ]
    );
}

#[test]
fn test_fsm_cancel_only_while_waiting() {
    let mut fsm = ReleaseFsm::new();
    assert!(fsm.fire(Trigger::Event(ReleaseEvent::UpgradeCancel)).is_err());

    run(
        &mut fsm,
        vec![
            Trigger::Event(ReleaseEvent::Upgrade),
            Trigger::Done,
            Trigger::Done,
            Trigger::Done,
        ],
    );
    assert_eq!(
        fsm.fire(Trigger::Event(ReleaseEvent::UpgradeCancel)).unwrap(),
        ReleaseState::UpgradeCancel
    );
    assert_eq!(fsm.fire(Trigger::Done).unwrap(), ReleaseState::Initial);
}

#[test]
fn test_fsm_rollback_paths() {
    let mut fsm = ReleaseFsm::new();
    let states = run(
        &mut fsm,
        vec![
            Trigger::Event(ReleaseEvent::Rollback),
            Trigger::Done,
            Trigger::RollbackInstall,
            Trigger::Done,
            Trigger::Done,
        ],
    );
    assert_eq!(
        states,
        vec![
            ReleaseState::Rollback,
            ReleaseState::RollbackStart,
            ReleaseState::Install,
            ReleaseState::InstallInstall,
            ReleaseState::Initial
        ]
    );

    run(
        &mut fsm,
        vec![Trigger::Event(ReleaseEvent::Rollback), Trigger::Done],
    );
    assert_eq!(fsm.fire(Trigger::RollbackUpgrade).unwrap(), ReleaseState::Upgrade);
}

#[test]
fn test_fsm_events_rejected_when_busy() {
    let mut fsm = ReleaseFsm::new();
    fsm.fire(Trigger::Event(ReleaseEvent::Delete)).unwrap();

    assert!(fsm.fire(Trigger::Event(ReleaseEvent::Install)).is_err());
    assert!(fsm.fire(Trigger::TargetsHealthy).is_err());
    assert_eq!(fsm.state(), ReleaseState::Delete);
}

#[test]
fn test_fsm_fault_unwinds_through_error() {
    let mut fsm = ReleaseFsm::new();
    fsm.fire(Trigger::Event(ReleaseEvent::Scale)).unwrap();
    fsm.fire(Trigger::Done).unwrap();

    assert_eq!(
        fsm.fire(Trigger::Fault("backend down".to_string())).unwrap(),
        ReleaseState::Error
    );
    assert_eq!(fsm.error(), Some("backend down"));
    assert_eq!(fsm.fire(Trigger::Done).unwrap(), ReleaseState::Initial);

    // A fault with nothing running is not a transition
    assert!(fsm.fire(Trigger::Fault("late".to_string())).is_err());
}

#[test]
fn test_fsm_restore_for_replay() {
    let mut fsm = ReleaseFsm::new();
    fsm.restore(ReleaseState::Upgrade);
    assert_eq!(fsm.fire(Trigger::Done).unwrap(), ReleaseState::UpgradeStart);
}

#[test]
fn test_fsm_settled_replay_returns_to_initial() {
    for entry in [ReleaseState::Upgrade, ReleaseState::Rollback] {
        let mut fsm = ReleaseFsm::new();
        fsm.restore(entry);
        assert_eq!(fsm.fire(Trigger::Settled).unwrap(), ReleaseState::Initial);
    }

    // Only a replay's entry state can settle
    let mut fsm = ReleaseFsm::new();
    fsm.restore(ReleaseState::UpgradeWaitTargetApps);
    assert!(fsm.fire(Trigger::Settled).is_err());
    assert!(ReleaseFsm::new().fire(Trigger::Settled).is_err());
}
