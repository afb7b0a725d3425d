//! Finite State Machine for the release lifecycle

use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;

/// Lifecycle state of one release name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseState {
    /// Idle, the only state accepting new events
    Initial,
    Error,

    Install,
    InstallInstall,

    Upgrade,
    UpgradeStart,
    UpgradeDeployTargetApps,
    UpgradeWaitTargetApps,
    UpgradeCheckTargetApps,
    UpgradeDeployTargetAppsSucceed,
    UpgradeDeployTargetAppsFailed,
    UpgradeCancel,
    UpgradeDeleteSourceApps,

    Delete,
    DeleteDelete,

    Scale,
    ScaleScale,

    Rollback,
    RollbackStart,
}

impl ReleaseState {
    pub fn is_idle(&self) -> bool {
        *self == ReleaseState::Initial
    }

    /// Upgrade states where a cancel can still change the outcome
    pub fn accepts_cancel(&self) -> bool {
        matches!(
            self,
            ReleaseState::Upgrade
                | ReleaseState::UpgradeStart
                | ReleaseState::UpgradeDeployTargetApps
                | ReleaseState::UpgradeWaitTargetApps
                | ReleaseState::UpgradeCheckTargetApps
        )
    }
}

/// Externally sent lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseEvent {
    Install,
    Upgrade,
    UpgradeCancel,
    Rollback,
    Delete,
    Scale,
}

impl ReleaseEvent {
    /// State entered when the event is accepted from INITIAL
    pub fn entry_state(&self) -> ReleaseState {
        match self {
            ReleaseEvent::Install => ReleaseState::Install,
            ReleaseEvent::Upgrade => ReleaseState::Upgrade,
            ReleaseEvent::UpgradeCancel => ReleaseState::UpgradeCancel,
            ReleaseEvent::Rollback => ReleaseState::Rollback,
            ReleaseEvent::Delete => ReleaseState::Delete,
            ReleaseEvent::Scale => ReleaseState::Scale,
        }
    }
}

impl std::fmt::Display for ReleaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReleaseEvent::Install => "INSTALL",
            ReleaseEvent::Upgrade => "UPGRADE",
            ReleaseEvent::UpgradeCancel => "UPGRADE_CANCEL",
            ReleaseEvent::Rollback => "ROLLBACK",
            ReleaseEvent::Delete => "DELETE",
            ReleaseEvent::Scale => "SCALE",
        };
        f.write_str(name)
    }
}

/// Inputs driving the machine: external events plus internal completions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Event(ReleaseEvent),

    /// The entry action of the current state finished
    Done,

    /// Rollback resolved to a fresh install of the target version
    RollbackInstall,

    /// Rollback resolved to a red/black upgrade towards the target version
    RollbackUpgrade,

    TargetsHealthy,
    TargetsFailed,
    RecheckTargets,

    /// A replayed operation found its outcome already applied
    Settled,

    /// Unclassified failure in an entry action
    Fault(String),
}

/// Release lifecycle FSM
#[derive(Debug, Clone)]
pub struct ReleaseFsm {
    state: ReleaseState,
    error: Option<String>,
}

impl ReleaseFsm {
    /// Create a new FSM in the initial state
    pub fn new() -> Self {
        Self {
            state: ReleaseState::Initial,
            error: None,
        }
    }

    pub fn state(&self) -> ReleaseState {
        self.state
    }

    /// Last recorded fault
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Jump to the top-level state of a replayed operation
    pub fn restore(&mut self, state: ReleaseState) {
        self.state = state;
    }

    /// Process a trigger and transition state
    pub fn fire(&mut self, trigger: Trigger) -> Result<ReleaseState, ControllerError> {
        use ReleaseState as S;

        let new_state = match (self.state, &trigger) {
            (S::Initial, Trigger::Event(ReleaseEvent::UpgradeCancel)) => {
                return Err(ControllerError::InvalidTransition(
                    "no upgrade in progress to cancel".to_string(),
                ));
            }
            (S::Initial, Trigger::Event(event)) => {
                self.error = None;
                event.entry_state()
            }

            // Install
            (S::Install, Trigger::Done) => S::InstallInstall,
            (S::InstallInstall, Trigger::Done) => S::Initial,

            // Upgrade
            (S::Upgrade, Trigger::Done) => S::UpgradeStart,
            (S::UpgradeStart, Trigger::Done) => S::UpgradeDeployTargetApps,
            (S::UpgradeDeployTargetApps, Trigger::Done) => S::UpgradeWaitTargetApps,
            (S::UpgradeWaitTargetApps, Trigger::RecheckTargets) => S::UpgradeCheckTargetApps,
            (S::UpgradeWaitTargetApps, Trigger::TargetsHealthy) => {
                S::UpgradeDeployTargetAppsSucceed
            }
            (S::UpgradeWaitTargetApps, Trigger::TargetsFailed) => S::UpgradeDeployTargetAppsFailed,
            (S::UpgradeWaitTargetApps, Trigger::Event(ReleaseEvent::UpgradeCancel)) => {
                S::UpgradeCancel
            }
            (S::UpgradeCheckTargetApps, Trigger::Done) => S::UpgradeWaitTargetApps,
            (S::UpgradeDeployTargetAppsSucceed, Trigger::Done) => S::UpgradeDeleteSourceApps,
            (S::UpgradeDeleteSourceApps, Trigger::Done) => S::Initial,
            (S::UpgradeDeployTargetAppsFailed, Trigger::Done) => S::UpgradeCancel,
            (S::UpgradeCancel, Trigger::Done) => S::Initial,

            // Rollback
            (S::Rollback, Trigger::Done) => S::RollbackStart,
            (S::RollbackStart, Trigger::RollbackInstall) => S::Install,
            (S::RollbackStart, Trigger::RollbackUpgrade) => S::Upgrade,

            // Replay of a decided upgrade
            (S::Upgrade | S::Rollback, Trigger::Settled) => S::Initial,

            // Delete
            (S::Delete, Trigger::Done) => S::DeleteDelete,
            (S::DeleteDelete, Trigger::Done) => S::Initial,

            // Scale
            (S::Scale, Trigger::Done) => S::ScaleScale,
            (S::ScaleScale, Trigger::Done) => S::Initial,

            // Error handling
            (S::Error, Trigger::Done) => S::Initial,
            (state, Trigger::Fault(err)) if state != S::Initial && state != S::Error => {
                self.error = Some(err.clone());
                S::Error
            }

            // Invalid transitions
            (state, trigger) => {
                return Err(ControllerError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, trigger
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for ReleaseFsm {
    fn default() -> Self {
        Self::new()
    }
}
