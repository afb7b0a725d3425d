//! Persisted state machine records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use release_api::models::{
    DeleteProperties, InstallRequest, RollbackRequest, ScaleRequest, UpgradeRequest,
};

use crate::deploy::fsm::{ReleaseEvent, ReleaseState};

/// Originating request of an in-flight operation, replayed on restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationRequest {
    Install(InstallRequest),
    Upgrade(UpgradeRequest),
    Rollback(RollbackRequest),
    Delete {
        release_name: String,
        #[serde(default)]
        properties: DeleteProperties,
    },
    Scale {
        release_name: String,
        request: ScaleRequest,
    },
}

impl OperationRequest {
    pub fn release_name(&self) -> &str {
        match self {
            OperationRequest::Install(r) => &r.install_properties.release_name,
            OperationRequest::Upgrade(r) => &r.upgrade_properties.release_name,
            OperationRequest::Rollback(r) => &r.release_name,
            OperationRequest::Delete { release_name, .. } => release_name,
            OperationRequest::Scale { release_name, .. } => release_name,
        }
    }

    pub fn event(&self) -> ReleaseEvent {
        match self {
            OperationRequest::Install(_) => ReleaseEvent::Install,
            OperationRequest::Upgrade(_) => ReleaseEvent::Upgrade,
            OperationRequest::Rollback(_) => ReleaseEvent::Rollback,
            OperationRequest::Delete { .. } => ReleaseEvent::Delete,
            OperationRequest::Scale { .. } => ReleaseEvent::Scale,
        }
    }

    /// State a replay restarts from
    pub fn replay_state(&self) -> ReleaseState {
        self.event().entry_state()
    }
}

/// Extended state persisted on every state entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub release_name: String,
    pub state: ReleaseState,
    #[serde(default)]
    pub upgrade_cutoff: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upgrade_in_progress: bool,
    #[serde(default)]
    pub request: Option<OperationRequest>,
    pub updated_at: DateTime<Utc>,
}

impl MachineRecord {
    pub fn idle(release_name: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            state: ReleaseState::Initial,
            upgrade_cutoff: None,
            upgrade_in_progress: false,
            request: None,
            updated_at: Utc::now(),
        }
    }

    /// An interrupted operation is pending replay
    pub fn needs_resume(&self) -> bool {
        !self.state.is_idle() && self.request.is_some()
    }
}
