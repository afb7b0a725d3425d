//! Lifecycle controller facade
//!
//! Keeps one machine per release name and routes every event to it. A busy
//! machine rejects new events with [`ControllerError::NotAccepted`]; nothing
//! is queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use release_api::models::{
    DeleteProperties, InstallRequest, RollbackRequest, ScaleRequest, UpgradeRequest,
};

use crate::deploy::fsm::ReleaseState;
use crate::errors::ControllerError;
use crate::models::machine::OperationRequest;
use crate::models::release::Release;
use crate::utils::validate_release_name;
use crate::workers::release_machine::{self, MachineContext, MachineHandle};

pub struct LifecycleController {
    context: Arc<MachineContext>,
    accept_timeout: Duration,
    handles: Mutex<HashMap<String, Arc<MachineHandle>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleController {
    pub fn new(context: Arc<MachineContext>, accept_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            context,
            accept_timeout,
            handles: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Machine of a release name, spawned on first use. Machines left idle
    /// by a delete are dropped first and respawn on their next event.
    fn handle(&self, release_name: &str) -> Arc<MachineHandle> {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = handles.get(release_name) {
            if !handle.is_dormant() {
                return handle.clone();
            }
        }
        handles.retain(|_, h| Arc::strong_count(h) > 1 || !h.is_dormant());
        if let Some(handle) = handles.get(release_name) {
            return handle.clone();
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let (handle, worker) = release_machine::spawn(
            release_name,
            self.context.clone(),
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        );
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.retain(|w| !w.is_finished());
        workers.push(worker);

        let handle = Arc::new(handle);
        handles.insert(release_name.to_string(), handle.clone());
        handle
    }

    /// Machines currently held, dormant ones included until the next spawn
    pub fn machine_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn existing_handle(&self, release_name: &str) -> Option<Arc<MachineHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(release_name)
            .cloned()
    }

    /// Send a request and wait for its result, bounded by the accept timeout
    pub async fn submit(&self, request: OperationRequest) -> Result<Release, ControllerError> {
        let release_name = request.release_name().to_string();
        validate_release_name(&release_name).map_err(ControllerError::ValidationError)?;

        let receiver = self.handle(&release_name).submit(request).await?;
        match tokio::time::timeout(self.accept_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ControllerError::ShutdownError(format!(
                "lifecycle machine for [{}] stopped before replying",
                release_name
            ))),
            Err(_) => Err(ControllerError::Timeout(format!(
                "operation on [{}] still running after {:?}",
                release_name, self.accept_timeout
            ))),
        }
    }

    pub async fn install(&self, request: InstallRequest) -> Result<Release, ControllerError> {
        self.submit(OperationRequest::Install(request)).await
    }

    /// Returns the candidate once it is waiting on health checks
    pub async fn upgrade(&self, request: UpgradeRequest) -> Result<Release, ControllerError> {
        self.submit(OperationRequest::Upgrade(request)).await
    }

    pub async fn rollback(&self, request: RollbackRequest) -> Result<Release, ControllerError> {
        self.submit(OperationRequest::Rollback(request)).await
    }

    pub async fn delete(
        &self,
        release_name: &str,
        properties: DeleteProperties,
    ) -> Result<Release, ControllerError> {
        self.submit(OperationRequest::Delete {
            release_name: release_name.to_string(),
            properties,
        })
        .await
    }

    pub async fn scale(
        &self,
        release_name: &str,
        request: ScaleRequest,
    ) -> Result<Release, ControllerError> {
        self.submit(OperationRequest::Scale {
            release_name: release_name.to_string(),
            request,
        })
        .await
    }

    /// Cancel a running upgrade. False when none can be cancelled.
    pub fn cancel(&self, release_name: &str) -> bool {
        match self.existing_handle(release_name) {
            Some(handle) => handle.cancel(),
            None => false,
        }
    }

    pub fn state(&self, release_name: &str) -> ReleaseState {
        self.existing_handle(release_name)
            .map(|h| h.state())
            .unwrap_or(ReleaseState::Initial)
    }

    /// Wait until the machine of a release name is back in INITIAL
    pub async fn await_idle(&self, release_name: &str, timeout: Duration) -> Result<(), ControllerError> {
        let Some(handle) = self.existing_handle(release_name) else {
            return Ok(());
        };
        let mut states = handle.subscribe();
        let waited = tokio::time::timeout(timeout, states.wait_for(|s| s.is_idle()))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ControllerError::ShutdownError(format!(
                "lifecycle machine for [{}] stopped",
                release_name
            ))),
            Err(_) => Err(ControllerError::Timeout(format!(
                "release [{}] still in {:?} after {:?}",
                release_name,
                handle.state(),
                timeout
            ))),
        }
    }

    /// Replay every interrupted operation found in the machine store
    pub async fn resume_persisted(&self) -> Result<usize, ControllerError> {
        let records = self.context.machines.list().await?;
        let mut resumed = 0;

        for record in records.iter().filter(|r| r.needs_resume()) {
            if let Err(e) = validate_release_name(&record.release_name) {
                warn!("Skipping persisted machine: {}", e);
                continue;
            }
            info!(
                "Resuming release {} interrupted in state {:?}",
                record.release_name, record.state
            );
            match self.handle(&record.release_name).resume(record).await {
                Ok(()) => resumed += 1,
                Err(e) => error!("Failed to resume release {}: {}", record.release_name, e),
            }
        }
        Ok(resumed)
    }

    pub async fn status(&self, release_name: &str) -> Result<Release, ControllerError> {
        self.context.operations.status(release_name).await
    }

    pub async fn history(&self, release_name: &str) -> Result<Vec<Release>, ControllerError> {
        self.context.operations.history(release_name).await
    }

    pub async fn manifest(
        &self,
        release_name: &str,
        version: Option<u32>,
    ) -> Result<String, ControllerError> {
        self.context.operations.manifest(release_name, version).await
    }

    /// Stop every machine worker
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        info!("Shutting down lifecycle machines...");
        let _ = self.shutdown_tx.send(());

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()),
        );
        for result in futures::future::join_all(workers).await {
            result.map_err(|e| ControllerError::ShutdownError(e.to_string()))?;
        }
        Ok(())
    }
}
