//! Release lifecycle machine worker
//!
//! One worker task per release name. Callers go through a [`MachineHandle`]:
//! the handle moves the FSM out of INITIAL under a lock (the guard), then
//! hands the request to the worker over a channel. The worker runs the entry
//! action of every state it enters, persists a [`MachineRecord`] on each
//! entry, and replies to the caller once the operation has a result.
//!
//! An upgrade replies as soon as its candidate is waiting on health checks;
//! the rest of the upgrade runs in the background.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::deploy::decision::Verdict;
use crate::deploy::fsm::{ReleaseEvent, ReleaseFsm, ReleaseState, Trigger};
use crate::deploy::strategy::{wait_outcome, UpgradeStrategy, WaitOutcome};
use crate::errors::ControllerError;
use crate::manifest::diff::ReleaseDiff;
use crate::models::machine::{MachineRecord, OperationRequest};
use crate::models::release::{Release, StatusCode};
use crate::service::release_service::{Recovery, ReleaseOperations, RollbackPlan};
use crate::storage::MachineStore;
use crate::utils::generate_uuid;

/// Lifecycle machine options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between two health checks of an upgrade
    pub health_check_interval: Duration,

    /// Health check budget of an upgrade or rollback that gives none
    pub default_upgrade_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(1),
            default_upgrade_timeout: Duration::from_secs(300),
        }
    }
}

/// Notified on every state entry and recorded error
pub trait MachineObserver: Send + Sync {
    fn state_entered(&self, release_name: &str, state: ReleaseState) {
        debug!("Release {} entering state {:?}", release_name, state);
    }

    fn error_recorded(&self, release_name: &str, error: &str) {
        error!("Release {} operation failed: {}", release_name, error);
    }
}

/// Observer that only logs
#[derive(Debug, Default)]
pub struct LogObserver;

impl MachineObserver for LogObserver {}

/// Collaborators shared by every machine
pub struct MachineContext {
    pub operations: Arc<dyn ReleaseOperations>,
    pub strategy: Arc<dyn UpgradeStrategy>,
    pub machines: Arc<dyn MachineStore>,
    pub observer: Arc<dyn MachineObserver>,
    /// Bounds the operations executing at once across all release names
    pub pool: Arc<Semaphore>,
    pub options: Options,
}

type Reply = oneshot::Sender<Result<Release, ControllerError>>;

pub enum Command {
    Run {
        request: OperationRequest,
        reply: Reply,
    },
    Resume {
        request: OperationRequest,
        /// State the operation was interrupted in
        from: ReleaseState,
        cutoff: Option<DateTime<Utc>>,
    },
}

struct Guarded {
    fsm: ReleaseFsm,
    cancel_requested: bool,
    /// Idle after a delete that left the release DELETED
    dormant: bool,
}

/// State visible to both the handle and the worker
struct Shared {
    release_name: String,
    guarded: Mutex<Guarded>,
    cancel: Notify,
    state_tx: watch::Sender<ReleaseState>,
}

impl Shared {
    fn new(release_name: String) -> Self {
        let (state_tx, _) = watch::channel(ReleaseState::Initial);
        Self {
            release_name,
            guarded: Mutex::new(Guarded {
                fsm: ReleaseFsm::new(),
                cancel_requested: false,
                dormant: false,
            }),
            cancel: Notify::new(),
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.guarded.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> ReleaseState {
        self.lock().fsm.state()
    }

    fn fsm_error(&self) -> Option<String> {
        self.lock().fsm.error().map(str::to_string)
    }

    /// Leave INITIAL for `event`, or reject
    fn accept(&self, event: ReleaseEvent) -> Result<ReleaseState, ControllerError> {
        let mut guarded = self.lock();
        if !guarded.fsm.state().is_idle() {
            return Err(ControllerError::NotAccepted {
                release_name: self.release_name.clone(),
                event: event.to_string(),
            });
        }
        let state = guarded.fsm.fire(Trigger::Event(event))?;
        guarded.cancel_requested = false;
        guarded.dormant = false;
        self.state_tx.send_replace(state);
        Ok(state)
    }

    /// Jump to the top-level state of a replayed request, or reject
    fn accept_replay(&self, request: &OperationRequest) -> Result<ReleaseState, ControllerError> {
        let mut guarded = self.lock();
        if !guarded.fsm.state().is_idle() {
            return Err(ControllerError::NotAccepted {
                release_name: self.release_name.clone(),
                event: request.event().to_string(),
            });
        }
        let state = request.replay_state();
        guarded.fsm.restore(state);
        guarded.cancel_requested = false;
        guarded.dormant = false;
        self.state_tx.send_replace(state);
        Ok(state)
    }

    fn fire(&self, trigger: Trigger) -> Result<ReleaseState, ControllerError> {
        self.lock().fsm.fire(trigger)
    }

    fn reset(&self) {
        self.lock().fsm.restore(ReleaseState::Initial);
        self.state_tx.send_replace(ReleaseState::Initial);
    }

    fn request_cancel(&self) -> bool {
        let mut guarded = self.lock();
        if !guarded.fsm.state().accepts_cancel() {
            return false;
        }
        guarded.cancel_requested = true;
        self.cancel.notify_one();
        true
    }

    fn cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    fn set_dormant(&self, dormant: bool) {
        self.lock().dormant = dormant;
    }

    fn is_dormant(&self) -> bool {
        let guarded = self.lock();
        guarded.dormant && guarded.fsm.state().is_idle()
    }
}

/// Caller side of one release name's machine
pub struct MachineHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl MachineHandle {
    pub fn release_name(&self) -> &str {
        &self.shared.release_name
    }

    pub fn state(&self) -> ReleaseState {
        self.shared.state()
    }

    /// Idle and its release deleted, nothing left for the worker to do
    pub fn is_dormant(&self) -> bool {
        self.shared.is_dormant()
    }

    /// Watch state entries as the worker makes them
    pub fn subscribe(&self) -> watch::Receiver<ReleaseState> {
        self.shared.state_tx.subscribe()
    }

    /// Guard then dispatch. The receiver yields the operation's result.
    pub async fn submit(
        &self,
        request: OperationRequest,
    ) -> Result<oneshot::Receiver<Result<Release, ControllerError>>, ControllerError> {
        self.shared.accept(request.event())?;

        let (reply, receiver) = oneshot::channel();
        if self.commands.send(Command::Run { request, reply }).await.is_err() {
            self.shared.reset();
            return Err(ControllerError::ShutdownError(format!(
                "lifecycle machine for [{}] is stopped",
                self.release_name()
            )));
        }
        Ok(receiver)
    }

    /// Replay a persisted operation from its top-level state
    pub async fn resume(&self, record: &MachineRecord) -> Result<(), ControllerError> {
        let request = record.request.clone().ok_or_else(|| {
            ControllerError::Internal(format!(
                "no request persisted for [{}]",
                record.release_name
            ))
        })?;
        self.shared.accept_replay(&request)?;

        let command = Command::Resume {
            request,
            from: record.state,
            cutoff: record.upgrade_cutoff,
        };
        if self.commands.send(command).await.is_err() {
            self.shared.reset();
            return Err(ControllerError::ShutdownError(format!(
                "lifecycle machine for [{}] is stopped",
                self.release_name()
            )));
        }
        Ok(())
    }

    /// Ask a running upgrade to cancel. False when no upgrade can be cancelled.
    pub fn cancel(&self) -> bool {
        self.shared.request_cancel()
    }
}

/// Spawn the worker of one release name
pub fn spawn(
    release_name: impl Into<String>,
    context: Arc<MachineContext>,
    shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> (MachineHandle, JoinHandle<()>) {
    let shared = Arc::new(Shared::new(release_name.into()));
    let (commands, receiver) = mpsc::channel(4);

    let machine = ReleaseMachine {
        shared: shared.clone(),
        context,
    };
    let handle = tokio::spawn(machine.run(receiver, shutdown_signal));

    (MachineHandle { shared, commands }, handle)
}

/// Working data of one operation. Never persisted beyond the cutoff.
struct Operation {
    request: OperationRequest,
    reply: Option<Reply>,
    resumed_from: Option<ReleaseState>,
    resumed_cutoff: Option<DateTime<Utc>>,
    rollback: Option<RollbackPlan>,
    diff: Option<ReleaseDiff>,
    cutoff: Option<DateTime<Utc>>,
    timeout_millis: u64,
    last_health: Option<bool>,
    verdict: Verdict,
    error: Option<ControllerError>,
    release_deleted: bool,
}

impl Operation {
    fn new(command: Command) -> Self {
        let (request, reply, resumed_from, resumed_cutoff) = match command {
            Command::Run { request, reply } => (request, Some(reply), None, None),
            Command::Resume {
                request,
                from,
                cutoff,
            } => (request, None, Some(from), cutoff),
        };
        Self {
            request,
            reply,
            resumed_from,
            resumed_cutoff,
            rollback: None,
            diff: None,
            cutoff: None,
            timeout_millis: 0,
            last_health: None,
            verdict: Verdict::TimedOut,
            error: None,
            release_deleted: false,
        }
    }

    fn respond(&mut self, result: Result<Release, ControllerError>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }

    fn is_resumed(&self) -> bool {
        self.resumed_from.is_some()
    }

    fn is_rollback(&self) -> bool {
        matches!(self.request, OperationRequest::Rollback(_))
    }

    fn diff_mut(&mut self) -> Result<&mut ReleaseDiff, ControllerError> {
        self.diff
            .as_mut()
            .ok_or_else(|| ControllerError::Internal("no upgrade report in progress".to_string()))
    }

    fn mismatch(&self, state: ReleaseState) -> ControllerError {
        ControllerError::Internal(format!(
            "{} request cannot run state {:?}",
            self.request.event(),
            state
        ))
    }
}

/// Worker side of one release name's machine
pub struct ReleaseMachine {
    shared: Arc<Shared>,
    context: Arc<MachineContext>,
}

impl ReleaseMachine {
    /// Process commands until shutdown. An operation cut short by shutdown
    /// keeps its persisted record and resumes on the next start.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<Command>,
        mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
    ) {
        debug!("Lifecycle machine for {} starting...", self.shared.release_name);

        loop {
            let command = tokio::select! {
                _ = &mut shutdown_signal => {
                    debug!("Lifecycle machine for {} shutting down...", self.shared.release_name);
                    return;
                }
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => return,
                },
            };

            tokio::select! {
                _ = &mut shutdown_signal => {
                    warn!(
                        "Shutdown interrupted release {} in state {:?}, it resumes on restart",
                        self.shared.release_name,
                        self.shared.state()
                    );
                    return;
                }
                _ = self.execute(Operation::new(command)) => {}
            }
        }
    }

    async fn execute(&self, mut op: Operation) {
        let _permit = match self.context.pool.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                op.respond(Err(ControllerError::ShutdownError(
                    "operation pool is closed".to_string(),
                )));
                self.shared.reset();
                return;
            }
        };

        let span = tracing::info_span!(
            "release_operation",
            release = %self.shared.release_name,
            event = %op.request.event(),
            operation_id = %generate_uuid(),
        );
        self.drive(&mut op).instrument(span).await;
    }

    async fn drive(&self, op: &mut Operation) {
        let mut state = self.shared.state();
        info!(
            "{} {} from state {:?}",
            if op.is_resumed() { "Resuming" } else { "Running" },
            op.request.event(),
            state
        );

        // A replay starts inside its top-level state without re-entering it
        let mut announce = !op.is_resumed();
        loop {
            let entered = if announce {
                self.enter(state, op).await
            } else {
                Ok(())
            };
            announce = true;
            if state.is_idle() {
                break;
            }

            let result = match entered {
                Ok(()) => self.act(state, op).await,
                Err(e) => Err(e),
            };
            let trigger = match result {
                Ok(trigger) => trigger,
                Err(e) => self.fault(op, e),
            };

            state = match self.shared.fire(trigger) {
                Ok(next) => next,
                Err(e) => {
                    error!("Release {} stuck in {:?}: {}", self.shared.release_name, state, e);
                    self.shared.reset();
                    ReleaseState::Initial
                }
            };
        }

        if op.reply.is_some() {
            op.respond(Err(ControllerError::Internal(format!(
                "{} finished without a result",
                op.request.event()
            ))));
        }
    }

    fn fault(&self, op: &mut Operation, e: ControllerError) -> Trigger {
        let message = e.to_string();
        self.context
            .observer
            .error_recorded(&self.shared.release_name, &message);
        op.error = Some(e);
        Trigger::Fault(message)
    }

    /// Persist and announce a state entry
    async fn enter(&self, state: ReleaseState, op: &Operation) -> Result<(), ControllerError> {
        let settled = state.is_idle() || state == ReleaseState::Error;
        let record = MachineRecord {
            release_name: self.shared.release_name.clone(),
            state,
            upgrade_cutoff: if settled { None } else { op.cutoff },
            upgrade_in_progress: !settled && op.diff.is_some(),
            request: if settled { None } else { Some(op.request.clone()) },
            updated_at: Utc::now(),
        };

        let saved = self.context.machines.save(&record).await;
        if state.is_idle() {
            self.shared.set_dormant(op.release_deleted);
        }
        self.shared.state_tx.send_replace(state);
        self.context
            .observer
            .state_entered(&self.shared.release_name, state);

        match saved {
            Ok(()) => Ok(()),
            Err(e) if settled => {
                error!(
                    "Could not persist state {:?} of release {}: {}",
                    state, self.shared.release_name, e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Entry action of a state, returns the trigger leaving it
    async fn act(&self, state: ReleaseState, op: &mut Operation) -> Result<Trigger, ControllerError> {
        use ReleaseState as S;

        let name = self.shared.release_name.as_str();
        let operations = &self.context.operations;
        let strategy = &self.context.strategy;

        match state {
            S::Install | S::Upgrade | S::Rollback => {
                let Some(from) = op.resumed_from.filter(|_| state == op.request.replay_state())
                else {
                    return Ok(Trigger::Done);
                };
                let recovery = operations.recover_interrupted_upgrade(name).await?;
                if settled_before_restart(from, &recovery) {
                    info!(
                        "{} of {} was decided in state {:?} before the restart, not replaying it",
                        op.request.event(),
                        name,
                        from
                    );
                    return Ok(Trigger::Settled);
                }
                Ok(Trigger::Done)
            }
            S::InstallInstall => {
                let release = match (&op.rollback, &op.request) {
                    (Some(plan), _) => operations.install_from_release(plan.target()).await?,
                    (None, OperationRequest::Install(request)) => operations.install(request).await?,
                    _ => return Err(op.mismatch(state)),
                };
                op.respond(Ok(release));
                Ok(Trigger::Done)
            }
            S::UpgradeStart => {
                let (diff, timeout_millis) = match (&op.rollback, &op.request) {
                    (Some(plan), OperationRequest::Rollback(request)) => (
                        operations.create_rollback_report(plan.target()).await?,
                        request.timeout_millis,
                    ),
                    (None, OperationRequest::Upgrade(request)) => (
                        operations.create_upgrade_report(request).await?,
                        request.timeout_millis,
                    ),
                    _ => return Err(op.mismatch(state)),
                };
                op.timeout_millis = timeout_millis.unwrap_or_else(|| {
                    self.context.options.default_upgrade_timeout.as_millis() as u64
                });
                op.diff = Some(diff);
                Ok(Trigger::Done)
            }
            S::UpgradeDeployTargetApps => {
                let failed = {
                    let diff = op.diff_mut()?;
                    strategy.deploy_apps(diff).await?;
                    diff.candidate.is(StatusCode::Failed)
                };
                let now = Utc::now();
                if failed {
                    op.last_health = Some(false);
                    op.cutoff = Some(now);
                } else {
                    op.cutoff = Some(match op.resumed_cutoff.take() {
                        Some(cutoff) => cutoff,
                        None => cutoff_after(now, op.timeout_millis),
                    });
                }
                Ok(Trigger::Done)
            }
            S::UpgradeWaitTargetApps => self.wait(op).await,
            S::UpgradeCheckTargetApps => {
                let diff = op.diff_mut()?;
                let healthy = strategy.check_status(&diff.candidate).await?;
                op.last_health = Some(healthy);
                Ok(Trigger::Done)
            }
            S::UpgradeDeployTargetAppsSucceed => {
                let rollback = op.is_rollback();
                strategy.promote(op.diff_mut()?, rollback).await?;
                Ok(Trigger::Done)
            }
            S::UpgradeDeleteSourceApps => {
                strategy.delete_source(op.diff_mut()?).await?;
                Ok(Trigger::Done)
            }
            S::UpgradeDeployTargetAppsFailed => {
                op.verdict = Verdict::TimedOut;
                Ok(Trigger::Done)
            }
            S::UpgradeCancel => {
                let (verdict, timeout_millis) = (op.verdict, op.timeout_millis);
                strategy.cancel(op.diff_mut()?, verdict, timeout_millis).await?;
                Ok(Trigger::Done)
            }
            S::RollbackStart => {
                let OperationRequest::Rollback(request) = &op.request else {
                    return Err(op.mismatch(state));
                };
                let plan = operations.resolve_rollback(request).await?;
                let trigger = match &plan {
                    RollbackPlan::Install { target } => {
                        info!("Rolling back to {} through a fresh install", target.label());
                        Trigger::RollbackInstall
                    }
                    RollbackPlan::Upgrade { target } => {
                        info!("Rolling back to {} through an upgrade", target.label());
                        Trigger::RollbackUpgrade
                    }
                };
                // Replays roll back to the version resolved here
                if let OperationRequest::Rollback(request) = &mut op.request {
                    request.version = plan.target().version;
                }
                op.rollback = Some(plan);
                Ok(trigger)
            }
            S::Delete | S::Scale => Ok(Trigger::Done),
            S::DeleteDelete => {
                let OperationRequest::Delete { properties, .. } = &op.request else {
                    return Err(op.mismatch(state));
                };
                let release = operations.delete(name, properties).await?;
                op.release_deleted = release.is(StatusCode::Deleted);
                op.respond(Ok(release));
                Ok(Trigger::Done)
            }
            S::ScaleScale => {
                let OperationRequest::Scale { request, .. } = &op.request else {
                    return Err(op.mismatch(state));
                };
                let release = operations.scale(name, request).await?;
                op.respond(Ok(release));
                Ok(Trigger::Done)
            }
            S::Error => {
                let error = op.error.take().unwrap_or_else(|| {
                    ControllerError::Internal(
                        self.shared
                            .fsm_error()
                            .unwrap_or_else(|| "unrecorded failure".to_string()),
                    )
                });
                op.respond(Err(error));
                Ok(Trigger::Done)
            }
            S::Initial => Ok(Trigger::Done),
        }
    }

    /// The only blocking node: sleeps between health checks until the
    /// candidate settles, the cutoff passes or a cancel arrives
    async fn wait(&self, op: &mut Operation) -> Result<Trigger, ControllerError> {
        let candidate = op.diff_mut()?.candidate.clone();
        op.respond(Ok(candidate));

        let cutoff = op.cutoff.unwrap_or_else(Utc::now);
        let mut outcome = wait_outcome(
            op.last_health,
            cutoff,
            Utc::now(),
            self.shared.cancel_requested(),
        );

        if outcome == WaitOutcome::Recheck && op.last_health.is_some() {
            tokio::select! {
                _ = tokio::time::sleep(self.context.options.health_check_interval) => {}
                _ = self.shared.cancel.notified() => {}
            }
            if self.shared.cancel_requested() {
                outcome = WaitOutcome::Cancelled;
            }
        }

        Ok(match outcome {
            WaitOutcome::Healthy => Trigger::TargetsHealthy,
            WaitOutcome::Failed => Trigger::TargetsFailed,
            WaitOutcome::Recheck => Trigger::RecheckTargets,
            WaitOutcome::Cancelled => {
                info!("Upgrade of {} cancelled", self.shared.release_name);
                op.verdict = Verdict::Cancelled;
                Trigger::Event(ReleaseEvent::UpgradeCancel)
            }
        })
    }
}

/// An upgrade interrupted after its health decision is finished by recovery
/// instead of being attempted again. A promotion that never reached the
/// store is the exception: its candidate was reverted and the request runs
/// again.
fn settled_before_restart(from: ReleaseState, recovery: &Recovery) -> bool {
    use ReleaseState as S;

    match from {
        S::UpgradeDeployTargetAppsFailed | S::UpgradeCancel => true,
        S::UpgradeDeployTargetAppsSucceed | S::UpgradeDeleteSourceApps => {
            !matches!(recovery, Recovery::Reverted(_))
        }
        _ => false,
    }
}

fn cutoff_after(now: DateTime<Utc>, timeout_millis: u64) -> DateTime<Utc> {
    chrono::Duration::from_std(Duration::from_millis(timeout_millis))
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
