// ── Orchestrator ──
//
// Top-level owner of the device. Runs the reconciliation loop: every tick
// (and on every component status change) it snapshots link, provisioning
// and session state, asks `policy::plan` what to do, and applies the
// resulting directives. It is the only place that issues cross-component
// commands and the only writer of the authoritative `DeviceConfig`.

pub mod policy;

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde::Serialize;
use smartlight_api::SessionTarget;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use policy::{Directive, Mode, PolicyMemory, Snapshot};

use crate::config::{ConfigDelta, DeviceConfig, HardwareId, RuntimeSettings};
use crate::error::CoreError;
use crate::hal::{ActuatorStatus, Platform, PlatformEvents, ResetInput};
use crate::link::{LinkEvent, LinkState, LinkSupervisor};
use crate::provisioning::{ProvisioningEvent, ProvisioningSession, ProvisioningState};
use crate::reset::{FactoryResetRequested, ResetWatchdog};
use crate::session::{CommandDispatcher, SessionManager, SessionState};
use crate::store::ConfigStore;
use crate::work::{WorkQueue, WorkQueueWorker};

/// Why [`Orchestrator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Cancelled through [`Orchestrator::shutdown`].
    Shutdown,
    /// A factory reset wiped the config; the device should restart.
    Restart,
}

// ── Status report ────────────────────────────────────────────────────

/// Point-in-time view for the status surface. Never carries secrets.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub mode: Mode,
    pub device_id: String,
    pub network_name: String,
    pub controller_address: String,
    pub configured: bool,
    pub link: LinkReport,
    pub provisioning: ProvisioningState,
    pub session: SessionReport,
    pub servo1: ActuatorStatus,
    pub servo2: ActuatorStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReport {
    pub state: LinkState,
    pub address: Option<IpAddr>,
    pub retries: u32,
    pub access_point: bool,
    pub peers: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub state: SessionState,
    pub target: Option<String>,
    /// Seconds since the last confirmed liveness signal.
    pub last_liveness_secs: Option<u64>,
    pub failures: u32,
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// Cheaply cloneable handle; all clones drive the same device.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    settings: RuntimeSettings,
    hardware_id: HardwareId,
    store: Arc<dyn ConfigStore>,
    config: ArcSwap<DeviceConfig>,
    link: LinkSupervisor,
    provisioning: ProvisioningSession,
    session: SessionManager,
    reset_input: Arc<dyn ResetInput>,
    work: WorkQueue,
    worker: Mutex<Option<WorkQueueWorker>>,
    events: Mutex<Option<PlatformEvents>>,
    mode_tx: watch::Sender<Mode>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(platform: Platform, store: Arc<dyn ConfigStore>, settings: RuntimeSettings) -> Self {
        let (work, worker) = WorkQueue::new();

        let link = LinkSupervisor::new(platform.link, &settings.link, work.clone());
        let provisioning = ProvisioningSession::new(
            platform.provisioning,
            Arc::clone(&store),
            work.clone(),
            settings.provisioning.timeout,
        );
        let dispatcher = CommandDispatcher::new(platform.actuators, platform.lighting);
        let session = SessionManager::new(
            platform.connector,
            dispatcher,
            link.subscribe(),
            settings.session.clone(),
        );
        let (mode_tx, _) = watch::channel(Mode::Setup);

        Self {
            inner: Arc::new(OrchestratorInner {
                hardware_id: platform.hardware_id,
                store,
                config: ArcSwap::from_pointee(DeviceConfig::empty()),
                link,
                provisioning,
                session,
                reset_input: platform.reset,
                work,
                worker: Mutex::new(Some(worker)),
                events: Mutex::new(Some(platform.events)),
                mode_tx,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
                settings,
            }),
        }
    }

    /// Initialise storage, load the config, and reconcile until shut down
    /// or reset. Can only run once per instance.
    ///
    /// Storage initialisation failure is fatal and returned as an error.
    pub async fn run(&self) -> Result<RunOutcome, CoreError> {
        let (worker, events) = match (self.inner.worker.lock().take(), self.inner.events.lock().take()) {
            (Some(worker), Some(events)) => (worker, events),
            _ => return Err(CoreError::Internal("orchestrator already ran".into())),
        };

        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || store.init())
            .await
            .map_err(|e| CoreError::Internal(format!("storage init panicked: {e}")))??;

        let loaded = self.load_config().await?;
        info!(
            hardware_id = %self.inner.hardware_id,
            device_id = %loaded.device_id,
            configured = loaded.valid(),
            "Configuration loaded"
        );
        self.inner.config.store(Arc::new(loaded));

        let cancel = self.inner.cancel.child_token();
        let (reset_tx, mut reset_rx) = mpsc::channel(1);
        self.spawn_background_tasks(worker, events, reset_tx, &cancel);

        let outcome = self.reconcile_loop(&cancel, &mut reset_rx).await;

        if outcome == RunOutcome::Shutdown {
            self.inner.session.stop();
            self.inner.provisioning.abort();
            self.inner.link.stop();
            self.inner.work.drain().await;
        }
        cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.inner.task_handles.lock());
        for handle in handles {
            let _ = handle.await;
        }

        info!(?outcome, "Orchestrator stopped");
        Ok(outcome)
    }

    /// Stop the reconciliation loop; `run` returns [`RunOutcome::Shutdown`].
    pub fn shutdown(&self) {
        debug!("orchestrator shutdown requested");
        self.inner.cancel.cancel();
    }

    // ── Configuration surface ────────────────────────────────────────

    /// Merge `delta` into the config, persist it, and make it
    /// authoritative. A changed controller address ends the current
    /// session; changed network credentials restart the link.
    pub async fn update_config(&self, delta: ConfigDelta) -> Result<Arc<DeviceConfig>, CoreError> {
        let current = self.inner.config.load_full();
        let mut next = (*current).clone();
        next.apply(&delta);
        next.ensure_device_id(self.inner.hardware_id);

        let store = Arc::clone(&self.inner.store);
        let to_save = next.clone();
        tokio::task::spawn_blocking(move || store.save(&to_save))
            .await
            .map_err(|e| CoreError::Internal(format!("config save panicked: {e}")))??;

        let next = Arc::new(next);
        self.inner.config.store(Arc::clone(&next));
        info!(
            network = %next.network_name,
            controller_address = %next.controller_address,
            "Configuration updated"
        );

        if next.controller_address != current.controller_address {
            self.inner.session.stop();
        }
        let network_changed = next.network_name != current.network_name
            || next.network_secret.expose_secret() != current.network_secret.expose_secret();
        if network_changed {
            self.inner.link.stop();
        }
        Ok(next)
    }

    /// Set the controller address (and optionally the device id).
    /// The address must be non-empty and parse as a session target.
    pub async fn set_controller_address(
        &self,
        address: &str,
        device_id: Option<&str>,
    ) -> Result<Arc<DeviceConfig>, CoreError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(CoreError::ValidationFailed {
                message: "controller address is required".into(),
            });
        }
        SessionTarget::parse(address).map_err(|e| CoreError::InvalidControllerAddress {
            address: address.to_owned(),
            reason: e.to_string(),
        })?;

        self.update_config(ConfigDelta {
            controller_address: Some(address.to_owned()),
            device_id: device_id.filter(|id| !id.is_empty()).map(str::to_owned),
            ..ConfigDelta::default()
        })
        .await
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> Arc<DeviceConfig> {
        self.inner.config.load_full()
    }

    pub fn mode(&self) -> Mode {
        *self.inner.mode_tx.borrow()
    }

    pub fn mode_changes(&self) -> WatchStream<Mode> {
        WatchStream::new(self.inner.mode_tx.subscribe())
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<Mode> {
        self.inner.mode_tx.subscribe()
    }

    pub fn link(&self) -> &LinkSupervisor {
        &self.inner.link
    }

    pub fn provisioning(&self) -> &ProvisioningSession {
        &self.inner.provisioning
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        self.inner.session.dispatcher()
    }

    pub fn status(&self) -> StatusReport {
        let config = self.config();
        let link = self.inner.link.status();
        let session = self.inner.session.status();
        let dispatcher = self.dispatcher();

        StatusReport {
            mode: self.mode(),
            device_id: config.device_id.clone(),
            network_name: config.network_name.clone(),
            controller_address: config.controller_address.clone(),
            configured: config.valid(),
            link: LinkReport {
                state: link.state,
                address: link.address,
                retries: link.retries,
                access_point: link.access_point,
                peers: link.peers,
            },
            provisioning: self.inner.provisioning.current_state(),
            session: SessionReport {
                state: session.state,
                target: session.target,
                last_liveness_secs: session.last_liveness.map(|at| at.elapsed().as_secs()),
                failures: session.failures,
            },
            servo1: dispatcher.actuator_status(1),
            servo2: dispatcher.actuator_status(2),
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    async fn reconcile_loop(
        &self,
        cancel: &CancellationToken,
        reset_rx: &mut mpsc::Receiver<FactoryResetRequested>,
    ) -> RunOutcome {
        let mut memory = PolicyMemory::default();
        let mut link_rx = self.inner.link.subscribe();
        let mut provisioning_rx = self.inner.provisioning.subscribe();
        let mut session_rx = self.inner.session.subscribe();
        let mut interval = tokio::time::interval(self.inner.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u32 = 0;
        let mut reset_requested = false;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return RunOutcome::Shutdown,
                Some(_) = reset_rx.recv() => reset_requested = true,
                _ = interval.tick() => {
                    ticks = ticks.wrapping_add(1);
                    let every = self.inner.settings.status_log_every;
                    if every > 0 && ticks % every == 0 {
                        self.log_status();
                    }
                }
                Ok(()) = link_rx.changed() => {}
                Ok(()) = provisioning_rx.changed() => {}
                Ok(()) = session_rx.changed() => {}
            }

            let snapshot = self.snapshot(reset_requested);
            for directive in policy::plan(&snapshot, &mut memory, self.inner.settings.reload_grace) {
                if let Some(outcome) = self.apply(directive, &mut memory).await {
                    return outcome;
                }
            }
            self.publish_mode();
        }
    }

    fn snapshot(&self, reset_requested: bool) -> Snapshot {
        Snapshot {
            now: Instant::now(),
            config: self.inner.config.load_full(),
            link: self.inner.link.status(),
            provisioning: self.inner.provisioning.status(),
            session: self.inner.session.status(),
            reset_requested,
        }
    }

    async fn apply(&self, directive: Directive, memory: &mut PolicyMemory) -> Option<RunOutcome> {
        debug!(?directive, "applying directive");
        match directive {
            Directive::FactoryReset => {
                self.factory_reset().await;
                return Some(RunOutcome::Restart);
            }
            Directive::MarkProvisioned => {
                self.inner.provisioning.mark_succeeded();
            }
            Directive::ReloadConfig => self.reload_provisioned_config(memory).await,
            Directive::AdoptConfig(delta) => self.adopt_unsaved_config(&delta),
            Directive::FinishProvisioning => self.inner.provisioning.finish(),
            Directive::StartLink(credentials) => self.inner.link.start(credentials),
            Directive::StopLink => self.inner.link.stop(),
            Directive::BeginProvisioning => self.begin_provisioning(),
            Directive::StopSession => self.inner.session.stop(),
            Directive::StartSession => {
                if let Err(e) = self.inner.session.start(self.inner.config.load_full()) {
                    warn!(error = %e, "Cannot start controller session");
                }
            }
        }
        None
    }

    fn begin_provisioning(&self) {
        let service_name = self.inner.hardware_id.service_name();
        let settings = &self.inner.settings.provisioning;
        if let Err(e) = self
            .inner
            .provisioning
            .begin(&service_name, &settings.proof_of_possession)
        {
            warn!(error = %e, "Provisioning unavailable, opening setup access point");
            self.inner
                .link
                .start_access_point(settings.access_point.clone());
        }
    }

    /// Adopt the committed config once the store reflects every field the
    /// provisioned credentials set. Until the write is visible the store
    /// still returns the old config; that is "not ready yet", retried next
    /// tick.
    async fn reload_provisioned_config(&self, memory: &mut PolicyMemory) {
        let expected = self.inner.provisioning.pending_delta();
        let loaded = match self.load_config().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Reloading configuration failed");
                return;
            }
        };

        let landed = expected.as_ref().is_none_or(|delta| loaded.reflects(delta));
        if !landed {
            debug!("provisioned configuration not yet persisted");
            return;
        }

        info!(
            network = %loaded.network_name,
            configured = loaded.valid(),
            "Provisioned configuration loaded"
        );
        let credentials = loaded.credentials();
        self.inner.config.store(Arc::new(loaded));
        self.inner.provisioning.finish();
        memory.reload_due = None;
        if let Some(credentials) = credentials {
            self.inner.link.start(credentials);
        }
    }

    /// The commit failed after the link joined: keep running on the
    /// provisioned settings without persisting them.
    fn adopt_unsaved_config(&self, delta: &ConfigDelta) {
        let mut next = (*self.inner.config.load_full()).clone();
        next.apply(delta);
        next.ensure_device_id(self.inner.hardware_id);
        warn!(
            network = %next.network_name,
            configured = next.valid(),
            "Provisioned configuration could not be saved, running from memory"
        );
        self.inner.config.store(Arc::new(next));
    }

    async fn factory_reset(&self) {
        warn!("Factory reset: wiping configuration");
        self.inner.session.stop();
        self.inner.provisioning.abort();
        self.inner.link.stop();

        let empty = DeviceConfig::empty();
        self.inner.config.store(Arc::new(empty.clone()));
        let store = Arc::clone(&self.inner.store);
        self.inner.work.defer("factory reset wipe", move || {
            if let Err(e) = store.save(&empty) {
                error!(error = %e, "Failed to wipe stored configuration");
            }
        });
        self.inner.work.drain().await;

        tokio::time::sleep(self.inner.settings.reset.restart_delay).await;
        info!("Factory reset complete, restart required");
    }

    fn publish_mode(&self) {
        let mode = policy::derive_mode(&self.snapshot(false));
        self.inner.mode_tx.send_if_modified(|current| {
            if *current == mode {
                return false;
            }
            info!(from = %current, to = %mode, "Mode changed");
            *current = mode;
            true
        });
    }

    fn log_status(&self) {
        let status = self.status();
        info!(
            mode = %status.mode,
            link = %status.link.state,
            address = ?status.link.address,
            provisioning = %status.provisioning,
            session = %status.session.state,
            "Status"
        );
    }

    async fn load_config(&self) -> Result<DeviceConfig, CoreError> {
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| CoreError::Internal(format!("config load panicked: {e}")))
    }

    // ── Background tasks ─────────────────────────────────────────────

    fn spawn_background_tasks(
        &self,
        worker: WorkQueueWorker,
        events: PlatformEvents,
        reset_tx: mpsc::Sender<FactoryResetRequested>,
        cancel: &CancellationToken,
    ) {
        let PlatformEvents {
            link: link_events,
            provisioning: provisioning_events,
        } = events;
        let mut handles = self.inner.task_handles.lock();

        handles.push(tokio::spawn(worker.run(cancel.clone())));
        handles.push(tokio::spawn(link_event_task(
            self.inner.link.clone(),
            link_events,
            cancel.clone(),
        )));
        handles.push(tokio::spawn(provisioning_event_task(
            self.inner.provisioning.clone(),
            provisioning_events,
            cancel.clone(),
        )));
        handles.push(ResetWatchdog::spawn(
            Arc::clone(&self.inner.reset_input),
            &self.inner.settings.reset,
            reset_tx,
            cancel.clone(),
        ));
        handles.push(tokio::spawn(liveness_task(
            self.inner.session.clone(),
            self.inner.settings.session.heartbeat_interval,
            cancel.clone(),
        )));
    }
}

async fn link_event_task(
    link: LinkSupervisor,
    mut rx: mpsc::UnboundedReceiver<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                link.on_link_event(event);
            }
        }
    }
}

async fn provisioning_event_task(
    provisioning: ProvisioningSession,
    mut rx: mpsc::UnboundedReceiver<ProvisioningEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                provisioning.on_provisioning_event(event);
            }
        }
    }
}

async fn liveness_task(
    session: SessionManager,
    period: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if session.is_active() {
                    if let Err(e) = session.send_liveness_signal().await {
                        debug!(error = %e, "liveness signal not delivered");
                    }
                }
            }
        }
    }
}
