// ── Provisioning session ──
//
// Acquires network credentials (and optionally a controller address) over
// the provisioning transport. At most one session is live at a time; a
// fresh `begin` aborts any live one. Every session carries a generation
// number so a deadline timer from an older session can never fail a newer
// one.

pub mod credentials;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use credentials::{ParsedCredentials, RawCredentials};

use crate::config::ConfigDelta;
use crate::error::{CoreError, StorageError};
use crate::hal::ProvisioningTransport;
use crate::store::ConfigStore;
use crate::work::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProvisioningState {
    Idle,
    SessionStarted,
    CredentialsReceived,
    Succeeded,
    Failed,
}

impl ProvisioningState {
    /// A session is live or its result is not yet applied.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::SessionStarted | Self::CredentialsReceived | Self::Succeeded
        )
    }
}

/// Notification from the provisioning transport.
#[derive(Debug, Clone)]
pub enum ProvisioningEvent {
    Credentials(RawCredentials),
    /// The transport reported the delivered credentials as unusable.
    CredentialsRejected,
}

/// Published snapshot of the provisioning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningStatus {
    pub state: ProvisioningState,
    pub generation: u64,
    pub service_name: Option<String>,
    pub deadline: Option<Instant>,
    /// Parsed credentials awaiting link confirmation or commit. Kept on
    /// `Failed` only when the commit could not be saved.
    pub pending: Option<ParsedCredentials>,
    /// The commit job for this session has saved the pending config.
    pub committed: bool,
}

struct Slot {
    state: ProvisioningState,
    generation: u64,
    service_name: Option<String>,
    deadline: Option<Instant>,
    pending: Option<ParsedCredentials>,
    committed: bool,
    timer: Option<CancellationToken>,
}

impl Slot {
    fn status(&self) -> ProvisioningStatus {
        ProvisioningStatus {
            state: self.state,
            generation: self.generation,
            service_name: self.service_name.clone(),
            deadline: self.deadline,
            pending: self.pending.clone(),
            committed: self.committed,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.deadline = None;
    }
}

#[derive(Clone)]
pub struct ProvisioningSession {
    inner: Arc<ProvisioningInner>,
}

struct ProvisioningInner {
    transport: Arc<dyn ProvisioningTransport>,
    store: Arc<dyn ConfigStore>,
    work: WorkQueue,
    timeout: Duration,
    slot: Mutex<Slot>,
    status_tx: watch::Sender<ProvisioningStatus>,
}

impl ProvisioningSession {
    pub fn new(
        transport: Arc<dyn ProvisioningTransport>,
        store: Arc<dyn ConfigStore>,
        work: WorkQueue,
        timeout: Duration,
    ) -> Self {
        let slot = Slot {
            state: ProvisioningState::Idle,
            generation: 0,
            service_name: None,
            deadline: None,
            pending: None,
            committed: false,
            timer: None,
        };
        let (status_tx, _) = watch::channel(slot.status());
        Self {
            inner: Arc::new(ProvisioningInner {
                transport,
                store,
                work,
                timeout,
                slot: Mutex::new(slot),
                status_tx,
            }),
        }
    }

    /// Start advertising. Aborts any live session first.
    ///
    /// Fails with [`CoreError::ProvisioningUnavailable`] if the transport
    /// cannot start; the state is then left unchanged.
    pub fn begin(
        &self,
        service_name: &str,
        proof_of_possession: &SecretString,
    ) -> Result<(), CoreError> {
        if self.is_in_progress() {
            info!("Restarting provisioning, aborting the live session");
            self.abort();
        }

        // A queued transport stop from an older session is skipped once the
        // generation has moved on.
        let generation = {
            let mut slot = self.inner.slot.lock();
            slot.cancel_timer();
            slot.generation += 1;
            self.publish(&slot);
            slot.generation
        };
        self.inner
            .transport
            .start(service_name, proof_of_possession)
            .map_err(|source| CoreError::ProvisioningUnavailable { source })?;

        let deadline = Instant::now() + self.inner.timeout;
        let timer = CancellationToken::new();
        {
            let mut slot = self.inner.slot.lock();
            slot.state = ProvisioningState::SessionStarted;
            slot.service_name = Some(service_name.to_owned());
            slot.deadline = Some(deadline);
            slot.pending = None;
            slot.committed = false;
            slot.timer = Some(timer.clone());
            self.publish(&slot);
        }

        let session = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => session.expire(generation),
            }
        });

        info!(
            service_name,
            timeout_secs = self.inner.timeout.as_secs(),
            "Provisioning session started"
        );
        Ok(())
    }

    /// Tear down any live session and return to Idle. Idempotent.
    pub fn abort(&self) {
        let previous = {
            let mut slot = self.inner.slot.lock();
            if slot.state == ProvisioningState::Idle {
                return;
            }
            let previous = slot.state;
            slot.cancel_timer();
            slot.generation += 1;
            slot.state = ProvisioningState::Idle;
            slot.service_name = None;
            slot.pending = None;
            slot.committed = false;
            self.publish(&slot);
            previous
        };

        if matches!(
            previous,
            ProvisioningState::SessionStarted | ProvisioningState::CredentialsReceived
        ) {
            if let Err(e) = self.inner.transport.stop() {
                warn!(error = %e, "Provisioning transport stop failed");
            }
        }
        info!(from = %previous, "Provisioning aborted");
    }

    /// Record credentials delivered by the transport.
    pub fn on_credentials(&self, raw: &RawCredentials) {
        let mut slot = self.inner.slot.lock();
        if !matches!(
            slot.state,
            ProvisioningState::SessionStarted | ProvisioningState::CredentialsReceived
        ) {
            warn!(state = %slot.state, "Ignoring credentials outside a provisioning session");
            return;
        }

        let parsed = credentials::parse(raw);
        info!(
            network = %parsed.credentials.name,
            controller_address = parsed.controller_address.as_deref().unwrap_or("<none>"),
            "Provisioning credentials received"
        );
        slot.pending = Some(parsed);
        slot.state = ProvisioningState::CredentialsReceived;
        self.publish(&slot);
    }

    /// The transport (or link) reported the credentials as unusable.
    pub fn on_credentials_rejected(&self) {
        let generation = {
            let mut slot = self.inner.slot.lock();
            if !matches!(
                slot.state,
                ProvisioningState::SessionStarted | ProvisioningState::CredentialsReceived
            ) {
                return;
            }
            slot.cancel_timer();
            slot.state = ProvisioningState::Failed;
            slot.pending = None;
            self.publish(&slot);
            slot.generation
        };
        warn!("Provisioning credentials rejected");
        self.defer_transport_stop(generation);
    }

    pub fn on_provisioning_event(&self, event: ProvisioningEvent) {
        match event {
            ProvisioningEvent::Credentials(raw) => self.on_credentials(&raw),
            ProvisioningEvent::CredentialsRejected => self.on_credentials_rejected(),
        }
    }

    /// The config change the pending credentials amount to, if any.
    pub fn pending_delta(&self) -> Option<ConfigDelta> {
        self.inner
            .slot
            .lock()
            .pending
            .as_ref()
            .map(ParsedCredentials::to_delta)
    }

    /// The link came up with the pending credentials: commit them.
    ///
    /// The store write is queued, so readers may still see the old config
    /// for a while after this returns; `committed` is published once the
    /// write returns. A failed write moves the session to `Failed` with the
    /// credentials still pending. Returns `false` if there was nothing to
    /// commit.
    pub fn mark_succeeded(&self) -> bool {
        let (delta, generation) = {
            let mut slot = self.inner.slot.lock();
            if slot.state != ProvisioningState::CredentialsReceived {
                return false;
            }
            let Some(delta) = slot.pending.as_ref().map(ParsedCredentials::to_delta) else {
                return false;
            };
            slot.cancel_timer();
            slot.state = ProvisioningState::Succeeded;
            self.publish(&slot);
            (delta, slot.generation)
        };

        info!("Provisioning succeeded, committing credentials");
        let store = Arc::clone(&self.inner.store);
        let session = self.clone();
        self.inner.work.defer("provisioning commit", move || {
            let result = commit(store.as_ref(), &delta);
            session.on_committed(generation, result);
        });
        self.defer_transport_stop(generation);
        true
    }

    /// The orchestrator has acted on a settled session (`Succeeded` or
    /// `Failed`); return to Idle.
    pub fn finish(&self) {
        let mut slot = self.inner.slot.lock();
        if !matches!(
            slot.state,
            ProvisioningState::Succeeded | ProvisioningState::Failed
        ) {
            return;
        }
        slot.state = ProvisioningState::Idle;
        slot.service_name = None;
        slot.pending = None;
        slot.committed = false;
        self.publish(&slot);
        debug!("Provisioning finished");
    }

    pub fn is_in_progress(&self) -> bool {
        self.current_state().is_in_progress()
    }

    pub fn current_state(&self) -> ProvisioningState {
        self.inner.status_tx.borrow().state
    }

    pub fn status(&self) -> ProvisioningStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProvisioningStatus> {
        self.inner.status_tx.subscribe()
    }

    fn expire(&self, generation: u64) {
        {
            let mut slot = self.inner.slot.lock();
            if slot.generation != generation
                || !matches!(
                    slot.state,
                    ProvisioningState::SessionStarted | ProvisioningState::CredentialsReceived
                )
            {
                return;
            }
            slot.cancel_timer();
            slot.state = ProvisioningState::Failed;
            slot.pending = None;
            self.publish(&slot);
        }
        warn!("Provisioning session timed out");
        self.defer_transport_stop(generation);
    }

    fn on_committed(&self, generation: u64, result: Result<(), StorageError>) {
        let mut slot = self.inner.slot.lock();
        if slot.generation != generation || slot.state != ProvisioningState::Succeeded {
            debug!("discarding commit result of a superseded session");
            return;
        }
        match result {
            Ok(()) => slot.committed = true,
            Err(e) => {
                error!(error = %e, "Failed to persist provisioned configuration");
                slot.state = ProvisioningState::Failed;
            }
        }
        self.publish(&slot);
    }

    /// Queue a transport stop for the session `generation`. The slot stays
    /// locked across the stop so a concurrent `begin` starts after it.
    fn defer_transport_stop(&self, generation: u64) {
        let session = self.clone();
        self.inner.work.defer("provisioning transport stop", move || {
            let slot = session.inner.slot.lock();
            if slot.generation != generation {
                debug!("transport already taken over by a newer session");
                return;
            }
            if let Err(e) = session.inner.transport.stop() {
                warn!(error = %e, "Provisioning transport stop failed");
            }
        });
    }

    fn publish(&self, slot: &Slot) {
        let next = slot.status();
        self.inner.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.state != next.state {
                debug!(from = %current.state, to = %next.state, "provisioning state changed");
            }
            *current = next;
            true
        });
    }
}

fn commit(store: &dyn ConfigStore, delta: &ConfigDelta) -> Result<(), StorageError> {
    let mut config = store.load();
    config.apply(delta);
    store.save(&config)?;
    info!(network = %config.network_name, "Provisioned configuration saved");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;
    use crate::config::{HardwareId, NetworkCredentials};
    use crate::error::HalError;
    use crate::store::MemoryConfigStore;

    const TIMEOUT: Duration = Duration::from_secs(600);

    #[derive(Default)]
    struct FakeTransport {
        starts: AtomicUsize,
        stops: AtomicUsize,
        broken: AtomicBool,
    }

    impl ProvisioningTransport for FakeTransport {
        fn start(&self, _service_name: &str, _pop: &SecretString) -> Result<(), HalError> {
            if self.broken.load(Ordering::Relaxed) {
                return Err(HalError::Unavailable {
                    device: "ble",
                    reason: "controller init failed".into(),
                });
            }
            self.starts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn stop(&self) -> Result<(), HalError> {
            self.stops.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Fixture {
        session: ProvisioningSession,
        transport: Arc<FakeTransport>,
        store: Arc<MemoryConfigStore>,
        work: WorkQueue,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(MemoryConfigStore::new(HardwareId::new([0, 0, 0, 1, 2, 3])));
        let (work, worker) = WorkQueue::new();
        tokio::spawn(worker.run(CancellationToken::new()));
        let session = ProvisioningSession::new(
            Arc::clone(&transport) as Arc<dyn ProvisioningTransport>,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
            work.clone(),
            TIMEOUT,
        );
        Fixture {
            session,
            transport,
            store,
            work,
        }
    }

    fn pop() -> SecretString {
        SecretString::from("abcd1234".to_owned())
    }

    #[tokio::test(start_paused = true)]
    async fn begin_starts_transport_and_sets_deadline() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();

        let status = f.session.status();
        assert_eq!(status.state, ProvisioningState::SessionStarted);
        assert_eq!(status.service_name.as_deref(), Some("SmartLight_010203"));
        assert_eq!(status.deadline, Some(Instant::now() + TIMEOUT));
        assert_eq!(f.transport.starts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_transport_leaves_state_idle() {
        let f = fixture();
        f.transport.broken.store(true, Ordering::Relaxed);

        let err = f.session.begin("SmartLight_010203", &pop()).unwrap_err();
        assert!(matches!(err, CoreError::ProvisioningUnavailable { .. }));
        assert_eq!(f.session.current_state(), ProvisioningState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn session_times_out() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();

        tokio::time::sleep(TIMEOUT + Duration::from_secs(1)).await;
        f.work.drain().await;

        assert_eq!(f.session.current_state(), ProvisioningState::Failed);
        assert_eq!(f.transport.stops.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_deadline_does_not_fail_newer_session() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        let first = f.session.status().generation;

        tokio::time::sleep(Duration::from_secs(300)).await;
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        assert!(f.session.status().generation > first);
        assert_eq!(f.transport.stops.load(Ordering::Relaxed), 1);

        // Past the first deadline, before the second.
        tokio::time::sleep(Duration::from_secs(400)).await;
        assert_eq!(f.session.current_state(), ProvisioningState::SessionStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_is_idempotent() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();

        f.session.abort();
        let after_first = f.session.status();
        f.session.abort();

        assert_eq!(f.session.status(), after_first);
        assert_eq!(after_first.state, ProvisioningState::Idle);
        assert_eq!(f.transport.stops.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_outside_a_session_are_ignored() {
        let f = fixture();
        f.session
            .on_credentials(&RawCredentials::new("HomeNet", "mypass"));
        assert_eq!(f.session.current_state(), ProvisioningState::Idle);
        assert!(f.session.pending_delta().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_commits_parsed_credentials() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        f.session.on_credentials(&RawCredentials::new(
            "HomeNet",
            "mypass|ws:ws://controller.local:81/devices",
        ));
        assert_eq!(
            f.session.current_state(),
            ProvisioningState::CredentialsReceived
        );
        assert_eq!(
            f.session.pending_delta().unwrap(),
            ConfigDelta {
                network: Some(NetworkCredentials::new("HomeNet", "mypass")),
                controller_address: Some("ws://controller.local:81/devices".into()),
                device_id: None,
            }
        );

        assert!(f.session.mark_succeeded());
        assert!(!f.session.mark_succeeded());
        f.work.drain().await;
        assert!(f.session.status().committed);

        let stored = f.store.stored().unwrap();
        assert_eq!(stored.network_name, "HomeNet");
        assert_eq!(stored.network_secret.expose_secret(), "mypass");
        assert_eq!(stored.controller_address, "ws://controller.local:81/devices");
        assert_eq!(stored.device_id, "smartlight_010203");
        assert_eq!(f.transport.stops.load(Ordering::Relaxed), 1);

        f.session.finish();
        assert_eq!(f.session.current_state(), ProvisioningState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_commit_fails_the_session_and_keeps_credentials() {
        let f = fixture();
        f.store.set_read_only(true);
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        f.session.on_credentials(&RawCredentials::new(
            "HomeNet",
            "mypass|ws:ws://controller.local/ws",
        ));

        assert!(f.session.mark_succeeded());
        f.work.drain().await;

        let status = f.session.status();
        assert_eq!(status.state, ProvisioningState::Failed);
        assert!(!status.committed);
        assert_eq!(
            f.session.pending_delta().unwrap().controller_address.as_deref(),
            Some("ws://controller.local/ws")
        );
        assert_eq!(f.store.save_count(), 0);

        f.session.finish();
        assert_eq!(f.session.current_state(), ProvisioningState::Idle);
        assert!(f.session.pending_delta().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn commit_of_an_aborted_session_is_discarded() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        f.session
            .on_credentials(&RawCredentials::new("HomeNet", "mypass"));
        assert!(f.session.mark_succeeded());
        f.session.abort();
        f.work.drain().await;

        let status = f.session.status();
        assert_eq!(status.state, ProvisioningState::Idle);
        assert!(!status.committed);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_stop_spares_a_restarted_transport() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        f.session
            .on_provisioning_event(ProvisioningEvent::CredentialsRejected);
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        f.work.drain().await;

        assert_eq!(f.session.current_state(), ProvisioningState::SessionStarted);
        assert_eq!(f.transport.starts.load(Ordering::Relaxed), 2);
        assert_eq!(f.transport.stops.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_fails_the_session() {
        let f = fixture();
        f.session.begin("SmartLight_010203", &pop()).unwrap();
        f.session
            .on_provisioning_event(ProvisioningEvent::CredentialsRejected);
        f.work.drain().await;

        assert_eq!(f.session.current_state(), ProvisioningState::Failed);
        assert_eq!(f.transport.stops.load(Ordering::Relaxed), 1);
    }
}
