// ── Link supervisor ──
//
// Tracks the wireless link through Idle → Connecting → Up, with a bounded
// reconnect budget before Failed. The state machine itself is pure
// (`LinkMachine`) and returns the driver calls it wants; `LinkSupervisor`
// publishes the resulting status on a watch channel and pushes the
// driver calls onto the work queue so event delivery never blocks.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{AccessPointConfig, LinkSettings, NetworkCredentials};
use crate::hal::LinkDriver;
use crate::work::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkState {
    Idle,
    Connecting,
    Up,
    Failed,
}

/// Notification from the link driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The radio finished starting in station mode.
    Started,
    Disconnected,
    AddressAcquired(IpAddr),
    /// A peer associated with the setup access point.
    PeerJoined(String),
    PeerLeft(String),
}

/// Published snapshot of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Reconnect attempts since the link was last Up.
    pub retries: u32,
    /// Network the link is started against.
    pub network: Option<String>,
    pub address: Option<IpAddr>,
    /// The setup access point is serving.
    pub access_point: bool,
    pub peers: u32,
}

#[derive(Debug)]
enum LinkAction {
    Start(NetworkCredentials),
    Connect,
    Stop,
    StartAccessPoint(AccessPointConfig),
}

// ── State machine ────────────────────────────────────────────────────

struct LinkMachine {
    max_retries: u32,
    state: LinkState,
    retries: u32,
    credentials: Option<NetworkCredentials>,
    address: Option<IpAddr>,
    access_point: bool,
    peers: u32,
}

impl LinkMachine {
    fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            state: LinkState::Idle,
            retries: 0,
            credentials: None,
            address: None,
            access_point: false,
            peers: 0,
        }
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            retries: self.retries,
            network: self.credentials.as_ref().map(|c| c.name.clone()),
            address: self.address,
            access_point: self.access_point,
            peers: self.peers,
        }
    }

    fn reset(&mut self) {
        self.state = LinkState::Idle;
        self.retries = 0;
        self.credentials = None;
        self.address = None;
        self.access_point = false;
        self.peers = 0;
    }

    fn is_running(&self) -> bool {
        self.state != LinkState::Idle || self.access_point
    }

    fn start(&mut self, credentials: NetworkCredentials) -> Vec<LinkAction> {
        let live = matches!(self.state, LinkState::Connecting | LinkState::Up);
        if live && self.credentials.as_ref() == Some(&credentials) {
            return Vec::new();
        }

        let mut actions = Vec::with_capacity(2);
        if self.is_running() {
            actions.push(LinkAction::Stop);
        }
        self.reset();
        self.state = LinkState::Connecting;
        self.credentials = Some(credentials.clone());
        actions.push(LinkAction::Start(credentials));
        actions
    }

    fn stop(&mut self) -> Vec<LinkAction> {
        if !self.is_running() {
            return Vec::new();
        }
        self.reset();
        vec![LinkAction::Stop]
    }

    fn start_access_point(&mut self, config: AccessPointConfig) -> Vec<LinkAction> {
        if self.access_point {
            return Vec::new();
        }
        let mut actions = Vec::with_capacity(2);
        if self.is_running() {
            actions.push(LinkAction::Stop);
        }
        self.reset();
        self.access_point = true;
        actions.push(LinkAction::StartAccessPoint(config));
        actions
    }

    fn on_event(&mut self, event: LinkEvent) -> Vec<LinkAction> {
        match event {
            LinkEvent::Started if self.state == LinkState::Connecting => vec![LinkAction::Connect],
            LinkEvent::Disconnected
                if matches!(self.state, LinkState::Connecting | LinkState::Up) =>
            {
                self.address = None;
                if self.retries < self.max_retries {
                    self.retries += 1;
                    self.state = LinkState::Connecting;
                    debug!(
                        attempt = self.retries,
                        max = self.max_retries,
                        "link dropped, reconnecting"
                    );
                    vec![LinkAction::Connect]
                } else {
                    self.state = LinkState::Failed;
                    Vec::new()
                }
            }
            LinkEvent::AddressAcquired(address)
                if matches!(self.state, LinkState::Connecting | LinkState::Up) =>
            {
                self.state = LinkState::Up;
                self.retries = 0;
                self.address = Some(address);
                Vec::new()
            }
            LinkEvent::PeerJoined(peer) if self.access_point => {
                self.peers += 1;
                info!(%peer, peers = self.peers, "Peer joined setup access point");
                Vec::new()
            }
            LinkEvent::PeerLeft(peer) if self.access_point => {
                self.peers = self.peers.saturating_sub(1);
                info!(%peer, peers = self.peers, "Peer left setup access point");
                Vec::new()
            }
            other => {
                debug!(event = ?other, state = %self.state, "ignoring link event");
                Vec::new()
            }
        }
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

/// Owns the link state. Cheap to clone; all clones share one machine.
#[derive(Clone)]
pub struct LinkSupervisor {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    machine: Mutex<LinkMachine>,
    status_tx: watch::Sender<LinkStatus>,
    driver: Arc<dyn LinkDriver>,
    work: WorkQueue,
}

impl LinkSupervisor {
    pub fn new(driver: Arc<dyn LinkDriver>, settings: &LinkSettings, work: WorkQueue) -> Self {
        let machine = LinkMachine::new(settings.max_retries);
        let (status_tx, _) = watch::channel(machine.status());
        Self {
            inner: Arc::new(LinkInner {
                machine: Mutex::new(machine),
                status_tx,
                driver,
                work,
            }),
        }
    }

    /// Connect to `credentials`. A no-op if already connecting or up with
    /// the same credentials; otherwise restarts the radio.
    pub fn start(&self, credentials: NetworkCredentials) {
        self.transition(|m| m.start(credentials));
    }

    /// Bring the radio down. Idempotent.
    pub fn stop(&self) {
        self.transition(LinkMachine::stop);
    }

    /// Serve the setup access point instead of joining a network.
    pub fn start_access_point(&self, config: AccessPointConfig) {
        self.transition(|m| m.start_access_point(config));
    }

    /// Feed a driver event into the state machine. Never blocks on the driver.
    pub fn on_link_event(&self, event: LinkEvent) {
        self.transition(|m| m.on_event(event));
    }

    pub fn current_state(&self) -> LinkState {
        self.inner.status_tx.borrow().state
    }

    pub fn status(&self) -> LinkStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status_tx.subscribe()
    }

    fn transition(&self, f: impl FnOnce(&mut LinkMachine) -> Vec<LinkAction>) {
        let mut machine = self.inner.machine.lock();
        let actions = f(&mut machine);
        let next = machine.status();

        self.inner.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.state != next.state {
                match next.state {
                    LinkState::Failed => warn!(
                        network = next.network.as_deref().unwrap_or_default(),
                        "Link failed after exhausting reconnect attempts"
                    ),
                    LinkState::Up => info!(
                        address = ?next.address,
                        network = next.network.as_deref().unwrap_or_default(),
                        "Link up"
                    ),
                    _ => info!(from = %current.state, to = %next.state, "Link state changed"),
                }
            }
            *current = next;
            true
        });

        // Queued while still holding the machine so driver calls keep
        // the same order as the transitions that produced them.
        for action in actions {
            self.execute(action);
        }
    }

    fn execute(&self, action: LinkAction) {
        let driver = Arc::clone(&self.inner.driver);
        match action {
            LinkAction::Start(credentials) => {
                let supervisor = self.clone();
                self.inner.work.defer("link start", move || {
                    if let Err(e) = driver.start(&credentials) {
                        warn!(error = %e, "Link start failed");
                        supervisor.on_link_event(LinkEvent::Disconnected);
                    }
                });
            }
            LinkAction::Connect => {
                let supervisor = self.clone();
                self.inner.work.defer("link connect", move || {
                    if let Err(e) = driver.connect() {
                        warn!(error = %e, "Link connect failed");
                        supervisor.on_link_event(LinkEvent::Disconnected);
                    }
                });
            }
            LinkAction::Stop => {
                self.inner.work.defer("link stop", move || {
                    if let Err(e) = driver.stop() {
                        warn!(error = %e, "Link stop failed");
                    }
                });
            }
            LinkAction::StartAccessPoint(config) => {
                self.inner.work.defer("access point start", move || {
                    match driver.start_access_point(&config) {
                        Ok(()) => info!(name = %config.name, "Setup access point started"),
                        Err(e) => warn!(error = %e, "Setup access point failed to start"),
                    }
                });
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::error::HalError;

    fn creds(name: &str) -> NetworkCredentials {
        NetworkCredentials::new(name, "secret")
    }

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))
    }

    // ── Machine ──────────────────────────────────────────────────────

    #[test]
    fn start_then_address_brings_link_up() {
        let mut m = LinkMachine::new(5);
        let actions = m.start(creds("HomeNet"));
        assert!(matches!(actions.as_slice(), [LinkAction::Start(_)]));
        assert_eq!(m.state, LinkState::Connecting);

        assert!(matches!(
            m.on_event(LinkEvent::Started).as_slice(),
            [LinkAction::Connect]
        ));
        m.on_event(LinkEvent::AddressAcquired(addr()));

        let status = m.status();
        assert_eq!(status.state, LinkState::Up);
        assert_eq!(status.address, Some(addr()));
        assert_eq!(status.network.as_deref(), Some("HomeNet"));
    }

    #[test]
    fn sixth_consecutive_disconnect_fails() {
        let mut m = LinkMachine::new(5);
        m.start(creds("HomeNet"));

        for attempt in 1..=5 {
            let actions = m.on_event(LinkEvent::Disconnected);
            assert!(matches!(actions.as_slice(), [LinkAction::Connect]));
            assert_eq!(m.state, LinkState::Connecting);
            assert_eq!(m.retries, attempt);
        }

        assert!(m.on_event(LinkEvent::Disconnected).is_empty());
        assert_eq!(m.state, LinkState::Failed);
    }

    #[test]
    fn address_resets_retry_budget() {
        let mut m = LinkMachine::new(5);
        m.start(creds("HomeNet"));
        m.on_event(LinkEvent::Disconnected);
        m.on_event(LinkEvent::Disconnected);
        m.on_event(LinkEvent::AddressAcquired(addr()));
        assert_eq!(m.retries, 0);

        m.on_event(LinkEvent::Disconnected);
        assert_eq!(m.state, LinkState::Connecting);
        assert_eq!(m.address, None);
        assert_eq!(m.retries, 1);
    }

    #[test]
    fn events_are_ignored_when_idle_or_failed() {
        let mut m = LinkMachine::new(0);
        assert!(m.on_event(LinkEvent::Started).is_empty());
        m.on_event(LinkEvent::AddressAcquired(addr()));
        assert_eq!(m.state, LinkState::Idle);

        m.start(creds("HomeNet"));
        m.on_event(LinkEvent::Disconnected);
        assert_eq!(m.state, LinkState::Failed);
        m.on_event(LinkEvent::AddressAcquired(addr()));
        assert_eq!(m.state, LinkState::Failed);
    }

    #[test]
    fn restarting_with_same_credentials_is_a_noop() {
        let mut m = LinkMachine::new(5);
        m.start(creds("HomeNet"));
        assert!(m.start(creds("HomeNet")).is_empty());

        let actions = m.start(creds("OtherNet"));
        assert!(matches!(
            actions.as_slice(),
            [LinkAction::Stop, LinkAction::Start(_)]
        ));
        assert_eq!(m.status().network.as_deref(), Some("OtherNet"));
    }

    #[test]
    fn failed_link_restarts_from_scratch() {
        let mut m = LinkMachine::new(0);
        m.start(creds("HomeNet"));
        m.on_event(LinkEvent::Disconnected);
        assert_eq!(m.state, LinkState::Failed);

        let actions = m.start(creds("HomeNet"));
        assert!(matches!(
            actions.as_slice(),
            [LinkAction::Stop, LinkAction::Start(_)]
        ));
        assert_eq!(m.state, LinkState::Connecting);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut m = LinkMachine::new(5);
        assert!(m.stop().is_empty());
        m.start(creds("HomeNet"));
        assert!(matches!(m.stop().as_slice(), [LinkAction::Stop]));
        assert!(m.stop().is_empty());
        assert_eq!(m.status().network, None);
    }

    #[test]
    fn access_point_counts_peers() {
        let mut m = LinkMachine::new(5);
        m.on_event(LinkEvent::PeerJoined("phone".into()));
        assert_eq!(m.peers, 0);

        m.start_access_point(AccessPointConfig::default());
        m.on_event(LinkEvent::PeerJoined("phone".into()));
        m.on_event(LinkEvent::PeerJoined("laptop".into()));
        m.on_event(LinkEvent::PeerLeft("phone".into()));
        m.on_event(LinkEvent::PeerLeft("phone".into()));
        m.on_event(LinkEvent::PeerLeft("phone".into()));
        assert_eq!(m.peers, 0);
        assert!(m.status().access_point);
        assert_eq!(m.state, LinkState::Idle);

        assert!(matches!(m.stop().as_slice(), [LinkAction::Stop]));
        assert!(!m.status().access_point);
    }

    /// Up only follows AddressAcquired; Failed only follows more than
    /// `max_retries` consecutive disconnects.
    #[test]
    fn arbitrary_event_sequences_hold_invariants() {
        let mut seed: u64 = 0x5eed_1234;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };

        for _ in 0..200 {
            let mut m = LinkMachine::new(5);
            m.start(creds("HomeNet"));
            let mut consecutive_drops = 0u32;

            for _ in 0..50 {
                let before = m.state;
                let event = match next() % 3 {
                    0 => LinkEvent::Started,
                    1 => LinkEvent::Disconnected,
                    _ => LinkEvent::AddressAcquired(addr()),
                };
                let was_drop = event == LinkEvent::Disconnected;
                let was_address = matches!(event, LinkEvent::AddressAcquired(_));
                m.on_event(event);

                if matches!(before, LinkState::Connecting | LinkState::Up) {
                    if was_drop {
                        consecutive_drops += 1;
                    } else if was_address {
                        consecutive_drops = 0;
                    }
                }

                if m.state == LinkState::Up && before != LinkState::Up {
                    assert!(was_address);
                }
                if m.state == LinkState::Failed && before != LinkState::Failed {
                    assert!(consecutive_drops > 5);
                }
                assert!(m.retries <= 5);
            }
        }
    }

    // ── Supervisor ───────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingDriver {
        calls: Mutex<Vec<String>>,
        refuse_connect: bool,
    }

    impl LinkDriver for RecordingDriver {
        fn start(&self, credentials: &NetworkCredentials) -> Result<(), HalError> {
            self.calls.lock().push(format!("start {}", credentials.name));
            Ok(())
        }

        fn connect(&self) -> Result<(), HalError> {
            self.calls.lock().push("connect".into());
            if self.refuse_connect {
                return Err(HalError::Failed {
                    device: "radio",
                    reason: "refused".into(),
                });
            }
            Ok(())
        }

        fn stop(&self) -> Result<(), HalError> {
            self.calls.lock().push("stop".into());
            Ok(())
        }

        fn start_access_point(&self, config: &AccessPointConfig) -> Result<(), HalError> {
            self.calls.lock().push(format!("ap {}", config.name));
            Ok(())
        }
    }

    fn supervisor(driver: Arc<RecordingDriver>) -> (LinkSupervisor, WorkQueue) {
        let (work, worker) = WorkQueue::new();
        tokio::spawn(worker.run(CancellationToken::new()));
        let link = LinkSupervisor::new(driver, &LinkSettings::default(), work.clone());
        (link, work)
    }

    #[tokio::test]
    async fn driver_calls_follow_transitions() {
        let driver = Arc::new(RecordingDriver::default());
        let (link, work) = supervisor(Arc::clone(&driver));
        let mut rx = link.subscribe();

        link.start(creds("HomeNet"));
        link.on_link_event(LinkEvent::Started);
        link.on_link_event(LinkEvent::AddressAcquired(addr()));
        link.stop();
        link.stop();
        work.drain().await;

        assert_eq!(
            *driver.calls.lock(),
            vec!["start HomeNet", "connect", "stop"]
        );
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, LinkState::Idle);
        assert_eq!(link.current_state(), LinkState::Idle);
    }

    #[tokio::test]
    async fn connect_errors_consume_retries_until_failed() {
        let driver = Arc::new(RecordingDriver {
            refuse_connect: true,
            ..RecordingDriver::default()
        });
        let (link, work) = supervisor(Arc::clone(&driver));

        link.start(creds("HomeNet"));
        link.on_link_event(LinkEvent::Started);
        // Each refused connect feeds a Disconnected back and queues the next.
        for _ in 0..10 {
            work.drain().await;
        }

        assert_eq!(link.current_state(), LinkState::Failed);
        let connects = driver
            .calls
            .lock()
            .iter()
            .filter(|c| c.as_str() == "connect")
            .count();
        assert_eq!(connects, 6);
    }

    #[tokio::test]
    async fn access_point_replaces_station() {
        let driver = Arc::new(RecordingDriver::default());
        let (link, work) = supervisor(Arc::clone(&driver));

        link.start(creds("HomeNet"));
        link.start_access_point(AccessPointConfig::default());
        work.drain().await;

        assert_eq!(
            *driver.calls.lock(),
            vec!["start HomeNet", "stop", "ap SmartLight-Setup"]
        );
        let status = link.status();
        assert!(status.access_point);
        assert_eq!(status.network, None);
    }
}
