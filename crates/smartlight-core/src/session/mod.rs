// ── Controller session manager ──
//
// Owns the connection to the remote controller. A session is only
// registered while the link is up; events from a replaced or stopped
// transport are discarded by generation. Closes schedule a reconnect
// window with exponential backoff, but the decision to reconnect belongs
// to the orchestrator.

pub mod dispatch;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use smartlight_api::{
    Outbound, ServoAngle, SessionEvent, SessionTarget, WebSocketSession, calculate_backoff,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use dispatch::{CommandDispatcher, Handled};

use crate::config::{DeviceConfig, SessionSettings};
use crate::error::CoreError;
use crate::link::{LinkState, LinkStatus};

// ── Transport seam ───────────────────────────────────────────────────

/// One open controller connection.
pub trait SessionTransport: Send + Sync {
    /// Queue a text frame; the receiver resolves once it is written.
    fn send_text(&self, text: String) -> oneshot::Receiver<Result<(), smartlight_api::Error>>;
    /// Tear the connection down without emitting a close event.
    fn close(&self);
}

/// Factory for controller connections.
pub trait SessionConnector: Send + Sync {
    fn open(
        &self,
        target: &SessionTarget,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Box<dyn SessionTransport>;
}

impl SessionTransport for WebSocketSession {
    fn send_text(&self, text: String) -> oneshot::Receiver<Result<(), smartlight_api::Error>> {
        WebSocketSession::send_text(self, text)
    }

    fn close(&self) {
        WebSocketSession::close(self);
    }
}

/// Connects over WebSocket using smartlight-api.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl SessionConnector for WebSocketConnector {
    fn open(
        &self,
        target: &SessionTarget,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Box<dyn SessionTransport> {
        Box::new(WebSocketSession::open(
            target,
            events,
            CancellationToken::new(),
        ))
    }
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Stopped,
    /// Transport opening; not yet registered.
    Starting,
    Registered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub generation: u64,
    pub target: Option<String>,
    pub last_liveness: Option<Instant>,
    /// Consecutive closes since the last successful registration.
    pub failures: u32,
    /// Send failures since the last acknowledgement.
    pub soft_failures: u32,
    /// Earliest instant a new session should be started.
    pub retry_after: Option<Instant>,
}

struct Slot {
    state: SessionState,
    generation: u64,
    config: Option<Arc<DeviceConfig>>,
    target: Option<SessionTarget>,
    transport: Option<Box<dyn SessionTransport>>,
    last_liveness: Option<Instant>,
    failures: u32,
    soft_failures: u32,
    retry_after: Option<Instant>,
}

impl Slot {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            generation: self.generation,
            target: self.target.as_ref().map(SessionTarget::url),
            last_liveness: self.last_liveness,
            failures: self.failures,
            soft_failures: self.soft_failures,
            retry_after: self.retry_after,
        }
    }

    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
    }
}

// ── SessionManager ───────────────────────────────────────────────────

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connector: Arc<dyn SessionConnector>,
    dispatcher: CommandDispatcher,
    link: watch::Receiver<LinkStatus>,
    settings: SessionSettings,
    slot: Mutex<Slot>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        dispatcher: CommandDispatcher,
        link: watch::Receiver<LinkStatus>,
        settings: SessionSettings,
    ) -> Self {
        let slot = Slot {
            state: SessionState::Stopped,
            generation: 0,
            config: None,
            target: None,
            transport: None,
            last_liveness: None,
            failures: 0,
            soft_failures: 0,
            retry_after: None,
        };
        let (status_tx, _) = watch::channel(slot.status());
        Self {
            inner: Arc::new(SessionInner {
                connector,
                dispatcher,
                link,
                settings,
                slot: Mutex::new(slot),
                status_tx,
            }),
        }
    }

    /// Open a session against `config.controller_address`, replacing any
    /// existing one.
    ///
    /// An unparseable address is reported and counted as a failed attempt
    /// so the next try waits out the backoff window.
    pub fn start(&self, config: Arc<DeviceConfig>) -> Result<(), CoreError> {
        let target = match SessionTarget::parse(&config.controller_address) {
            Ok(target) => target,
            Err(e) => {
                let mut slot = self.inner.slot.lock();
                self.schedule_retry(&mut slot);
                self.publish(&slot);
                return Err(CoreError::InvalidControllerAddress {
                    address: config.controller_address.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let generation = {
            let mut slot = self.inner.slot.lock();
            if slot.transport.is_some() {
                debug!("replacing existing controller transport");
            }
            slot.close_transport();
            slot.generation += 1;
            slot.state = SessionState::Starting;
            slot.config = Some(config);
            slot.retry_after = None;
            slot.transport = Some(self.inner.connector.open(&target, events_tx));
            slot.target = Some(target);
            self.publish(&slot);
            slot.generation
        };

        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                manager.apply(generation, event);
            }
        });

        info!(
            controller = %self.status().target.unwrap_or_default(),
            "Controller session starting"
        );
        Ok(())
    }

    /// Close the current session, if any. Idempotent.
    pub fn stop(&self) {
        let mut slot = self.inner.slot.lock();
        if slot.state == SessionState::Stopped && slot.transport.is_none() {
            return;
        }
        slot.close_transport();
        slot.generation += 1;
        slot.state = SessionState::Stopped;
        slot.config = None;
        slot.failures = 0;
        slot.soft_failures = 0;
        slot.retry_after = None;
        self.publish(&slot);
        info!("Controller session stopped");
    }

    /// Feed an event for the current transport.
    pub fn on_session_event(&self, event: SessionEvent) {
        let generation = self.inner.slot.lock().generation;
        self.apply(generation, event);
    }

    /// Send one heartbeat with both actuator positions.
    ///
    /// A failed send leaves the session registered; only a close from the
    /// transport tears it down.
    pub async fn send_liveness_signal(&self) -> Result<(), CoreError> {
        if !self.is_active() {
            return Err(CoreError::SessionNotActive);
        }

        let dispatcher = &self.inner.dispatcher;
        let heartbeat = Outbound::Heartbeat {
            servo1: ServoAngle {
                angle: dispatcher.actuator_status(1).angle,
            },
            servo2: ServoAngle {
                angle: dispatcher.actuator_status(2).angle,
            },
        };

        match self.send(&heartbeat).await {
            Ok(()) => {
                let mut slot = self.inner.slot.lock();
                slot.last_liveness = Some(Instant::now());
                self.publish(&slot);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Liveness signal failed, keeping session");
                let mut slot = self.inner.slot.lock();
                slot.soft_failures += 1;
                self.publish(&slot);
                Err(e)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.current_state() == SessionState::Registered
    }

    pub fn current_state(&self) -> SessionState {
        self.inner.status_tx.borrow().state
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.inner.dispatcher
    }

    // ── Internals ────────────────────────────────────────────────────

    fn apply(&self, generation: u64, event: SessionEvent) {
        match event {
            SessionEvent::Opened => self.on_opened(generation),
            SessionEvent::Closed { reason } => self.on_closed(generation, reason.as_deref()),
            SessionEvent::MessageReceived(message) => {
                {
                    let slot = self.inner.slot.lock();
                    if slot.generation != generation || slot.state == SessionState::Stopped {
                        return;
                    }
                }
                match self.inner.dispatcher.dispatch(&message) {
                    Ok(Handled::Acknowledged) => {
                        let mut slot = self.inner.slot.lock();
                        slot.soft_failures = 0;
                        self.publish(&slot);
                    }
                    Ok(handled) => debug!(?handled, "controller command handled"),
                    Err(e) => warn!(error = %e, kind = message.kind(), "Controller command rejected"),
                }
            }
            SessionEvent::SendFailed { error } => {
                let mut slot = self.inner.slot.lock();
                if slot.generation != generation {
                    return;
                }
                slot.soft_failures += 1;
                self.publish(&slot);
                warn!(error, "Controller send failed");
            }
        }
    }

    fn on_opened(&self, generation: u64) {
        let device_id = {
            let mut slot = self.inner.slot.lock();
            if slot.generation != generation || slot.state != SessionState::Starting {
                return;
            }
            if self.inner.link.borrow().state != LinkState::Up {
                warn!("Controller session opened while the link is down, closing");
                slot.close_transport();
                slot.state = SessionState::Stopped;
                self.publish(&slot);
                return;
            }
            slot.state = SessionState::Registered;
            slot.failures = 0;
            slot.soft_failures = 0;
            self.publish(&slot);
            slot.config
                .as_ref()
                .map(|c| c.device_id.clone())
                .unwrap_or_default()
        };

        info!(device_id, "Controller session open, registering");
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.send(&Outbound::Register { device_id }).await {
                warn!(error = %e, "Registration send failed");
            }
        });
    }

    fn on_closed(&self, generation: u64, reason: Option<&str>) {
        let mut slot = self.inner.slot.lock();
        if slot.generation != generation || slot.state == SessionState::Stopped {
            return;
        }
        slot.transport = None;
        slot.state = SessionState::Stopped;
        self.schedule_retry(&mut slot);
        self.publish(&slot);
        info!(
            reason = reason.unwrap_or("<none>"),
            failures = slot.failures,
            "Controller session closed"
        );
    }

    fn schedule_retry(&self, slot: &mut Slot) {
        let delay = calculate_backoff(slot.failures, &self.inner.settings.reconnect);
        slot.failures = slot.failures.saturating_add(1);
        slot.retry_after = Some(Instant::now() + delay);
        debug!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "controller reconnect scheduled"
        );
    }

    /// Send with the configured retry budget.
    async fn send(&self, message: &Outbound) -> Result<(), CoreError> {
        let text = message.to_text()?;
        let settings = &self.inner.settings;
        let attempts = settings.send_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let reply = {
                let slot = self.inner.slot.lock();
                match slot.transport.as_ref() {
                    Some(transport) => transport.send_text(text.clone()),
                    None => return Err(CoreError::SessionNotActive),
                }
            };

            match tokio::time::timeout(settings.send_timeout, reply).await {
                Ok(Ok(Ok(()))) => return Ok(()),
                Ok(Ok(Err(e))) => last_error = e.to_string(),
                Ok(Err(_)) => last_error = "transport dropped the frame".into(),
                Err(_) => {
                    last_error = format!(
                        "no confirmation within {}ms",
                        settings.send_timeout.as_millis()
                    );
                }
            }
            debug!(attempt, attempts, kind = message.kind(), error = %last_error, "send attempt failed");

            if attempt < attempts {
                tokio::time::sleep(settings.send_backoff).await;
            }
        }

        Err(CoreError::SendFailed {
            attempts,
            reason: last_error,
        })
    }

    fn publish(&self, slot: &Slot) {
        let next = slot.status();
        self.inner.status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if current.state != next.state {
                debug!(from = %current.state, to = %next.state, "session state changed");
            }
            *current = next;
            true
        });
    }
}
