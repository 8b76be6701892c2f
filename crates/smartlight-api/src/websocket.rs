//! Single-connection WebSocket transport for the controller session.
//!
//! [`WebSocketSession::open`] spawns a background task that dials the
//! controller, reports lifecycle changes as [`SessionEvent`]s, decodes
//! inbound frames and writes outbound frames queued through
//! [`WebSocketSession::send_text`]. The task never reconnects on its own:
//! once it reports [`SessionEvent::Closed`] it is finished, and the owner
//! decides when to dial again (see [`calculate_backoff`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use smartlight_api::{Outbound, SessionTarget, WebSocketSession};
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! let target = SessionTarget::parse("ws://192.168.1.20:8080/ws")?;
//! let (events_tx, mut events_rx) = mpsc::unbounded_channel();
//! let session = WebSocketSession::open(&target, events_tx, CancellationToken::new());
//!
//! while let Some(event) = events_rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::messages::{Inbound, Outbound};
use crate::target::SessionTarget;

// ── SessionEvent ─────────────────────────────────────────────────────

/// Lifecycle and traffic notifications from one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The handshake completed; frames can be sent.
    Opened,
    /// The connection is gone (refused, closed by the peer, or failed).
    Closed { reason: Option<String> },
    /// A decoded controller command.
    MessageReceived(Inbound),
    /// Writing a frame failed. The connection may still be usable.
    SendFailed { error: String },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for re-dialing the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ── WebSocketSession ─────────────────────────────────────────────────

struct OutboundFrame {
    text: String,
    reply: oneshot::Sender<Result<(), Error>>,
}

/// Handle to one controller connection.
///
/// Dropping the handle or calling [`close`](Self::close) tears the
/// connection down without emitting [`SessionEvent::Closed`].
pub struct WebSocketSession {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    cancel: CancellationToken,
}

impl WebSocketSession {
    /// Spawn the connection task. Returns immediately; the handshake
    /// happens in the background and is reported as [`SessionEvent::Opened`].
    pub fn open(
        target: &SessionTarget,
        events: mpsc::UnboundedSender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let url = target.url();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            session_task(url, events, outbound_rx, task_cancel).await;
        });

        Self { outbound, cancel }
    }

    /// Queue a text frame. The receiver resolves once the frame has been
    /// written, or with an error if it could not be.
    pub fn send_text(&self, text: String) -> oneshot::Receiver<Result<(), Error>> {
        let (reply, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(frame)) = self.outbound.send(OutboundFrame { text, reply })
        {
            let _ = frame.reply.send(Err(Error::NotConnected));
        }
        rx
    }

    /// Encode and send one message, waiting at most `timeout`.
    pub async fn send(&self, message: &Outbound, timeout: Duration) -> Result<(), Error> {
        let rx = self.send_text(message.to_text()?);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Signal the connection task to close the socket and exit.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

impl Drop for WebSocketSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Connection task ──────────────────────────────────────────────────

async fn session_task(
    url: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    let result = connect_and_serve(&url, &events, &mut outbound_rx, &cancel).await;

    if !cancel.is_cancelled() {
        let reason = match result {
            Ok(reason) => reason,
            Err(e) => {
                tracing::warn!(error = %e, "Controller session failed");
                Some(e.to_string())
            }
        };
        let _ = events.send(SessionEvent::Closed { reason });
    }

    // Anything still queued will never be written.
    outbound_rx.close();
    while let Ok(frame) = outbound_rx.try_recv() {
        let _ = frame.reply.send(Err(Error::NotConnected));
    }

    tracing::debug!(url = %url, "Controller session task exiting");
}

/// Dial, then pump frames in both directions until the connection ends.
///
/// `Ok(reason)` means the connection ended without a transport error
/// (close frame, end of stream, or local cancellation).
async fn connect_and_serve(
    url: &str,
    events: &mpsc::UnboundedSender<SessionEvent>,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    cancel: &CancellationToken,
) -> Result<Option<String>, Error> {
    tracing::info!(url, "Connecting to controller");

    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(None),
        result = tokio_tungstenite::connect_async(url) => {
            result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
        }
    };

    tracing::info!("Controller session connected");
    let _ = events.send(SessionEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(None);
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(None);
                };
                let result = write
                    .send(Message::Text(frame.text.into()))
                    .await
                    .map_err(|e| Error::Send(e.to_string()));
                if let Err(ref e) = result {
                    let _ = events.send(SessionEvent::SendFailed { error: e.to_string() });
                }
                let _ = frame.reply.send(result);
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        deliver(text.as_str(), events);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong automatically
                        tracing::trace!("Controller ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(cf) => {
                                tracing::info!(
                                    code = %cf.code,
                                    reason = %cf.reason,
                                    "Controller closed the session"
                                );
                                format!("closed by controller ({})", u16::from(cf.code))
                            }
                            None => {
                                tracing::info!("Controller closed the session (no payload)");
                                "closed by controller".to_owned()
                            }
                        };
                        return Ok(Some(reason));
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("Controller stream ended");
                        return Ok(Some("stream ended".to_owned()));
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

/// Decode one text frame and forward it.
fn deliver(text: &str, events: &mpsc::UnboundedSender<SessionEvent>) {
    match Inbound::parse(text) {
        Ok(message) => {
            let _ = events.send(SessionEvent::MessageReceived(message));
        }
        Err(e) => {
            tracing::debug!(error = %e, "Dropping undecodable controller frame");
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% so a fleet of devices does not redial in lockstep.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
