use thiserror::Error;

/// Top-level error type for the `smartlight-api` crate.
///
/// Covers every failure mode of the controller session: address
/// decomposition, the WebSocket transport, and message encoding.
/// `smartlight-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Controller address ──────────────────────────────────────────
    /// The controller address could not be parsed as a URL.
    #[error("Invalid controller address: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The controller address is empty.
    #[error("Controller address is empty")]
    EmptyAddress,

    /// The scheme is neither `ws` nor `wss` (or their http aliases).
    #[error("Unsupported controller scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),

    /// The controller address has no host component.
    #[error("Controller address has no host: {0}")]
    MissingHost(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Writing a frame to the socket failed.
    #[error("WebSocket send failed: {0}")]
    Send(String),

    /// A send did not complete within its deadline.
    #[error("Send timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// No connection is open to send on.
    #[error("Session is not connected")]
    NotConnected,

    // ── Data ────────────────────────────────────────────────────────
    /// An inbound frame could not be decoded, with the raw text for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// An outbound message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a send-path error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Send(_) | Self::Timeout { .. } | Self::WebSocketConnect(_)
        )
    }

    /// Returns `true` if the error means the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::WebSocketClosed { .. } | Self::NotConnected)
    }
}
