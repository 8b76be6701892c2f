// ── Core error types ──
//
// Errors surfaced by the orchestrator and its components. Transport-layer
// errors from smartlight-api are translated by the `From` impl below so
// callers never match on WebSocket details. The taxonomy is:
// transient (retried locally), recoverable (surfaced as a state
// transition, never as an error), and fatal (returned from initialisation).

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Storage ──────────────────────────────────────────────────────
    #[error("Configuration storage failed: {0}")]
    Storage(#[from] StorageError),

    // ── Provisioning ─────────────────────────────────────────────────
    #[error("Provisioning transport could not start: {source}")]
    ProvisioningUnavailable {
        #[source]
        source: HalError,
    },

    // ── Session ──────────────────────────────────────────────────────
    #[error("Invalid controller address '{address}': {reason}")]
    InvalidControllerAddress { address: String, reason: String },

    #[error("Controller session is not active")]
    SessionNotActive,

    #[error("Send failed after {attempts} attempts: {reason}")]
    SendFailed { attempts: u32, reason: String },

    #[error("Session transport error: {message}")]
    Transport { message: String, transient: bool },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Hardware ─────────────────────────────────────────────────────
    #[error(transparent)]
    Driver(#[from] HalError),

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Transient errors are retried locally and never change the mode.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SendFailed { .. } | Self::Transport { transient: true, .. }
        )
    }

    /// Fatal errors abort initialisation; the process should restart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Driver(HalError::Unavailable { .. })
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<smartlight_api::Error> for CoreError {
    fn from(err: smartlight_api::Error) -> Self {
        use smartlight_api::Error as ApiError;

        match err {
            ApiError::InvalidUrl(e) => CoreError::InvalidControllerAddress {
                address: String::new(),
                reason: e.to_string(),
            },
            ApiError::EmptyAddress => CoreError::InvalidControllerAddress {
                address: String::new(),
                reason: "address is empty".into(),
            },
            ApiError::UnsupportedScheme(scheme) => CoreError::InvalidControllerAddress {
                address: String::new(),
                reason: format!("unsupported scheme '{scheme}'"),
            },
            ApiError::MissingHost(address) => CoreError::InvalidControllerAddress {
                address,
                reason: "missing host".into(),
            },
            other => CoreError::Transport {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

// ── Storage errors ───────────────────────────────────────────────────

/// Failure of a [`ConfigStore`](crate::store::ConfigStore) operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode configuration: {0}")]
    Encode(String),

    #[error("Stored configuration is corrupt: {reason}")]
    Corrupt { reason: String },

    #[error("Configuration storage unavailable: {0}")]
    Unavailable(String),
}

// ── Driver errors ────────────────────────────────────────────────────

/// Failure reported by a hardware driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HalError {
    /// The operation was attempted and failed.
    #[error("{device}: {reason}")]
    Failed { device: &'static str, reason: String },

    /// The hardware resource could not be acquired at all.
    #[error("{device} unavailable: {reason}")]
    Unavailable { device: &'static str, reason: String },

    /// The driver does not implement the operation.
    #[error("{device} does not support {operation}")]
    Unsupported {
        device: &'static str,
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_errors_translate_to_invalid_controller_address() {
        let err = CoreError::from(smartlight_api::Error::UnsupportedScheme("ftp".into()));
        assert!(matches!(err, CoreError::InvalidControllerAddress { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn send_timeouts_stay_transient() {
        let err = CoreError::from(smartlight_api::Error::Timeout { timeout_ms: 1000 });
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn storage_and_missing_hardware_are_fatal() {
        let storage = CoreError::from(StorageError::Corrupt {
            reason: "bad header".into(),
        });
        assert!(storage.is_fatal());

        let hw = CoreError::from(HalError::Unavailable {
            device: "light strip",
            reason: "no RMT channel".into(),
        });
        assert!(hw.is_fatal());

        let busy = CoreError::from(HalError::Failed {
            device: "servo",
            reason: "busy".into(),
        });
        assert!(!busy.is_fatal());
    }
}
