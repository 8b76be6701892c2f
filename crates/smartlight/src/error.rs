//! CLI error types with miette diagnostics.
//!
//! Maps core and config errors into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use smartlight_config::ConfigError;
use smartlight_core::{CoreError, StorageError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const STORAGE: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(smartlight::validation))]
    Validation { field: String, reason: String },

    #[error("Invalid controller address '{address}': {reason}")]
    #[diagnostic(
        code(smartlight::invalid_address),
        help("Use ws://host:port/path, for example ws://192.168.1.20:81/devices")
    )]
    InvalidAddress { address: String, reason: String },

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(smartlight::confirmation_required),
        help("Pass --yes (-y) to confirm.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(smartlight::settings),
        help("Check settings.toml and any SMARTLIGHT_* environment variables.")
    )]
    Settings(#[from] ConfigError),

    // ── Storage ──────────────────────────────────────────────────────

    #[error("Device configuration storage failed")]
    #[diagnostic(
        code(smartlight::storage),
        help("Check that the config directory is writable, or run with --ephemeral.")
    )]
    Storage {
        #[source]
        source: StorageError,
    },

    // ── Runtime ──────────────────────────────────────────────────────

    #[error("Controller connection failed: {message}")]
    #[diagnostic(code(smartlight::connection))]
    Connection { message: String },

    #[error("Device runtime error: {message}")]
    #[diagnostic(code(smartlight::runtime))]
    Runtime { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(smartlight::toml))]
    Toml(#[from] toml::ser::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(smartlight::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. }
            | Self::InvalidAddress { .. }
            | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Settings(_) => exit_code::CONFIG,
            Self::Storage { .. } => exit_code::STORAGE,
            Self::Connection { .. } => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<StorageError> for CliError {
    fn from(source: StorageError) -> Self {
        Self::Storage { source }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Storage(source) => Self::Storage { source },
            CoreError::InvalidControllerAddress { address, reason } => {
                Self::InvalidAddress { address, reason }
            }
            CoreError::ValidationFailed { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::Transport { message, .. } => Self::Connection { message },
            other => Self::Runtime {
                message: other.to_string(),
            },
        }
    }
}

impl From<smartlight_api::Error> for CliError {
    fn from(err: smartlight_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
