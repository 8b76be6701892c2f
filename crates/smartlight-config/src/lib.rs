//! Configuration for the SmartLight firmware host.
//!
//! Two kinds of state live here: the durable [`DeviceConfig`] (credentials,
//! controller address, device id) behind [`FileConfigStore`], and the
//! figment-layered [`Settings`] that tune the orchestrator and convert into
//! `smartlight_core::RuntimeSettings`.
//!
//! [`DeviceConfig`]: smartlight_core::DeviceConfig

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use smartlight_api::ReconnectConfig;
use smartlight_core::HardwareId;
use smartlight_core::config::{
    AccessPointConfig, DEFAULT_ACCESS_POINT_NAME, DEFAULT_ACCESS_POINT_SECRET,
    DEFAULT_PROOF_OF_POSSESSION, LinkSettings, MAX_RETRIES, ProvisioningSettings, ResetSettings,
    RuntimeSettings, SessionSettings,
};

mod store;

pub use store::{DEVICE_FILE, FORMAT_VERSION, FileConfigStore};

/// Environment prefix for settings overrides (`SMARTLIGHT_SESSION__HEARTBEAT_SECS=5`).
pub const ENV_PREFIX: &str = "SMARTLIGHT_";
/// Overrides the platform config directory.
pub const CONFIG_DIR_ENV: &str = "SMARTLIGHT_CONFIG_DIR";
pub const SETTINGS_FILE: &str = "settings.toml";

/// Locally administered address used when no hardware id is configured.
pub const DEFAULT_HARDWARE_ID: &str = "02:53:4c:00:00:01";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize settings: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("settings loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── Settings ────────────────────────────────────────────────────────

/// Top-level `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceSection,
    pub orchestrator: OrchestratorSection,
    pub link: LinkSection,
    pub provisioning: ProvisioningSection,
    pub session: SessionSection,
    pub reset: ResetSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Radio MAC, `aa:bb:cc:dd:ee:ff`.
    pub hardware_id: String,
    /// Pixels on the light strip.
    pub led_count: u16,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            hardware_id: DEFAULT_HARDWARE_ID.into(),
            led_count: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub tick_ms: u64,
    pub reload_grace_ms: u64,
    /// 0 disables the periodic status line.
    pub status_log_every: u32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            reload_grace_ms: 2_000,
            status_log_every: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkSection {
    pub max_retries: u32,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisioningSection {
    pub timeout_secs: u64,
    pub proof_of_possession: String,
    pub access_point_name: String,
    pub access_point_secret: String,
    pub access_point_channel: u8,
    pub access_point_max_peers: u8,
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            proof_of_possession: DEFAULT_PROOF_OF_POSSESSION.into(),
            access_point_name: DEFAULT_ACCESS_POINT_NAME.into(),
            access_point_secret: DEFAULT_ACCESS_POINT_SECRET.into(),
            access_point_channel: 1,
            access_point_max_peers: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSection {
    pub heartbeat_secs: u64,
    pub send_attempts: u32,
    pub send_backoff_ms: u64,
    pub send_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            heartbeat_secs: 15,
            send_attempts: 3,
            send_backoff_ms: 100,
            send_timeout_ms: 1_000,
            reconnect_initial_ms: 1_000,
            reconnect_max_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResetSection {
    pub sample_interval_ms: u64,
    pub hold_samples: u32,
    pub ceiling_samples: u32,
    pub restart_delay_ms: u64,
}

impl Default for ResetSection {
    fn default() -> Self {
        Self {
            sample_interval_ms: 100,
            hold_samples: 30,
            ceiling_samples: 50,
            restart_delay_ms: 1_000,
        }
    }
}

impl Settings {
    /// Parse `[device] hardware_id`.
    pub fn hardware_id(&self) -> Result<HardwareId, ConfigError> {
        self.device
            .hardware_id
            .parse()
            .map_err(|e: smartlight_core::CoreError| invalid("device.hardware_id", e.to_string()))
    }

    /// Validate and convert into the orchestrator's tuning.
    pub fn into_runtime(&self) -> Result<RuntimeSettings, ConfigError> {
        let orch = &self.orchestrator;
        let prov = &self.provisioning;
        let session = &self.session;
        let reset = &self.reset;

        if orch.tick_ms == 0 {
            return Err(invalid("orchestrator.tick_ms", "must be greater than zero"));
        }
        if session.heartbeat_secs == 0 {
            return Err(invalid("session.heartbeat_secs", "must be greater than zero"));
        }
        if session.send_attempts == 0 {
            return Err(invalid("session.send_attempts", "at least one attempt is required"));
        }
        if session.reconnect_max_secs.saturating_mul(1_000) < session.reconnect_initial_ms {
            return Err(invalid(
                "session.reconnect_max_secs",
                "must not be below reconnect_initial_ms",
            ));
        }
        if reset.sample_interval_ms == 0 {
            return Err(invalid("reset.sample_interval_ms", "must be greater than zero"));
        }
        if reset.hold_samples == 0 {
            return Err(invalid("reset.hold_samples", "must be greater than zero"));
        }
        if reset.ceiling_samples < reset.hold_samples {
            return Err(invalid(
                "reset.ceiling_samples",
                format!("must be at least hold_samples ({})", reset.hold_samples),
            ));
        }
        if prov.access_point_name.trim().is_empty() {
            return Err(invalid("provisioning.access_point_name", "must not be empty"));
        }
        if prov.proof_of_possession.is_empty() {
            return Err(invalid("provisioning.proof_of_possession", "must not be empty"));
        }

        Ok(RuntimeSettings {
            tick_interval: Duration::from_millis(orch.tick_ms),
            reload_grace: Duration::from_millis(orch.reload_grace_ms),
            status_log_every: orch.status_log_every,
            link: LinkSettings {
                max_retries: self.link.max_retries,
            },
            provisioning: ProvisioningSettings {
                timeout: Duration::from_secs(prov.timeout_secs),
                proof_of_possession: SecretString::from(prov.proof_of_possession.clone()),
                access_point: AccessPointConfig {
                    name: prov.access_point_name.clone(),
                    secret: SecretString::from(prov.access_point_secret.clone()),
                    channel: prov.access_point_channel,
                    max_peers: prov.access_point_max_peers,
                },
            },
            session: SessionSettings {
                heartbeat_interval: Duration::from_secs(session.heartbeat_secs),
                send_attempts: session.send_attempts,
                send_backoff: Duration::from_millis(session.send_backoff_ms),
                send_timeout: Duration::from_millis(session.send_timeout_ms),
                reconnect: ReconnectConfig {
                    initial_delay: Duration::from_millis(session.reconnect_initial_ms),
                    max_delay: Duration::from_secs(session.reconnect_max_secs),
                },
            },
            reset: ResetSettings {
                sample_interval: Duration::from_millis(reset.sample_interval_ms),
                hold_samples: reset.hold_samples,
                ceiling_samples: reset.ceiling_samples,
                restart_delay: Duration::from_millis(reset.restart_delay_ms),
            },
        })
    }
}

// ── Paths ───────────────────────────────────────────────────────────

/// Platform config directory (XDG on Linux).
pub fn config_dir() -> PathBuf {
    ProjectDirs::from("com", "smartlight", "smartlight")
        .map_or_else(dirs_fallback, |dirs| dirs.config_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("smartlight");
    p
}

/// `override_dir` if given, else the platform directory.
pub fn resolve_config_dir(override_dir: Option<&Path>) -> PathBuf {
    override_dir.map_or_else(config_dir, Path::to_path_buf)
}

pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE)
}

pub fn device_path(dir: &Path) -> PathBuf {
    dir.join(DEVICE_FILE)
}

// ── Loading / saving ────────────────────────────────────────────────

/// Defaults, then `settings.toml` in `dir`, then `SMARTLIGHT_*` env.
pub fn load_settings(dir: &Path) -> Result<Settings, ConfigError> {
    let settings: Settings = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(settings_path(dir)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()?;
    Ok(settings)
}

/// Write `settings.toml` into `dir`, creating it if needed.
pub fn save_settings(dir: &Path, settings: &Settings) -> Result<(), ConfigError> {
    std::fs::create_dir_all(dir)?;
    let toml_str = toml::to_string_pretty(settings)?;
    std::fs::write(settings_path(dir), toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn defaults_match_core_defaults() {
        let runtime = Settings::default().into_runtime().unwrap();
        let core = RuntimeSettings::default();

        assert_eq!(runtime.tick_interval, core.tick_interval);
        assert_eq!(runtime.reload_grace, core.reload_grace);
        assert_eq!(runtime.status_log_every, core.status_log_every);
        assert_eq!(runtime.link, core.link);
        assert_eq!(runtime.session, core.session);
        assert_eq!(runtime.reset, core.reset);
        assert_eq!(runtime.provisioning.timeout, core.provisioning.timeout);
        assert_eq!(
            runtime.provisioning.proof_of_possession.expose_secret(),
            "abcd1234"
        );
        assert_eq!(runtime.provisioning.access_point.name, "SmartLight-Setup");
    }

    #[test]
    fn default_hardware_id_parses() {
        let hw = Settings::default().hardware_id().unwrap();
        assert_eq!(hw.device_id(), "smartlight_000001");
    }

    #[test]
    fn bad_hardware_id_is_a_validation_error() {
        let mut settings = Settings::default();
        settings.device.hardware_id = "not-a-mac".into();
        let err = settings.hardware_id().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "device.hardware_id"));
    }

    #[test]
    fn ceiling_below_hold_is_rejected() {
        let mut settings = Settings::default();
        settings.reset.ceiling_samples = 10;
        let err = settings.into_runtime().unwrap_err();
        assert!(err.to_string().contains("reset.ceiling_samples"));
    }

    #[test]
    fn zero_send_attempts_is_rejected() {
        let mut settings = Settings::default();
        settings.session.send_attempts = 0;
        assert!(settings.into_runtime().is_err());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let settings: Settings = toml::from_str(
            "[session]\nheartbeat_secs = 5\n\n[device]\nled_count = 12\n",
        )
        .unwrap();
        assert_eq!(settings.session.heartbeat_secs, 5);
        assert_eq!(settings.session.send_attempts, 3);
        assert_eq!(settings.device.led_count, 12);
        assert_eq!(settings.device.hardware_id, DEFAULT_HARDWARE_ID);
    }

    #[test]
    fn override_dir_wins() {
        let dir = Path::new("/tmp/smartlight-override");
        assert_eq!(resolve_config_dir(Some(dir)), dir);
        assert_eq!(device_path(dir), dir.join("device.toml"));
    }
}
