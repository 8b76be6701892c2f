// ── Device and runtime configuration ──
//
// `DeviceConfig` is the durable identity + credentials of the device.
// `RuntimeSettings` is the tuning of the orchestrator (intervals, retry
// budgets, timeouts). Neither type touches disk: smartlight-config loads
// and persists them and hands them in.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use smartlight_api::ReconnectConfig;
use tracing::warn;

use crate::error::CoreError;

// ── Field limits ─────────────────────────────────────────────────────

pub const NETWORK_NAME_MAX: usize = 32;
pub const NETWORK_SECRET_MAX: usize = 64;
pub const CONTROLLER_ADDRESS_MAX: usize = 127;
pub const DEVICE_ID_MAX: usize = 31;

/// Clamp `value` to at most `max` bytes, cutting at a character boundary.
///
/// Over-long values are truncated, not rejected; the cut is logged.
pub fn truncate_field(field: &'static str, value: &str, max: usize) -> String {
    if value.len() <= max {
        return value.to_owned();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    warn!(field, len = value.len(), max, "Truncating over-long field");
    value[..end].to_owned()
}

fn truncate_secret(field: &'static str, value: &str, max: usize) -> SecretString {
    SecretString::from(truncate_field(field, value, max))
}

// ── HardwareId ───────────────────────────────────────────────────────

/// Stable 6-byte hardware identifier (the radio MAC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareId([u8; 6]);

impl HardwareId {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// `smartlight_` + the last three bytes in lowercase hex.
    pub fn device_id(&self) -> String {
        let [_, _, _, a, b, c] = self.0;
        format!("smartlight_{a:02x}{b:02x}{c:02x}")
    }

    /// Advertised provisioning service name: `SmartLight_` + last three bytes, uppercase.
    pub fn service_name(&self) -> String {
        let [_, _, _, a, b, c] = self.0;
        format!("SmartLight_{a:02X}{b:02X}{c:02X}")
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for HardwareId {
    type Err = CoreError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::ValidationFailed {
            message: format!("invalid hardware id '{s}' (expected six hex octets)"),
        };

        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for byte in &mut bytes {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

// ── NetworkCredentials ───────────────────────────────────────────────

/// Station-mode credentials handed to the link driver.
#[derive(Debug, Clone)]
pub struct NetworkCredentials {
    pub name: String,
    pub secret: SecretString,
}

impl NetworkCredentials {
    /// Build credentials, truncating both fields to their limits.
    pub fn new(name: &str, secret: &str) -> Self {
        Self {
            name: truncate_field("network_name", name, NETWORK_NAME_MAX),
            secret: truncate_secret("network_secret", secret, NETWORK_SECRET_MAX),
        }
    }
}

impl PartialEq for NetworkCredentials {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl Eq for NetworkCredentials {}

// ── DeviceConfig ─────────────────────────────────────────────────────

/// Identity and credentials of the device.
///
/// Exactly one authoritative instance lives in the orchestrator; sessions
/// hold read-only snapshots behind an `Arc`.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub network_name: String,
    pub network_secret: SecretString,
    /// `scheme://host:port/path` of the controller, possibly without scheme.
    pub controller_address: String,
    pub device_id: String,
}

impl DeviceConfig {
    pub fn empty() -> Self {
        Self {
            network_name: String::new(),
            network_secret: SecretString::from(String::new()),
            controller_address: String::new(),
            device_id: String::new(),
        }
    }

    /// Non-empty network name and non-empty controller address.
    pub fn valid(&self) -> bool {
        !self.network_name.is_empty() && !self.controller_address.is_empty()
    }

    /// Station credentials, if a network name is configured.
    pub fn credentials(&self) -> Option<NetworkCredentials> {
        if self.network_name.is_empty() {
            return None;
        }
        Some(NetworkCredentials {
            name: self.network_name.clone(),
            secret: self.network_secret.clone(),
        })
    }

    /// Fill a missing `device_id` from the hardware identifier.
    /// Returns `true` if the config changed.
    pub fn ensure_device_id(&mut self, hardware_id: HardwareId) -> bool {
        if self.device_id.is_empty() {
            self.device_id = hardware_id.device_id();
            true
        } else {
            false
        }
    }

    /// Merge a delta into this config, applying field limits.
    pub fn apply(&mut self, delta: &ConfigDelta) {
        if let Some(ref network) = delta.network {
            self.network_name = truncate_field("network_name", &network.name, NETWORK_NAME_MAX);
            self.network_secret = truncate_secret(
                "network_secret",
                network.secret.expose_secret(),
                NETWORK_SECRET_MAX,
            );
        }
        if let Some(ref address) = delta.controller_address {
            self.controller_address =
                truncate_field("controller_address", address, CONTROLLER_ADDRESS_MAX);
        }
        if let Some(ref device_id) = delta.device_id {
            self.device_id = truncate_field("device_id", device_id, DEVICE_ID_MAX);
        }
    }

    /// Applying `delta` would change nothing.
    pub fn reflects(&self, delta: &ConfigDelta) -> bool {
        let mut applied = self.clone();
        applied.apply(delta);
        applied == *self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for DeviceConfig {
    fn eq(&self, other: &Self) -> bool {
        self.network_name == other.network_name
            && self.network_secret.expose_secret() == other.network_secret.expose_secret()
            && self.controller_address == other.controller_address
            && self.device_id == other.device_id
    }
}

impl Eq for DeviceConfig {}

/// A partial update to [`DeviceConfig`]. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    pub network: Option<NetworkCredentials>,
    pub controller_address: Option<String>,
    pub device_id: Option<String>,
}

// ── RuntimeSettings ──────────────────────────────────────────────────

pub const MAX_RETRIES: u32 = 5;
pub const DEFAULT_PROOF_OF_POSSESSION: &str = "abcd1234";
pub const DEFAULT_ACCESS_POINT_NAME: &str = "SmartLight-Setup";
pub const DEFAULT_ACCESS_POINT_SECRET: &str = "smartlight";

/// Tuning of the orchestrator and its components.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Reconciliation period.
    pub tick_interval: Duration,
    /// Delay between provisioning success and re-reading the store.
    pub reload_grace: Duration,
    /// Log a status summary every this many ticks (0 disables).
    pub status_log_every: u32,
    pub link: LinkSettings,
    pub provisioning: ProvisioningSettings,
    pub session: SessionSettings,
    pub reset: ResetSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            reload_grace: Duration::from_secs(2),
            status_log_every: 10,
            link: LinkSettings::default(),
            provisioning: ProvisioningSettings::default(),
            session: SessionSettings::default(),
            reset: ResetSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Reconnect attempts before the link is declared failed.
    pub max_retries: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }
}

/// Soft access point opened when provisioning cannot start.
#[derive(Debug, Clone)]
pub struct AccessPointConfig {
    pub name: String,
    pub secret: SecretString,
    pub channel: u8,
    pub max_peers: u8,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_ACCESS_POINT_NAME.to_owned(),
            secret: SecretString::from(DEFAULT_ACCESS_POINT_SECRET.to_owned()),
            channel: 1,
            max_peers: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    /// A session not completed within this window fails.
    pub timeout: Duration,
    pub proof_of_possession: SecretString,
    pub access_point: AccessPointConfig,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            proof_of_possession: SecretString::from(DEFAULT_PROOF_OF_POSSESSION.to_owned()),
            access_point: AccessPointConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub send_attempts: u32,
    pub send_backoff: Duration,
    pub send_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            send_attempts: 3,
            send_backoff: Duration::from_millis(100),
            send_timeout: Duration::from_secs(1),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetSettings {
    pub sample_interval: Duration,
    /// Samples the input must stay pressed before a release counts.
    pub hold_samples: u32,
    /// Samples after which a still-held input fires without waiting for release.
    pub ceiling_samples: u32,
    /// Pause between wiping the config and restarting.
    pub restart_delay: Duration,
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(100),
            hold_samples: 30,
            ceiling_samples: 50,
            restart_delay: Duration::from_secs(1),
        }
    }
}
