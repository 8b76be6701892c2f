// ── File-backed configuration store ──
//
// `device.toml` holds the versioned DTO below. Secrets are plaintext on
// disk and become `SecretString` on load. Writes go to a sibling temp file
// that is renamed into place, so a crash never leaves a half-written file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use smartlight_core::config::{
    CONTROLLER_ADDRESS_MAX, DEVICE_ID_MAX, NETWORK_NAME_MAX, NETWORK_SECRET_MAX, truncate_field,
};
use smartlight_core::{ConfigStore, DeviceConfig, HardwareId, StorageError};

pub const DEVICE_FILE: &str = "device.toml";
/// Bumped whenever the on-disk layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoredConfig {
    version: u32,
    #[serde(default)]
    network_name: String,
    #[serde(default)]
    network_secret: String,
    #[serde(default)]
    controller_address: String,
    #[serde(default)]
    device_id: String,
}

impl StoredConfig {
    fn from_config(config: &DeviceConfig) -> Self {
        Self {
            version: FORMAT_VERSION,
            network_name: config.network_name.clone(),
            network_secret: config.network_secret.expose_secret().to_owned(),
            controller_address: config.controller_address.clone(),
            device_id: config.device_id.clone(),
        }
    }

    fn into_config(self) -> DeviceConfig {
        DeviceConfig {
            network_name: truncate_field("network_name", &self.network_name, NETWORK_NAME_MAX),
            network_secret: SecretString::from(truncate_field(
                "network_secret",
                &self.network_secret,
                NETWORK_SECRET_MAX,
            )),
            controller_address: truncate_field(
                "controller_address",
                &self.controller_address,
                CONTROLLER_ADDRESS_MAX,
            ),
            device_id: truncate_field("device_id", &self.device_id, DEVICE_ID_MAX),
        }
    }
}

/// [`ConfigStore`] persisting to a TOML file.
pub struct FileConfigStore {
    path: PathBuf,
    hardware_id: HardwareId,
    write_lock: Mutex<()>,
}

impl FileConfigStore {
    /// Store backed by `dir/device.toml`.
    pub fn new(dir: &Path, hardware_id: HardwareId) -> Self {
        Self {
            path: dir.join(DEVICE_FILE),
            hardware_id,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the stored config. Missing files are not an error.
    pub fn erase(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Erased stored configuration");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// `Ok(None)` when nothing is stored.
    fn read(&self) -> Result<Option<StoredConfig>, StorageError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        let stored: StoredConfig = toml::from_str(&text).map_err(|e| StorageError::Corrupt {
            reason: e.message().to_owned(),
        })?;
        if stored.version != FORMAT_VERSION {
            return Err(StorageError::Corrupt {
                reason: format!(
                    "format version {} (expected {FORMAT_VERSION})",
                    stored.version
                ),
            });
        }
        Ok(Some(stored))
    }

    fn write(&self, stored: &StoredConfig) -> Result<(), StorageError> {
        let text =
            toml::to_string_pretty(stored).map_err(|e| StorageError::Encode(e.to_string()))?;

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text).map_err(|source| StorageError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))
    }
}

impl ConfigStore for FileConfigStore {
    fn init(&self) -> Result<(), StorageError> {
        match self.read() {
            Ok(Some(_)) => debug!(path = %self.path.display(), "Stored configuration is readable"),
            Ok(None) => debug!(path = %self.path.display(), "No stored configuration"),
            Err(StorageError::Corrupt { reason }) => {
                warn!(path = %self.path.display(), %reason, "Erasing unreadable configuration");
                self.erase()?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn load(&self) -> DeviceConfig {
        let mut config = match self.read() {
            Ok(Some(stored)) => stored.into_config(),
            Ok(None) => DeviceConfig::empty(),
            Err(error) => {
                warn!(%error, "Could not read stored configuration, using empty");
                DeviceConfig::empty()
            }
        };

        if config.ensure_device_id(self.hardware_id) {
            info!(device_id = %config.device_id, "Assigned device id");
            if let Err(error) = self.save(&config) {
                warn!(%error, "Could not persist generated device id");
            }
        }
        config
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), StorageError> {
        self.write(&StoredConfig::from_config(config))?;
        debug!(path = %self.path.display(), "Saved configuration");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn stored_dto_truncates_over_long_fields() {
        let stored = StoredConfig {
            version: FORMAT_VERSION,
            network_name: "n".repeat(40),
            network_secret: "s".repeat(70),
            controller_address: String::new(),
            device_id: "d".repeat(31),
        };
        let config = stored.into_config();
        assert_eq!(config.network_name.len(), NETWORK_NAME_MAX);
        assert_eq!(config.network_secret.expose_secret().len(), NETWORK_SECRET_MAX);
        assert_eq!(config.device_id.len(), DEVICE_ID_MAX);
    }

    #[test]
    fn dto_serialises_secret_in_plaintext() {
        let mut config = DeviceConfig::empty();
        config.network_name = "HomeNet".into();
        config.network_secret = SecretString::from("mypass".to_owned());
        let text = toml::to_string_pretty(&StoredConfig::from_config(&config)).unwrap();
        assert!(text.contains("version = 1"));
        assert!(text.contains("network_secret = \"mypass\""));
    }
}
