// ── Configuration store abstraction ──
//
// The orchestrator never touches disk directly. A `ConfigStore` owns the
// persisted `DeviceConfig`; smartlight-config provides the file-backed
// implementation and `MemoryConfigStore` covers ephemeral runs and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::{DeviceConfig, HardwareId};
use crate::error::StorageError;

/// Durable storage for the device configuration.
///
/// Implementations may block; callers run them off the async executor.
pub trait ConfigStore: Send + Sync {
    /// Prepare the backing medium. A corrupt or version-mismatched store
    /// is erased and re-initialised; failure to erase is fatal.
    fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Read the stored config, or an empty one if nothing is stored.
    /// A missing `device_id` is filled from the hardware identifier.
    fn load(&self) -> DeviceConfig;

    /// Persist the full config, replacing whatever was stored.
    fn save(&self, config: &DeviceConfig) -> Result<(), StorageError>;
}

/// In-memory store. Nothing survives the process.
pub struct MemoryConfigStore {
    hardware_id: HardwareId,
    slot: Mutex<Option<DeviceConfig>>,
    saves: AtomicUsize,
    read_only: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new(hardware_id: HardwareId) -> Self {
        Self {
            hardware_id,
            slot: Mutex::new(None),
            saves: AtomicUsize::new(0),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn with_config(hardware_id: HardwareId, config: DeviceConfig) -> Self {
        let store = Self::new(hardware_id);
        *store.slot.lock() = Some(config);
        store
    }

    /// The raw stored value, without device-id backfill.
    pub fn stored(&self) -> Option<DeviceConfig> {
        self.slot.lock().clone()
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }

    /// Make subsequent saves fail with [`StorageError::Unavailable`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> DeviceConfig {
        let mut slot = self.slot.lock();
        let config = slot.get_or_insert_with(DeviceConfig::empty);
        config.ensure_device_id(self.hardware_id);
        config.clone()
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), StorageError> {
        if self.read_only.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("store is read-only".into()));
        }
        *self.slot.lock() = Some(config.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const HW: HardwareId = HardwareId::new([0, 0, 0, 0x0a, 0x0b, 0x0c]);

    #[test]
    fn empty_store_loads_empty_config_with_device_id() {
        let store = MemoryConfigStore::new(HW);
        let config = store.load();
        assert!(!config.valid());
        assert_eq!(config.device_id, "smartlight_0a0b0c");
    }

    #[test]
    fn save_then_load() {
        let store = MemoryConfigStore::new(HW);
        let mut config = store.load();
        config.network_name = "HomeNet".into();
        config.controller_address = "ws://10.0.0.2/ws".into();
        store.save(&config).unwrap();

        assert_eq!(store.load(), config);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn read_only_store_rejects_saves() {
        let store = MemoryConfigStore::new(HW);
        store.set_read_only(true);
        let err = store.save(&DeviceConfig::empty()).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert_eq!(store.save_count(), 0);
    }
}
