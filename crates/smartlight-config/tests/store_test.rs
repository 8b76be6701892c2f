//! `FileConfigStore` against a real filesystem.
#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use secrecy::{ExposeSecret, SecretString};
use tempfile::TempDir;

use smartlight_config::{DEVICE_FILE, FileConfigStore, Settings, load_settings, save_settings};
use smartlight_core::{ConfigDelta, ConfigStore, DeviceConfig, HardwareId, NetworkCredentials};

const HW: HardwareId = HardwareId::new([0x24, 0x6f, 0x28, 0xdd, 0xee, 0xff]);

fn store() -> (TempDir, FileConfigStore) {
    let dir = TempDir::new().unwrap();
    let store = FileConfigStore::new(dir.path(), HW);
    (dir, store)
}

fn configured() -> DeviceConfig {
    let mut config = DeviceConfig::empty();
    config.apply(&ConfigDelta {
        network: Some(NetworkCredentials::new("HomeNet", "mypass")),
        controller_address: Some("ws://controller.local:81/devices".into()),
        device_id: Some("smartlight_ddeeff".into()),
    });
    config
}

// ── Round trip ──────────────────────────────────────────────────────

#[test]
fn save_then_load_round_trips() {
    let (_dir, store) = store();
    store.init().unwrap();
    store.save(&configured()).unwrap();

    let loaded = store.load();
    assert_eq!(loaded, configured());
    assert!(loaded.valid());
}

#[test]
fn save_leaves_no_temp_file_behind() {
    let (dir, store) = store();
    store.save(&configured()).unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![DEVICE_FILE.to_owned()]);
}

#[test]
fn save_creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("a").join("b");
    let store = FileConfigStore::new(&nested, HW);
    store.save(&configured()).unwrap();
    assert!(nested.join(DEVICE_FILE).exists());
}

// ── Device id ───────────────────────────────────────────────────────

#[test]
fn empty_store_generates_and_persists_device_id() {
    let (_dir, store) = store();
    store.init().unwrap();

    let config = store.load();
    assert!(!config.valid());
    assert_eq!(config.device_id, "smartlight_ddeeff");

    let text = std::fs::read_to_string(store.path()).unwrap();
    assert!(text.contains("device_id = \"smartlight_ddeeff\""));
}

#[test]
fn stored_device_id_is_kept() {
    let (_dir, store) = store();
    let mut config = configured();
    config.device_id = "custom_id".into();
    store.save(&config).unwrap();

    assert_eq!(store.load().device_id, "custom_id");
}

// ── Corruption handling ─────────────────────────────────────────────

#[test]
fn init_erases_undecodable_file() {
    let (_dir, store) = store();
    std::fs::write(store.path(), "this is = = not toml").unwrap();

    store.init().unwrap();
    assert!(!store.path().exists());
    assert_eq!(store.load().network_name, "");
}

#[test]
fn init_erases_version_mismatch() {
    let (_dir, store) = store();
    std::fs::write(
        store.path(),
        "version = 99\nnetwork_name = \"Old\"\ncontroller_address = \"ws://x:1/\"\n",
    )
    .unwrap();

    store.init().unwrap();
    assert!(!store.path().exists());
}

#[test]
fn init_keeps_valid_file() {
    let (_dir, store) = store();
    store.save(&configured()).unwrap();
    store.init().unwrap();
    assert_eq!(store.load().network_name, "HomeNet");
}

#[test]
fn load_of_corrupt_file_without_init_is_empty() {
    let (_dir, store) = store();
    std::fs::write(store.path(), "[[[").unwrap();
    let config = store.load();
    assert!(!config.valid());
    assert_eq!(config.device_id, "smartlight_ddeeff");
}

#[test]
fn over_long_stored_fields_are_truncated() {
    let (_dir, store) = store();
    let long_name = "N".repeat(50);
    std::fs::write(
        store.path(),
        format!("version = 1\nnetwork_name = \"{long_name}\"\nnetwork_secret = \"pw\"\n"),
    )
    .unwrap();

    let config = store.load();
    assert_eq!(config.network_name.len(), 32);
    assert_eq!(config.network_secret.expose_secret(), "pw");
}

#[test]
fn erase_is_idempotent() {
    let (_dir, store) = store();
    store.erase().unwrap();
    store.save(&configured()).unwrap();
    store.erase().unwrap();
    store.erase().unwrap();
    assert!(!store.path().exists());
}

#[test]
fn saved_secret_becomes_secret_string() {
    let (_dir, store) = store();
    let mut config = configured();
    config.network_secret = SecretString::from("hunter2".to_owned());
    store.save(&config).unwrap();
    assert_eq!(store.load().network_secret.expose_secret(), "hunter2");
}

// ── Settings file ───────────────────────────────────────────────────

#[test]
fn settings_file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.session.heartbeat_secs = 7;
    settings.device.hardware_id = "24:6f:28:dd:ee:ff".into();
    save_settings(dir.path(), &settings).unwrap();

    let loaded = load_settings(dir.path()).unwrap();
    assert_eq!(loaded.session.heartbeat_secs, 7);
    assert_eq!(loaded.hardware_id().unwrap(), HW);
    assert_eq!(
        loaded.into_runtime().unwrap().session.heartbeat_interval,
        std::time::Duration::from_secs(7)
    );
}

#[test]
fn missing_settings_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let loaded = load_settings(dir.path()).unwrap();
    assert_eq!(loaded.link.max_retries, 5);
    assert_eq!(loaded.device.led_count, 7);
}
