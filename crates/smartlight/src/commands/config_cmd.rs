//! Config subcommand handlers.
//!
//! These edit `device.toml` directly; a running device picks the change
//! up on its next start.

use std::path::Path;

use secrecy::ExposeSecret;
use serde::Serialize;

use smartlight_api::SessionTarget;
use smartlight_config::{
    FileConfigStore, device_path, load_settings, resolve_config_dir, settings_path,
};
use smartlight_core::{ConfigDelta, ConfigStore, DeviceConfig, NetworkCredentials};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

// ── Helpers ─────────────────────────────────────────────────────────

/// Device config as printed by `config show`; the secret is masked.
#[derive(Serialize)]
struct ShownConfig<'a> {
    path: String,
    configured: bool,
    device_id: &'a str,
    network_name: &'a str,
    network_secret: &'static str,
    controller_address: &'a str,
}

impl<'a> ShownConfig<'a> {
    fn new(path: &Path, config: &'a DeviceConfig) -> Self {
        Self {
            path: path.display().to_string(),
            configured: config.valid(),
            device_id: &config.device_id,
            network_name: &config.network_name,
            network_secret: if config.network_secret.expose_secret().is_empty() {
                ""
            } else {
                "****"
            },
            controller_address: &config.controller_address,
        }
    }
}

fn open_store(dir: &Path) -> Result<FileConfigStore, CliError> {
    let settings = load_settings(dir)?;
    let store = FileConfigStore::new(dir, settings.hardware_id()?);
    store.init()?;
    Ok(store)
}

fn update(store: &FileConfigStore, delta: &ConfigDelta) -> Result<DeviceConfig, CliError> {
    let mut config = store.load();
    config.apply(delta);
    store.save(&config)?;
    Ok(config)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let dir = resolve_config_dir(global.config_dir.as_deref());

    match args.command {
        ConfigCommand::Path => {
            println!("settings: {}", settings_path(&dir).display());
            println!("device:   {}", device_path(&dir).display());
            Ok(())
        }

        ConfigCommand::Show => {
            let store = open_store(&dir)?;
            let config = store.load();
            print!("{}", toml::to_string_pretty(&ShownConfig::new(store.path(), &config))?);
            Ok(())
        }

        ConfigCommand::SetNetwork { name, secret } => {
            if name.trim().is_empty() {
                return Err(CliError::Validation {
                    field: "name".into(),
                    reason: "network name cannot be empty".into(),
                });
            }
            let secret = match secret {
                Some(secret) => secret,
                None => rpassword::prompt_password("Network secret: ")?,
            };

            let store = open_store(&dir)?;
            let config = update(
                &store,
                &ConfigDelta {
                    network: Some(NetworkCredentials::new(&name, &secret)),
                    ..ConfigDelta::default()
                },
            )?;
            eprintln!("✓ Network '{}' saved", config.network_name);
            Ok(())
        }

        ConfigCommand::SetAddress { address, device_id } => {
            let address = address.trim();
            let target = SessionTarget::parse(address)?;

            let store = open_store(&dir)?;
            update(
                &store,
                &ConfigDelta {
                    controller_address: Some(address.to_owned()),
                    device_id,
                    ..ConfigDelta::default()
                },
            )?;
            eprintln!("✓ Controller address saved ({})", target.url());
            Ok(())
        }

        ConfigCommand::Reset { yes } => {
            if !yes {
                return Err(CliError::NonInteractiveRequiresYes {
                    action: "config reset".into(),
                });
            }
            let store = open_store(&dir)?;
            store.erase()?;
            eprintln!("✓ Device configuration erased");
            Ok(())
        }
    }
}
