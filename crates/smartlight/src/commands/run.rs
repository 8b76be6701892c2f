//! `smartlight run`: drive the orchestrator on simulated hardware until
//! interrupted, rebuilding the device after every factory reset.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use smartlight_config::{FileConfigStore, load_settings, resolve_config_dir};
use smartlight_core::{
    ConfigStore, HardwareId, MemoryConfigStore, Orchestrator, RawCredentials, Rgb, RunOutcome,
    StatusReport,
};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::sim::{self, SimLightStrip, SimOptions};

#[derive(Serialize)]
struct FinalReport {
    #[serde(flatten)]
    status: StatusReport,
    lights: Vec<Rgb>,
}

/// Split a `NAME:SECRET` blob at the first colon.
fn parse_provision(blob: &str) -> Result<RawCredentials, CliError> {
    match blob.split_once(':') {
        Some((name, secret)) if !name.is_empty() => Ok(RawCredentials::new(name, secret)),
        _ => Err(CliError::Validation {
            field: "--provision".into(),
            reason: "expected NAME:SECRET".into(),
        }),
    }
}

fn print_report(orchestrator: &Orchestrator, lights: &SimLightStrip) -> Result<(), CliError> {
    let report = FinalReport {
        status: orchestrator.status(),
        lights: lights.frame(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let dir = resolve_config_dir(global.config_dir.as_deref());
    let settings = load_settings(&dir)?;
    let hardware_id = match args.hardware_id.as_deref() {
        Some(raw) => raw.parse::<HardwareId>()?,
        None => settings.hardware_id()?,
    };
    let runtime = settings.into_runtime()?;
    let preset = args.provision.as_deref().map(parse_provision).transpose()?;

    let store: Arc<dyn ConfigStore> = if args.ephemeral {
        info!("Device configuration is in memory only");
        Arc::new(MemoryConfigStore::new(hardware_id))
    } else {
        Arc::new(FileConfigStore::new(&dir, hardware_id))
    };
    debug!(config_dir = %dir.display(), %hardware_id, "starting device");

    let interrupted = CancellationToken::new();
    let signal_task = tokio::spawn({
        let interrupted = interrupted.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                interrupted.cancel();
            }
        }
    });

    let options = SimOptions {
        hardware_id,
        led_count: settings.device.led_count,
        preset,
        config_dir: &dir,
    };

    let result = loop {
        let (platform, lights) = sim::platform(&options);
        let orchestrator = Orchestrator::new(platform, Arc::clone(&store), runtime.clone());

        let stopper = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let interrupted = interrupted.clone();
            async move {
                interrupted.cancelled().await;
                orchestrator.shutdown();
            }
        });
        let outcome = orchestrator.run().await;
        stopper.abort();

        match outcome {
            Ok(RunOutcome::Restart) if !interrupted.is_cancelled() => {
                info!("Restarting device");
            }
            Ok(_) => break print_report(&orchestrator, &lights),
            Err(e) => break Err(e.into()),
        }
    };

    signal_task.abort();
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn provision_blob_splits_at_first_colon() {
        let raw = parse_provision("HomeNet:pw|ws:ws://10.0.0.2:81/devices").unwrap();
        assert_eq!(raw.network_name, "HomeNet");
        assert_eq!(raw.secret.expose_secret(), "pw|ws:ws://10.0.0.2:81/devices");
    }

    #[test]
    fn provision_blob_allows_empty_secret() {
        let raw = parse_provision("OpenNet:").unwrap();
        assert_eq!(raw.secret.expose_secret(), "");
    }

    #[test]
    fn provision_blob_needs_a_name() {
        assert!(parse_provision("nocolon").is_err());
        assert!(parse_provision(":secret").is_err());
    }
}
