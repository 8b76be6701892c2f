//! Clap derive structures for the `smartlight` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// smartlight -- connected actuator firmware host
#[derive(Debug, Parser)]
#[command(
    name = "smartlight",
    version,
    about = "Run and configure a SmartLight actuator device",
    long_about = "Runs the SmartLight connectivity orchestrator on simulated hardware.\n\n\
        The device provisions network credentials, joins the network, and keeps\n\
        a registered session with its controller over WebSocket.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Directory holding settings.toml and device.toml
    #[arg(long, env = "SMARTLIGHT_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the device until interrupted
    Run(RunArgs),

    /// Inspect and edit the stored device configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Keep the device configuration in memory only
    #[arg(long)]
    pub ephemeral: bool,

    /// Credentials the simulated provisioning transport delivers, as
    /// NAME:SECRET (the secret may carry a |ws:<address> suffix)
    #[arg(long, value_name = "BLOB")]
    pub provision: Option<String>,

    /// Hardware identifier (overrides [device] hardware_id)
    #[arg(long, value_name = "MAC")]
    pub hardware_id: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the stored device configuration (secret redacted)
    Show,

    /// Print the configuration file locations
    Path,

    /// Store network credentials
    SetNetwork {
        /// Network name
        name: String,

        /// Network secret (prompted when omitted)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Store the controller address
    SetAddress {
        /// ws://host:port/path (scheme optional)
        address: String,

        /// Override the generated device id
        #[arg(long)]
        device_id: Option<String>,
    },

    /// Erase the stored device configuration
    Reset {
        /// Confirm the erase
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
