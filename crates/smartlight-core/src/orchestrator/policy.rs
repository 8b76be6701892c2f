//! Reconciliation policy.
//!
//! [`plan`] looks at one snapshot of every component and decides which
//! commands the orchestrator issues this tick. It is pure: all side
//! effects happen in the orchestrator, which makes the mode transitions
//! testable without a runtime.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::{ConfigDelta, DeviceConfig, NetworkCredentials};
use crate::link::{LinkState, LinkStatus};
use crate::provisioning::{ProvisioningState, ProvisioningStatus};
use crate::session::{SessionState, SessionStatus};

/// Externally visible operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// No usable configuration, or provisioning is running.
    Setup,
    /// Link up and controller session running.
    Operational,
    /// Configured, but link or session is down.
    Recovering,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub now: Instant,
    pub config: Arc<DeviceConfig>,
    pub link: LinkStatus,
    pub provisioning: ProvisioningStatus,
    pub session: SessionStatus,
    pub reset_requested: bool,
}

/// State the policy carries between ticks.
#[derive(Debug, Default)]
pub struct PolicyMemory {
    /// When a succeeded provisioning may reload the stored config.
    pub reload_due: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    FactoryReset,
    MarkProvisioned,
    ReloadConfig,
    /// Take provisioned settings into the in-memory config only.
    AdoptConfig(ConfigDelta),
    FinishProvisioning,
    StartLink(NetworkCredentials),
    StopLink,
    BeginProvisioning,
    StopSession,
    StartSession,
}

pub fn derive_mode(snapshot: &Snapshot) -> Mode {
    if !snapshot.config.valid() || snapshot.provisioning.state.is_in_progress() {
        Mode::Setup
    } else if snapshot.link.state == LinkState::Up
        && snapshot.session.state != SessionState::Stopped
    {
        Mode::Operational
    } else {
        Mode::Recovering
    }
}

/// Decide this tick's commands, in the order they must be applied.
pub fn plan(snapshot: &Snapshot, memory: &mut PolicyMemory, grace: Duration) -> Vec<Directive> {
    if snapshot.reset_requested {
        return vec![Directive::FactoryReset];
    }

    let mut directives = Vec::new();
    let link = &snapshot.link;

    // A session never outlives the link.
    if snapshot.session.state != SessionState::Stopped && link.state != LinkState::Up {
        directives.push(Directive::StopSession);
    }

    if link.state == LinkState::Failed {
        memory.reload_due = None;
        directives.push(Directive::StopLink);
        directives.push(Directive::BeginProvisioning);
        return directives;
    }

    match snapshot.provisioning.state {
        ProvisioningState::CredentialsReceived => {
            if let Some(ref pending) = snapshot.provisioning.pending {
                let joined = link.state == LinkState::Up
                    && link.network.as_deref() == Some(pending.credentials.name.as_str());
                if joined {
                    directives.push(Directive::MarkProvisioned);
                } else {
                    directives.push(Directive::StartLink(pending.credentials.clone()));
                }
            }
            return directives;
        }
        ProvisioningState::Succeeded => {
            let due = *memory.reload_due.get_or_insert(snapshot.now + grace);
            if snapshot.provisioning.committed && snapshot.now >= due {
                directives.push(Directive::ReloadConfig);
            }
            return directives;
        }
        ProvisioningState::SessionStarted => return directives,
        ProvisioningState::Failed => {
            memory.reload_due = None;
            recover_from_failed_provisioning(snapshot, &mut directives);
            return directives;
        }
        ProvisioningState::Idle => memory.reload_due = None,
    }

    let config = &snapshot.config;
    let session = &snapshot.session;

    if config.valid()
        && link.state == LinkState::Up
        && session.state == SessionState::Stopped
        && session.retry_after.is_none_or(|at| snapshot.now >= at)
    {
        directives.push(Directive::StartSession);
    }

    if link.state == LinkState::Idle && !link.access_point {
        match config.credentials() {
            Some(credentials) if config.valid() => {
                directives.push(Directive::StartLink(credentials));
            }
            _ => directives.push(Directive::BeginProvisioning),
        }
    }

    directives
}

/// A failed session whose credentials are still pending joined the network
/// but could not save; run on them from memory. Otherwise fall back to the
/// stored network, or provision again.
fn recover_from_failed_provisioning(snapshot: &Snapshot, directives: &mut Vec<Directive>) {
    directives.push(Directive::FinishProvisioning);
    if let Some(ref pending) = snapshot.provisioning.pending {
        directives.push(Directive::AdoptConfig(pending.to_delta()));
        return;
    }

    let config = &snapshot.config;
    match config.credentials() {
        Some(credentials) if config.valid() => directives.push(Directive::StartLink(credentials)),
        _ => {
            if snapshot.link.state != LinkState::Idle {
                directives.push(Directive::StopLink);
            }
            directives.push(Directive::BeginProvisioning);
        }
    }
}
