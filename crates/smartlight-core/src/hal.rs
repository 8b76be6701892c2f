// ── Hardware abstraction ──
//
// Traits for every driver the orchestrator talks to, plus the `Platform`
// bundle a board (or the simulator) hands to `Orchestrator::new`. Drivers
// report asynchronous happenings through an `EventSink`; the orchestrator
// owns the matching `PlatformEvents` receivers.

use std::ops::RangeInclusive;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{AccessPointConfig, HardwareId, NetworkCredentials};
use crate::error::HalError;
use crate::link::LinkEvent;
use crate::provisioning::ProvisioningEvent;
use crate::session::SessionConnector;

/// Valid actuator identifiers.
pub const ACTUATOR_IDS: RangeInclusive<u8> = 1..=2;
/// Largest commandable actuator angle, in degrees.
pub const MAX_ANGLE: u8 = 180;

// ── Link layer ───────────────────────────────────────────────────────

/// Wireless station / access-point radio.
///
/// Calls may block. Outcomes arrive later as [`LinkEvent`]s.
pub trait LinkDriver: Send + Sync {
    fn start(&self, credentials: &NetworkCredentials) -> Result<(), HalError>;
    fn connect(&self) -> Result<(), HalError>;
    fn stop(&self) -> Result<(), HalError>;
    fn start_access_point(&self, config: &AccessPointConfig) -> Result<(), HalError>;
}

// ── Provisioning transport ───────────────────────────────────────────

/// Short-range credential channel (BLE on hardware).
pub trait ProvisioningTransport: Send + Sync {
    /// Advertise under `service_name`, guarded by `proof_of_possession`.
    fn start(&self, service_name: &str, proof_of_possession: &SecretString)
    -> Result<(), HalError>;
    fn stop(&self) -> Result<(), HalError>;
}

// ── Actuators ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActuatorStatus {
    pub angle: u8,
    pub moving: bool,
}

pub trait ActuatorDriver: Send + Sync {
    /// Move actuator `id` to `angle`. Callers validate the ranges.
    fn move_to(&self, id: u8, angle: u8, smooth: bool) -> Result<(), HalError>;
    fn status(&self, id: u8) -> Option<ActuatorStatus>;
}

// ── Lighting ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Addressable light strip. Changes are staged until [`flush`](Self::flush).
pub trait LightingDriver: Send + Sync {
    fn set_color(&self, color: Rgb) -> Result<(), HalError>;
    fn set_brightness(&self, level: u8) -> Result<(), HalError>;
    fn clear(&self) -> Result<(), HalError>;
    fn flush(&self) -> Result<(), HalError>;
}

// ── Reset input ──────────────────────────────────────────────────────

pub trait ResetInput: Send + Sync {
    fn is_pressed(&self) -> bool;
}

// ── Platform bundle ──────────────────────────────────────────────────

/// Receivers for driver-originated events.
pub struct PlatformEvents {
    pub link: mpsc::UnboundedReceiver<LinkEvent>,
    pub provisioning: mpsc::UnboundedReceiver<ProvisioningEvent>,
}

/// Sender half handed to drivers. Sends never block.
#[derive(Clone)]
pub struct EventSink {
    link: mpsc::UnboundedSender<LinkEvent>,
    provisioning: mpsc::UnboundedSender<ProvisioningEvent>,
}

impl EventSink {
    pub fn link(&self, event: LinkEvent) {
        let _ = self.link.send(event);
    }

    pub fn provisioning(&self, event: ProvisioningEvent) {
        let _ = self.provisioning.send(event);
    }
}

pub fn event_channels() -> (EventSink, PlatformEvents) {
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let (prov_tx, prov_rx) = mpsc::unbounded_channel();
    (
        EventSink {
            link: link_tx,
            provisioning: prov_tx,
        },
        PlatformEvents {
            link: link_rx,
            provisioning: prov_rx,
        },
    )
}

/// Everything board-specific the orchestrator needs.
pub struct Platform {
    pub hardware_id: HardwareId,
    pub link: Arc<dyn LinkDriver>,
    pub provisioning: Arc<dyn ProvisioningTransport>,
    pub connector: Arc<dyn SessionConnector>,
    pub actuators: Arc<dyn ActuatorDriver>,
    pub lighting: Arc<dyn LightingDriver>,
    pub reset: Arc<dyn ResetInput>,
    pub events: PlatformEvents,
}
