//! Host-side stand-ins for the device hardware.
//!
//! The controller session is real (WebSocket); everything else is
//! simulated so the orchestrator can run on a workstation.

mod actuators;
mod lighting;
mod radio;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use smartlight_core::{
    HardwareId, LightingDriver, Platform, RawCredentials, ResetInput, WebSocketConnector,
    event_channels,
};

use actuators::SimActuators;
use radio::{SimLink, SimProvisioning};

pub use lighting::SimLightStrip;

/// Name of the file whose presence holds the simulated reset button down.
pub const RESET_BUTTON_FILE: &str = "reset.button";

/// Reset button pressed while its marker file exists.
pub struct SimResetButton {
    marker: PathBuf,
}

impl SimResetButton {
    pub fn new(dir: &Path) -> Self {
        Self {
            marker: dir.join(RESET_BUTTON_FILE),
        }
    }
}

impl ResetInput for SimResetButton {
    fn is_pressed(&self) -> bool {
        self.marker.exists()
    }
}

pub struct SimOptions<'a> {
    pub hardware_id: HardwareId,
    pub led_count: u16,
    pub preset: Option<RawCredentials>,
    pub config_dir: &'a Path,
}

/// A fresh platform for one orchestrator run, plus the light strip so
/// the caller can report what it shows.
pub fn platform(options: &SimOptions<'_>) -> (Platform, Arc<SimLightStrip>) {
    let (sink, events) = event_channels();
    let lighting = Arc::new(SimLightStrip::new(options.led_count));

    let platform = Platform {
        hardware_id: options.hardware_id,
        link: Arc::new(SimLink::new(sink.clone())),
        provisioning: Arc::new(SimProvisioning::new(sink, options.preset.clone())),
        connector: Arc::new(WebSocketConnector),
        actuators: Arc::new(SimActuators::new()),
        lighting: Arc::clone(&lighting) as Arc<dyn LightingDriver>,
        reset: Arc::new(SimResetButton::new(options.config_dir)),
        events,
    };
    (platform, lighting)
}
