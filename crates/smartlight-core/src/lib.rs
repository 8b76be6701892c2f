// ── smartlight-core ──
//
// Connectivity and provisioning orchestrator for SmartLight actuator
// devices. Hardware is reached through the traits in `hal`; everything
// above them is portable and runs on tokio.

pub mod config;
pub mod error;
pub mod hal;
pub mod link;
pub mod orchestrator;
pub mod provisioning;
pub mod reset;
pub mod session;
pub mod store;
pub mod work;

// ── Primary re-exports ──────────────────────────────────────────────

pub use config::{
    AccessPointConfig, ConfigDelta, DeviceConfig, HardwareId, NetworkCredentials, RuntimeSettings,
};
pub use error::{CoreError, HalError, StorageError};
pub use hal::{
    ActuatorDriver, ActuatorStatus, EventSink, LightingDriver, LinkDriver, Platform,
    PlatformEvents, ProvisioningTransport, ResetInput, Rgb, event_channels,
};
pub use link::{LinkEvent, LinkState, LinkStatus, LinkSupervisor};
pub use orchestrator::{Mode, Orchestrator, RunOutcome, StatusReport};
pub use provisioning::{
    ProvisioningEvent, ProvisioningSession, ProvisioningState, ProvisioningStatus, RawCredentials,
};
pub use reset::{FactoryResetRequested, ResetWatchdog};
pub use session::{
    CommandDispatcher, SessionConnector, SessionManager, SessionState, SessionStatus,
    SessionTransport, WebSocketConnector,
};
pub use store::{ConfigStore, MemoryConfigStore};
