//! Simulated radio: station link, setup access point and the short-range
//! provisioning channel. Outcomes are reported through the `EventSink`
//! the way a real radio stack reports them from its event task.

use std::net::{IpAddr, Ipv4Addr};

use parking_lot::Mutex;
use secrecy::SecretString;
use tracing::{debug, info};

use smartlight_core::config::AccessPointConfig;
use smartlight_core::{
    EventSink, HalError, LinkDriver, LinkEvent, NetworkCredentials, ProvisioningEvent,
    ProvisioningTransport, RawCredentials,
};

const STATION_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ── Link ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RadioState {
    network: Option<String>,
    access_point: Option<String>,
}

/// Joins any network with a non-empty name and reports the loopback
/// address as the acquired station address.
pub struct SimLink {
    events: EventSink,
    state: Mutex<RadioState>,
}

impl SimLink {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            state: Mutex::new(RadioState::default()),
        }
    }
}

impl LinkDriver for SimLink {
    fn start(&self, credentials: &NetworkCredentials) -> Result<(), HalError> {
        if credentials.name.is_empty() {
            return Err(HalError::Failed {
                device: "radio",
                reason: "network name is empty".into(),
            });
        }
        self.state.lock().network = Some(credentials.name.clone());
        debug!(network = %credentials.name, "station started");
        self.events.link(LinkEvent::Started);
        Ok(())
    }

    fn connect(&self) -> Result<(), HalError> {
        let Some(network) = self.state.lock().network.clone() else {
            return Err(HalError::Failed {
                device: "radio",
                reason: "station not started".into(),
            });
        };
        info!(%network, address = %STATION_ADDRESS, "Joined network");
        self.events.link(LinkEvent::AddressAcquired(STATION_ADDRESS));
        Ok(())
    }

    fn stop(&self) -> Result<(), HalError> {
        let mut state = self.state.lock();
        state.network = None;
        if let Some(name) = state.access_point.take() {
            info!(access_point = %name, "Closed setup access point");
        }
        Ok(())
    }

    fn start_access_point(&self, config: &AccessPointConfig) -> Result<(), HalError> {
        self.state.lock().access_point = Some(config.name.clone());
        info!(
            access_point = %config.name,
            channel = config.channel,
            max_peers = config.max_peers,
            "Opened setup access point"
        );
        Ok(())
    }
}

// ── Provisioning channel ─────────────────────────────────────────────

/// Advertises nothing; when a preset is configured it is delivered as
/// soon as a session starts, as if a phone had sent it.
pub struct SimProvisioning {
    events: EventSink,
    preset: Option<RawCredentials>,
    advertising: Mutex<Option<String>>,
}

impl SimProvisioning {
    pub fn new(events: EventSink, preset: Option<RawCredentials>) -> Self {
        Self {
            events,
            preset,
            advertising: Mutex::new(None),
        }
    }
}

impl ProvisioningTransport for SimProvisioning {
    fn start(&self, service_name: &str, _proof_of_possession: &SecretString) -> Result<(), HalError> {
        *self.advertising.lock() = Some(service_name.to_owned());
        info!(service = %service_name, "Advertising provisioning service");

        if let Some(ref preset) = self.preset {
            debug!(network = %preset.network_name, "delivering preset credentials");
            self.events
                .provisioning(ProvisioningEvent::Credentials(preset.clone()));
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), HalError> {
        if let Some(service) = self.advertising.lock().take() {
            debug!(%service, "provisioning service stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use smartlight_core::event_channels;

    use super::*;

    #[test]
    fn start_then_connect_reports_address() {
        let (sink, mut events) = event_channels();
        let link = SimLink::new(sink);

        link.start(&NetworkCredentials::new("HomeNet", "pw")).unwrap();
        link.connect().unwrap();

        assert!(matches!(events.link.try_recv(), Ok(LinkEvent::Started)));
        assert!(matches!(
            events.link.try_recv(),
            Ok(LinkEvent::AddressAcquired(addr)) if addr == STATION_ADDRESS
        ));
    }

    #[test]
    fn connect_without_start_fails() {
        let (sink, _events) = event_channels();
        let link = SimLink::new(sink);
        assert!(link.connect().is_err());
    }

    #[test]
    fn preset_credentials_arrive_on_start() {
        let (sink, mut events) = event_channels();
        let transport = SimProvisioning::new(
            sink,
            Some(RawCredentials::new("HomeNet", "pw|ws:ws://10.0.0.2:81/devices")),
        );

        transport
            .start("SmartLight_000001", &SecretString::from("abcd1234".to_owned()))
            .unwrap();

        match events.provisioning.try_recv().unwrap() {
            ProvisioningEvent::Credentials(raw) => assert_eq!(raw.network_name, "HomeNet"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
