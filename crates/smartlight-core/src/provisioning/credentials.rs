//! Parsing of credentials delivered over the provisioning transport.
//!
//! Provisioning apps only know two fields (network name and secret), so a
//! controller address rides inside the secret after a fixed delimiter:
//!
//! ```text
//! mypass|ws:ws://controller.local:81/devices
//! ^^^^^^    ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^
//! secret    controller address
//! ```

use secrecy::{ExposeSecret, SecretString};

use crate::config::{CONTROLLER_ADDRESS_MAX, ConfigDelta, NetworkCredentials, truncate_field};

pub const CONTROLLER_ADDRESS_DELIMITER: &str = "|ws:";

/// Credentials exactly as the transport delivered them.
#[derive(Debug, Clone)]
pub struct RawCredentials {
    pub network_name: String,
    pub secret: SecretString,
}

impl RawCredentials {
    pub fn new(network_name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            network_name: network_name.into(),
            secret: SecretString::from(secret.into()),
        }
    }
}

/// Network credentials plus the optional embedded controller address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCredentials {
    pub credentials: NetworkCredentials,
    pub controller_address: Option<String>,
}

impl ParsedCredentials {
    pub fn to_delta(&self) -> ConfigDelta {
        ConfigDelta {
            network: Some(self.credentials.clone()),
            controller_address: self.controller_address.clone(),
            device_id: None,
        }
    }
}

/// Split the secret at the first delimiter. An empty address after the
/// delimiter counts as no address. All fields are truncated to their limits.
pub fn parse(raw: &RawCredentials) -> ParsedCredentials {
    let blob = raw.secret.expose_secret();
    let (secret, address) = match blob.split_once(CONTROLLER_ADDRESS_DELIMITER) {
        Some((secret, address)) => (secret, Some(address)),
        None => (blob, None),
    };

    ParsedCredentials {
        credentials: NetworkCredentials::new(&raw.network_name, secret),
        controller_address: address
            .filter(|a| !a.is_empty())
            .map(|a| truncate_field("controller_address", a, CONTROLLER_ADDRESS_MAX)),
    }
}
