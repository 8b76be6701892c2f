// ── Session target ──
//
// Decomposes a controller address (as typed by a user or delivered during
// provisioning) into the scheme/host/port/path the transport dials.
// Bare `host:port/path` addresses are treated as plain `ws://`.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::Error;

/// WebSocket scheme of a controller address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }

    /// Port implied by the scheme when the address does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }

    fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "http" => Some(Self::Ws),
            "wss" | "https" => Some(Self::Wss),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved controller endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    scheme: Scheme,
    host: String,
    port: u16,
    /// Path plus query, always starting with `/`.
    path: String,
}

impl SessionTarget {
    /// Parse a controller address.
    ///
    /// Accepts `ws://`, `wss://` and their `http(s)://` aliases. A missing
    /// scheme means `ws://`, a missing port is filled from the scheme and a
    /// missing path becomes `/`.
    pub fn parse(address: &str) -> Result<Self, Error> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(Error::EmptyAddress);
        }

        let url = if trimmed.contains("://") {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("ws://{trimmed}"))?
        };

        let scheme = Scheme::from_url_scheme(url.scheme())
            .ok_or_else(|| Error::UnsupportedScheme(url.scheme().to_owned()))?;

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_owned(),
            _ => return Err(Error::MissingHost(trimmed.to_owned())),
        };

        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let path = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_owned(),
        };
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        Ok(Self {
            scheme,
            host,
            port,
            path,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The URL the transport dials, always with an explicit port.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }
}

impl FromStr for SessionTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_and_path() {
        let target = SessionTarget::parse("ws://host:81/path").unwrap();
        assert_eq!(target.scheme(), Scheme::Ws);
        assert_eq!(target.host(), "host");
        assert_eq!(target.port(), 81);
        assert_eq!(target.path(), "/path");
        assert_eq!(target.url(), "ws://host:81/path");
    }

    #[test]
    fn secure_scheme_defaults_to_443() {
        let target = SessionTarget::parse("wss://controller.example.com").unwrap();
        assert_eq!(target.scheme(), Scheme::Wss);
        assert_eq!(target.port(), 443);
        assert_eq!(target.path(), "/");
    }

    #[test]
    fn plain_scheme_defaults_to_80() {
        let target = SessionTarget::parse("ws://10.0.0.5/devices").unwrap();
        assert_eq!(target.port(), 80);
        assert_eq!(target.url(), "ws://10.0.0.5:80/devices");
    }

    #[test]
    fn bare_address_is_plain_websocket() {
        let target = SessionTarget::parse("192.168.1.10:8080/ws").unwrap();
        assert_eq!(target.scheme(), Scheme::Ws);
        assert_eq!(target.host(), "192.168.1.10");
        assert_eq!(target.port(), 8080);
        assert_eq!(target.path(), "/ws");
    }

    #[test]
    fn http_aliases_map_to_websocket_schemes() {
        assert_eq!(
            SessionTarget::parse("https://example.com/ws").unwrap().scheme(),
            Scheme::Wss
        );
        assert_eq!(
            SessionTarget::parse("http://example.com/ws").unwrap().scheme(),
            Scheme::Ws
        );
    }

    #[test]
    fn query_is_kept_with_path() {
        let target = SessionTarget::parse("ws://host/ws?token=abc").unwrap();
        assert_eq!(target.path(), "/ws?token=abc");
    }

    #[test]
    fn rejects_empty_and_foreign_schemes() {
        assert!(matches!(
            SessionTarget::parse("   "),
            Err(Error::EmptyAddress)
        ));
        assert!(matches!(
            SessionTarget::parse("ftp://host/file"),
            Err(Error::UnsupportedScheme(s)) if s == "ftp"
        ));
    }
}
