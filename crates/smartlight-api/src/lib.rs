// smartlight-api: controller session wire protocol and WebSocket transport

pub mod error;
pub mod messages;
pub mod target;
pub mod websocket;

pub use error::Error;
pub use messages::{Inbound, Outbound, ServoAngle};
pub use target::{Scheme, SessionTarget};
pub use websocket::{ReconnectConfig, SessionEvent, WebSocketSession, calculate_backoff};
