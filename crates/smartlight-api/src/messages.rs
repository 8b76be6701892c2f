//! Controller session messages.
//!
//! Every frame is a JSON object discriminated by its `type` field.
//! Outbound frames are produced by the device (registration and
//! heartbeat); inbound frames are commands from the controller.
//! Unrecognised inbound types decode to [`Inbound::Unknown`] so callers
//! can log and drop them without treating them as errors.

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Outbound ─────────────────────────────────────────────────────────

/// Reported position of one actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoAngle {
    pub angle: u8,
}

/// Device → controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Sent once per opened connection.
    Register {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    /// Periodic liveness signal carrying both actuator positions.
    Heartbeat { servo1: ServoAngle, servo2: ServoAngle },
}

impl Outbound {
    pub fn to_text(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// Controller → device.
///
/// Numeric fields of `set_servo` are kept wide so range checks happen in
/// the dispatcher, where a bad value is logged instead of failing decode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    SetServo {
        id: i64,
        angle: i64,
        #[serde(default = "default_smooth")]
        smooth: bool,
    },
    SetLedColor {
        r: u8,
        g: u8,
        b: u8,
    },
    SetLedBrightness {
        brightness: u8,
    },
    ClearLeds,
    Ack,
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    /// Any `type` this firmware does not understand.
    #[serde(skip)]
    Unknown { kind: String },
}

fn default_smooth() -> bool {
    true
}

impl Inbound {
    const KNOWN_TYPES: [&'static str; 6] = [
        "set_servo",
        "set_led_color",
        "set_led_brightness",
        "clear_leds",
        "ack",
        "error",
    ];

    /// Decode a text frame.
    ///
    /// Fails only when the frame is not a JSON object with a string `type`,
    /// or when a known type carries malformed fields.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.to_owned(),
            })?;

        let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(Error::Deserialization {
                message: "missing `type` discriminator".into(),
                body: text.to_owned(),
            });
        };

        if !Self::KNOWN_TYPES.contains(&kind) {
            return Ok(Self::Unknown {
                kind: kind.to_owned(),
            });
        }

        serde_json::from_value(value).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &str {
        match self {
            Self::SetServo { .. } => "set_servo",
            Self::SetLedColor { .. } => "set_led_color",
            Self::SetLedBrightness { .. } => "set_led_brightness",
            Self::ClearLeds => "clear_leds",
            Self::Ack => "ack",
            Self::Error { .. } => "error",
            Self::Unknown { kind } => kind.as_str(),
        }
    }
}
