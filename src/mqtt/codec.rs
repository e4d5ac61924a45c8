//! Wire format for operator commands and device telemetry.
//!
//! All format knowledge lives here. Outbound commands are JSON objects tagged
//! by `command`, inbound telemetry is tagged by `type`:
//!
//! ```text
//! → {"command":"display_to_console","message":"Lot full"}
//! → {"command":"warning","state":"on"}
//! → {"command":"toggle_spot","spot":2}
//!
//! ← {"type":"occupancy","spot":2,"occupied":true}
//! ← {"type":"spots","occupied":[false,true,false,false,true]}
//! ← {"type":"warning","state":"off"}
//! ← {"type":"display","message":"Lot full"}
//! ← {"type":"status","status":"online"}
//! ```
//!
//! Decoding never panics; every failure is a [`DecodeError`] which the bridge
//! turns into a diagnostic log line.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::message_manager::TelemetryMessage;
use crate::dashboard::SPOT_COUNT;

/// Operator intent forwarded to the field device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ToggleSpot(usize),
    SetWarning(bool),
    SetDisplayMessage(String),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ToggleSpot(_) => "toggle_spot",
            Command::SetWarning(_) => "warning",
            Command::SetDisplayMessage(_) => "display_to_console",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl From<SwitchState> for bool {
    fn from(state: SwitchState) -> Self {
        state == SwitchState::On
    }
}

// Field order is the serialization order.
#[derive(Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum CommandPayload<'a> {
    DisplayToConsole { message: &'a str },
    Warning { state: SwitchState },
    ToggleSpot { spot: usize },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TelemetryPayload {
    Occupancy { spot: usize, occupied: bool },
    Spots { occupied: Vec<bool> },
    Warning { state: SwitchState },
    Display { message: String },
    Status { status: String },
}

/// Typed content of an inbound telemetry message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    SpotOccupancy { spot: usize, occupied: bool },
    SpotSnapshot([bool; SPOT_COUNT]),
    Warning(bool),
    DisplayEcho(String),
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    MalformedPayload,
    UnknownTopic,
    EncodingError,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeErrorKind::MalformedPayload => "malformed payload",
            DecodeErrorKind::UnknownTopic => "unknown topic",
            DecodeErrorKind::EncodingError => "encoding error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub detail: String,
}

impl DecodeError {
    fn new(kind: DecodeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("Failed to encode {kind} command: {source}")]
pub struct EncodeError {
    kind: &'static str,
    #[source]
    source: serde_json::Error,
}

/// Stateless apart from the topic filters inbound messages must match.
#[derive(Debug, Clone)]
pub struct Codec {
    telemetry_filters: Vec<String>,
}

impl Codec {
    pub fn new(telemetry_filters: Vec<String>) -> Self {
        Self { telemetry_filters }
    }

    pub fn encode_command(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let payload = match command {
            Command::ToggleSpot(spot) => CommandPayload::ToggleSpot { spot: *spot },
            Command::SetWarning(on) => CommandPayload::Warning {
                state: SwitchState::from(*on),
            },
            Command::SetDisplayMessage(message) => CommandPayload::DisplayToConsole {
                message: message.as_str(),
            },
        };

        serde_json::to_vec(&payload).map_err(|source| EncodeError {
            kind: command.kind(),
            source,
        })
    }

    pub fn decode_telemetry(&self, message: &TelemetryMessage) -> Result<DecodedMessage, DecodeError> {
        if !self
            .telemetry_filters
            .iter()
            .any(|filter| rumqttc::matches(message.topic(), filter))
        {
            return Err(DecodeError::new(
                DecodeErrorKind::UnknownTopic,
                format!("no subscription matches '{}'", message.topic()),
            ));
        }

        let text = std::str::from_utf8(message.payload())
            .map_err(|e| DecodeError::new(DecodeErrorKind::EncodingError, e.to_string()))?;

        let payload: TelemetryPayload = serde_json::from_str(text)
            .map_err(|e| DecodeError::new(DecodeErrorKind::MalformedPayload, e.to_string()))?;

        match payload {
            TelemetryPayload::Occupancy { spot, occupied } => {
                if spot >= SPOT_COUNT {
                    return Err(DecodeError::new(
                        DecodeErrorKind::MalformedPayload,
                        format!("spot {} out of range 0..{}", spot, SPOT_COUNT),
                    ));
                }
                Ok(DecodedMessage::SpotOccupancy { spot, occupied })
            }
            TelemetryPayload::Spots { occupied } => {
                let spots: [bool; SPOT_COUNT] = occupied.as_slice().try_into().map_err(|_| {
                    DecodeError::new(
                        DecodeErrorKind::MalformedPayload,
                        format!("expected {} spots, got {}", SPOT_COUNT, occupied.len()),
                    )
                })?;
                Ok(DecodedMessage::SpotSnapshot(spots))
            }
            TelemetryPayload::Warning { state } => Ok(DecodedMessage::Warning(state.into())),
            TelemetryPayload::Display { message } => Ok(DecodedMessage::DisplayEcho(message)),
            TelemetryPayload::Status { status } => Ok(DecodedMessage::Status(status)),
        }
    }
}
