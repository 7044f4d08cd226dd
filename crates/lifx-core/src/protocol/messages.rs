//! LAN protocol message types and their payloads.
//!
//! Only the messages the driver and its devices exchange are modelled.  Other
//! message types still decode as a [`Packet`](super::codec::Packet) with a raw
//! payload, they just have no typed [`Message`] form.

use serde::{Deserialize, Serialize};

use crate::domain::color::{Color, COLOR_WIRE_SIZE};
use crate::protocol::codec::ProtocolError;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Protocol number carried in every header.
pub const PROTOCOL_NUMBER: u16 = 1024;

/// Total size of the frame, frame-address and protocol headers in bytes.
pub const HEADER_SIZE: usize = 36;

/// Well-known UDP port devices listen on.
pub const DEFAULT_PORT: u16 = 56700;

/// Largest datagram the driver reads in one go.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Service code for UDP in a StateService payload.
pub const SERVICE_UDP: u8 = 1;

/// Power level reported by a device that is on.
pub const POWER_ON: u16 = u16::MAX;

/// Power level reported by a device that is off.
pub const POWER_OFF: u16 = 0;

/// Fixed width of label fields.
pub const LABEL_SIZE: usize = 32;

// ── Message type codes ────────────────────────────────────────────────────────

/// Message type codes understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum MessageType {
    // Device messages
    GetService = 2,
    StateService = 3,
    GetPower = 20,
    SetPower = 21,
    StatePower = 22,
    GetLabel = 23,
    SetLabel = 24,
    StateLabel = 25,
    GetVersion = 32,
    StateVersion = 33,
    Acknowledgement = 45,
    // Light messages
    LightGet = 101,
    LightSetColor = 102,
    LightState = 107,
    LightSetPower = 117,
    LightStatePower = 118,
}

impl TryFrom<u16> for MessageType {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, ()> {
        match value {
            2 => Ok(MessageType::GetService),
            3 => Ok(MessageType::StateService),
            20 => Ok(MessageType::GetPower),
            21 => Ok(MessageType::SetPower),
            22 => Ok(MessageType::StatePower),
            23 => Ok(MessageType::GetLabel),
            24 => Ok(MessageType::SetLabel),
            25 => Ok(MessageType::StateLabel),
            32 => Ok(MessageType::GetVersion),
            33 => Ok(MessageType::StateVersion),
            45 => Ok(MessageType::Acknowledgement),
            101 => Ok(MessageType::LightGet),
            102 => Ok(MessageType::LightSetColor),
            107 => Ok(MessageType::LightState),
            117 => Ok(MessageType::LightSetPower),
            118 => Ok(MessageType::LightStatePower),
            _ => Err(()),
        }
    }
}

// ── Typed messages ────────────────────────────────────────────────────────────

/// A typed message payload.
///
/// Durations are carried in milliseconds, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Broadcast discovery request; every device answers with `StateService`.
    GetService,
    /// Discovery response naming the service and port the device listens on.
    StateService { service: u8, port: u32 },
    GetPower,
    SetPower { level: u16 },
    StatePower { level: u16 },
    GetLabel,
    SetLabel { label: String },
    StateLabel { label: String },
    /// Hardware identification request.
    GetVersion,
    StateVersion { vendor: u32, product: u32, version: u32 },
    /// Empty acknowledgement of a request sent with `ack_required`.
    Acknowledgement,
    /// Full light state request; answered with `LightState`.
    LightGet,
    LightSetColor { color: Color, duration_ms: u32 },
    LightState { color: Color, power: u16, label: String },
    LightSetPower { level: u16, duration_ms: u32 },
    LightStatePower { level: u16 },
}

impl Message {
    /// Returns the [`MessageType`] tag for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::GetService => MessageType::GetService,
            Message::StateService { .. } => MessageType::StateService,
            Message::GetPower => MessageType::GetPower,
            Message::SetPower { .. } => MessageType::SetPower,
            Message::StatePower { .. } => MessageType::StatePower,
            Message::GetLabel => MessageType::GetLabel,
            Message::SetLabel { .. } => MessageType::SetLabel,
            Message::StateLabel { .. } => MessageType::StateLabel,
            Message::GetVersion => MessageType::GetVersion,
            Message::StateVersion { .. } => MessageType::StateVersion,
            Message::Acknowledgement => MessageType::Acknowledgement,
            Message::LightGet => MessageType::LightGet,
            Message::LightSetColor { .. } => MessageType::LightSetColor,
            Message::LightState { .. } => MessageType::LightState,
            Message::LightSetPower { .. } => MessageType::LightSetPower,
            Message::LightStatePower { .. } => MessageType::LightStatePower,
        }
    }

    /// Returns the message type this request is answered with, if it expects
    /// a response at all.
    pub fn response_type(&self) -> Option<MessageType> {
        match self {
            Message::GetService => Some(MessageType::StateService),
            Message::GetPower => Some(MessageType::StatePower),
            Message::GetLabel => Some(MessageType::StateLabel),
            Message::GetVersion => Some(MessageType::StateVersion),
            Message::LightGet => Some(MessageType::LightState),
            _ => None,
        }
    }

    /// Encodes the payload (everything after the 36-byte header).
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::GetService
            | Message::GetPower
            | Message::GetLabel
            | Message::GetVersion
            | Message::Acknowledgement
            | Message::LightGet => {} // empty payload
            Message::StateService { service, port } => {
                buf.push(*service);
                buf.extend_from_slice(&port.to_le_bytes());
            }
            Message::SetPower { level }
            | Message::StatePower { level }
            | Message::LightStatePower { level } => buf.extend_from_slice(&level.to_le_bytes()),
            Message::SetLabel { label } | Message::StateLabel { label } => {
                write_label(&mut buf, label)
            }
            Message::StateVersion {
                vendor,
                product,
                version,
            } => {
                buf.extend_from_slice(&vendor.to_le_bytes());
                buf.extend_from_slice(&product.to_le_bytes());
                buf.extend_from_slice(&version.to_le_bytes());
            }
            Message::LightSetColor { color, duration_ms } => {
                buf.push(0x00); // reserved
                color.write_to(&mut buf);
                buf.extend_from_slice(&duration_ms.to_le_bytes());
            }
            Message::LightState {
                color,
                power,
                label,
            } => {
                color.write_to(&mut buf);
                buf.extend_from_slice(&[0x00; 2]); // reserved
                buf.extend_from_slice(&power.to_le_bytes());
                write_label(&mut buf, label);
                buf.extend_from_slice(&[0x00; 8]); // reserved
            }
            Message::LightSetPower { level, duration_ms } => {
                buf.extend_from_slice(&level.to_le_bytes());
                buf.extend_from_slice(&duration_ms.to_le_bytes());
            }
        }
        buf
    }

    /// Decodes a payload of message type `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownMessageType`] for types without a typed
    /// form and [`ProtocolError::MalformedPayload`] for truncated payloads.
    pub fn decode(kind: u16, p: &[u8]) -> Result<Self, ProtocolError> {
        let msg_type =
            MessageType::try_from(kind).map_err(|_| ProtocolError::UnknownMessageType(kind))?;
        match msg_type {
            MessageType::GetService => Ok(Message::GetService),
            MessageType::GetPower => Ok(Message::GetPower),
            MessageType::GetLabel => Ok(Message::GetLabel),
            MessageType::GetVersion => Ok(Message::GetVersion),
            MessageType::Acknowledgement => Ok(Message::Acknowledgement),
            MessageType::LightGet => Ok(Message::LightGet),
            MessageType::StateService => {
                require_len(p, 5, "StateService")?;
                Ok(Message::StateService {
                    service: p[0],
                    port: read_u32(p, 1),
                })
            }
            MessageType::SetPower => {
                require_len(p, 2, "SetPower")?;
                Ok(Message::SetPower {
                    level: read_u16(p, 0),
                })
            }
            MessageType::StatePower => {
                require_len(p, 2, "StatePower")?;
                Ok(Message::StatePower {
                    level: read_u16(p, 0),
                })
            }
            MessageType::LightStatePower => {
                require_len(p, 2, "LightStatePower")?;
                Ok(Message::LightStatePower {
                    level: read_u16(p, 0),
                })
            }
            MessageType::SetLabel => {
                require_len(p, LABEL_SIZE, "SetLabel")?;
                Ok(Message::SetLabel {
                    label: read_label(&p[..LABEL_SIZE]),
                })
            }
            MessageType::StateLabel => {
                require_len(p, LABEL_SIZE, "StateLabel")?;
                Ok(Message::StateLabel {
                    label: read_label(&p[..LABEL_SIZE]),
                })
            }
            MessageType::StateVersion => {
                require_len(p, 12, "StateVersion")?;
                Ok(Message::StateVersion {
                    vendor: read_u32(p, 0),
                    product: read_u32(p, 4),
                    version: read_u32(p, 8),
                })
            }
            MessageType::LightSetColor => {
                // 1 (reserved) + 8 (hsbk) + 4 (duration)
                require_len(p, 13, "LightSetColor")?;
                let color = read_color(&p[1..], "LightSetColor")?;
                Ok(Message::LightSetColor {
                    color,
                    duration_ms: read_u32(p, 9),
                })
            }
            MessageType::LightState => {
                // 8 (hsbk) + 2 (reserved) + 2 (power) + 32 (label) + 8 (reserved)
                require_len(p, 52, "LightState")?;
                let color = read_color(p, "LightState")?;
                Ok(Message::LightState {
                    color,
                    power: read_u16(p, 10),
                    label: read_label(&p[12..12 + LABEL_SIZE]),
                })
            }
            MessageType::LightSetPower => {
                require_len(p, 6, "LightSetPower")?;
                Ok(Message::LightSetPower {
                    level: read_u16(p, 0),
                    duration_ms: read_u32(p, 2),
                })
            }
        }
    }
}

/// Converts a boolean power state into its wire level.
pub fn power_level(on: bool) -> u16 {
    if on {
        POWER_ON
    } else {
        POWER_OFF
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_color(buf: &[u8], context: &str) -> Result<Color, ProtocolError> {
    Color::read_from(buf).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!(
            "{context}: need {COLOR_WIRE_SIZE} bytes for color"
        ))
    })
}

/// Writes a fixed-width, NUL-padded label, truncating at a char boundary.
fn write_label(buf: &mut Vec<u8>, label: &str) {
    let mut end = label.len().min(LABEL_SIZE);
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    buf.extend_from_slice(&label.as_bytes()[..end]);
    buf.resize(buf.len() + (LABEL_SIZE - end), 0x00);
}

/// Reads a NUL-padded label; invalid UTF-8 is replaced rather than rejected.
fn read_label(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
