//! Binary codec for LAN protocol packets.
//!
//! Wire format (all multi-byte integers little-endian):
//! ```text
//! frame          [size:2][protocol:12|addressable:1|tagged:1|origin:2][source:4]
//! frame address  [target:8][reserved:6][res_required:1|ack_required:1|reserved:6][sequence:1]
//! protocol       [reserved:8][type:2][reserved:2]
//! payload        [..size-36]
//! ```
//! Total header size: 36 bytes.

use thiserror::Error;

use crate::protocol::messages::{Message, MessageType, HEADER_SIZE, PROTOCOL_NUMBER};

const PROTOCOL_MASK: u16 = 0x0FFF;
const ADDRESSABLE_BIT: u16 = 1 << 12;
const TAGGED_BIT: u16 = 1 << 13;
const RES_REQUIRED_BIT: u8 = 1 << 0;
const ACK_REQUIRED_BIT: u8 = 1 << 1;

/// Errors that can occur during packet encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The size field in the header disagrees with the datagram.
    #[error("size mismatch: header says {declared}, datagram has {available}")]
    SizeMismatch { declared: usize, available: usize },

    /// The protocol number is not 1024.
    #[error("unsupported protocol number: {0}")]
    UnsupportedProtocol(u16),

    /// The addressable bit is clear.
    #[error("packet is not addressable")]
    NotAddressable,

    /// The message type has no typed form in this crate.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// A decoded packet: header fields plus the raw payload.
///
/// Routing only needs the header, so the payload stays as bytes until a
/// consumer asks for [`Packet::message`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// `true` when `target` is ignored and every device should act.
    pub tagged: bool,
    /// Identifier of the client that issued the request this packet belongs to.
    pub source: u32,
    /// Addressed device, `0` for all devices.
    pub target: u64,
    pub ack_required: bool,
    pub res_required: bool,
    /// Wrap-around sequence number echoed by replies.
    pub sequence: u8,
    /// Raw message type code.
    pub kind: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds an untargeted packet carrying `message`.
    pub fn new(message: &Message) -> Self {
        Self {
            kind: message.message_type() as u16,
            payload: message.encode_payload(),
            ..Self::default()
        }
    }

    /// Total encoded size in bytes.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Returns the typed message type, or `None` for codes this crate does not model.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.kind).ok()
    }

    /// Decodes the payload into a typed [`Message`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] for unknown types or malformed payloads.
    pub fn message(&self) -> Result<Message, ProtocolError> {
        Message::decode(self.kind, &self.payload)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into a datagram.
///
/// # Examples
///
/// ```rust
/// use lifx_core::protocol::{decode_packet, encode_packet, Message, Packet};
///
/// let mut pkt = Packet::new(&Message::GetService);
/// pkt.tagged = true;
/// pkt.source = 42;
/// let bytes = encode_packet(&pkt);
/// assert_eq!(bytes.len(), 36);
/// assert_eq!(decode_packet(&bytes).unwrap(), pkt);
/// ```
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let size = packet.size();
    let mut buf = Vec::with_capacity(size);

    // Frame
    buf.extend_from_slice(&(size as u16).to_le_bytes());
    let mut flags = (PROTOCOL_NUMBER & PROTOCOL_MASK) | ADDRESSABLE_BIT;
    if packet.tagged {
        flags |= TAGGED_BIT;
    }
    buf.extend_from_slice(&flags.to_le_bytes());
    buf.extend_from_slice(&packet.source.to_le_bytes());

    // Frame address
    buf.extend_from_slice(&packet.target.to_le_bytes());
    buf.extend_from_slice(&[0x00; 6]); // reserved
    let mut required = 0u8;
    if packet.res_required {
        required |= RES_REQUIRED_BIT;
    }
    if packet.ack_required {
        required |= ACK_REQUIRED_BIT;
    }
    buf.push(required);
    buf.push(packet.sequence);

    // Protocol header
    buf.extend_from_slice(&[0x00; 8]); // reserved
    buf.extend_from_slice(&packet.kind.to_le_bytes());
    buf.extend_from_slice(&[0x00; 2]); // reserved

    buf.extend_from_slice(&packet.payload);
    buf
}

/// Decodes one datagram into a [`Packet`].
///
/// Bytes beyond the declared size are ignored.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is truncated, inconsistent, or
/// belongs to another protocol.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let declared = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    if declared < HEADER_SIZE || declared > bytes.len() {
        return Err(ProtocolError::SizeMismatch {
            declared,
            available: bytes.len(),
        });
    }

    let flags = u16::from_le_bytes([bytes[2], bytes[3]]);
    let protocol = flags & PROTOCOL_MASK;
    if protocol != PROTOCOL_NUMBER {
        return Err(ProtocolError::UnsupportedProtocol(protocol));
    }
    if flags & ADDRESSABLE_BIT == 0 {
        return Err(ProtocolError::NotAddressable);
    }

    let source = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let mut target = [0u8; 8];
    target.copy_from_slice(&bytes[8..16]);
    // bytes[16..22] are reserved – ignored on decode
    let required = bytes[22];
    let sequence = bytes[23];
    // bytes[24..32] are reserved
    let kind = u16::from_le_bytes([bytes[32], bytes[33]]);

    Ok(Packet {
        tagged: flags & TAGGED_BIT != 0,
        source,
        target: u64::from_le_bytes(target),
        ack_required: required & ACK_REQUIRED_BIT != 0,
        res_required: required & RES_REQUIRED_BIT != 0,
        sequence,
        kind,
        payload: bytes[HEADER_SIZE..declared].to_vec(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
