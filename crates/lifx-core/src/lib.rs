//! # lifx-core
//!
//! Shared library for the LIFX LAN driver containing the binary packet codec,
//! typed message payloads, and the small set of domain types (colors, hardware
//! identification) that both the driver and its devices speak in.
//!
//! This crate has no dependency on sockets or an async runtime.
//!
//! # Architecture overview
//!
//! Smart bulbs on the LAN are controlled with fixed-layout UDP datagrams.
//! Every datagram starts with a 36-byte header that names the sender (the
//! *source*), the addressed bulb (the *target*), a sequence number used to pair
//! replies with requests, and a message type.  A type-specific payload follows.
//!
//! - **`protocol`** – How bytes travel over the network.  [`decode_packet`]
//!   turns a datagram into a [`Packet`]; [`Message`] gives the payload a typed
//!   shape.
//!
//! - **`domain`** – Plain value types: [`Color`] and the hardware vendor/product
//!   constants used to decide whether a device is a light.

pub mod domain;
pub mod protocol;

pub use domain::color::Color;
pub use domain::hardware::{hardware_address, is_original_light, DeviceId};
pub use protocol::codec::{decode_packet, encode_packet, Packet, ProtocolError};
pub use protocol::messages::{Message, MessageType};
