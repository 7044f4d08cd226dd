//! Protocol module containing message types and the binary codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_packet, encode_packet, Packet, ProtocolError};
pub use messages::*;
pub use sequence::SequenceCounter;
