//! Domain value types shared by the codec and the driver.
//!
//! Nothing in here touches the network.  These are the words the rest of the
//! workspace uses to talk about bulbs: what color they show and which piece of
//! hardware they are.

/// HSBK color representation used on the wire.
pub mod color;

/// Device identifiers and hardware vendor/product identification.
pub mod hardware;
