//! Network infrastructure for the driver.
//!
//! # Sub-modules
//!
//! - **`dispatch`** – The single reader of the driver's UDP socket.  Decodes
//!   each datagram and hands it to the packet router on its own task, until
//!   shutdown is signalled or the socket fails.

pub mod dispatch;
