//! Application layer: the use cases the driver is built from.
//!
//! Nothing here binds sockets or spawns the dispatch loop; the driver wires
//! these pieces together and the network layer feeds them packets.
//!
//! # Sub-modules
//!
//! - **`subscription_bus`** – Fan-out of `NewDevice` / `ExpiredDevice` events
//!   to every live subscriber.
//!
//! - **`device_registry`** – Map of known devices by hardware identifier, plus
//!   the registration step that identifies and promotes lights.
//!
//! - **`discover_devices`** – Expiry sweep followed by a discovery broadcast.
//!
//! - **`route_packet`** – Decides what each inbound packet means and who gets
//!   it.  Runs once per datagram.

pub mod device_registry;
pub mod discover_devices;
pub mod route_packet;
pub mod subscription_bus;
