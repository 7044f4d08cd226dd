//! Infrastructure layer for the driver.
//!
//! Contains the OS-facing adapters: the UDP dispatch loop and settings file
//! persistence.
//!
//! **Dependency rule**: this layer may depend on `application`, `device` and
//! `lifx_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
