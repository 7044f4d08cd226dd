//! lifx-driver library entry point.
//!
//! A LAN driver for LIFX bulbs: discovers devices with UDP broadcasts, keeps a
//! registry of them, and tells subscribers when devices appear or go silent.
//!
//! ```no_run
//! use lifx_driver::{DriverConfig, DriverEvent, ProtocolDriver};
//!
//! # async fn run() -> Result<(), lifx_driver::DriverError> {
//! let driver = ProtocolDriver::new(DriverConfig::default());
//! let mut events = driver.subscribe().await?;
//! driver.discover().await?;
//! while let Some(event) = events.recv().await {
//!     if let DriverEvent::NewDevice(device) = event {
//!         println!("found {device:?}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod device;
pub mod driver;
pub mod infrastructure;

pub use application::subscription_bus::{DriverEvent, Subscription};
pub use device::{ClientTimeouts, Device, DeviceError, DeviceHandle, Light};
pub use driver::{DriverConfig, DriverError, ProtocolDriver};
pub use infrastructure::network::dispatch::DispatchError;
