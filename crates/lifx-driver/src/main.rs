//! `lifx-watch`: a headless monitor for LIFX devices on the LAN.
//!
//! Loads the driver settings, discovers on a fixed interval and logs every
//! device that appears or expires until Ctrl-C.
//!
//! ```text
//! main()
//!  └─ load settings            -- driver.toml, defaults when absent
//!  └─ ProtocolDriver::new()
//!       ├─ event pump           (Tokio task)
//!       ├─ dispatch error pump  (Tokio task)
//!       └─ discovery ticker     (this task, until Ctrl-C)
//! ```

use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lifx_core::hardware_address;
use lifx_driver::infrastructure::storage::config;
use lifx_driver::{DriverEvent, ProtocolDriver};

const DISCOVERY_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match config::load_settings() {
        Ok(settings) => settings,
        Err(config::ConfigError::NoPlatformConfigDir) => config::DriverSettings::default(),
        Err(e) => return Err(e).context("loading driver settings"),
    };

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.driver.log_level)),
        )
        .init();

    info!("lifx-watch starting");

    let driver = ProtocolDriver::new(settings.driver_config()?);
    let timeouts = settings.client_timeouts();
    driver.set_client_config(timeouts.request_timeout, timeouts.retry_interval);

    // ── Event pump ────────────────────────────────────────────────────────────
    let mut events = driver
        .subscribe()
        .await
        .context("initialising driver")?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                DriverEvent::NewDevice(device) => info!(
                    device = %hardware_address(device.id()),
                    light = device.is_light(),
                    addr = %device.device().addr(),
                    "new device"
                ),
                DriverEvent::ExpiredDevice(device) => {
                    info!(device = %hardware_address(device.id()), "device expired")
                }
            }
        }
    });

    // ── Dispatch error pump ───────────────────────────────────────────────────
    if let Some(mut errors) = driver.errors().await {
        tokio::spawn(async move {
            while let Some(e) = errors.recv().await {
                warn!("dispatch: {e}");
            }
        });
    }

    info!(client_id = driver.client_id(), "lifx-watch ready.  Press Ctrl-C to exit.");

    // ── Discovery ticker ──────────────────────────────────────────────────────
    let mut ticker = tokio::time::interval(DISCOVERY_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = driver.discover().await {
                    error!("discovery failed: {e}");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("could not listen for Ctrl-C: {e}");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    driver.close().await?;
    info!("lifx-watch stopped");
    Ok(())
}
