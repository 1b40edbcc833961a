//! pi_daq binary: load the configuration, build the rig, run until Ctrl+C.
//!
//! The configuration file is `config/default.toml` unless `PIDAQ_CONFIG` points
//! elsewhere. `RUST_LOG` overrides `application.log_level`.

use anyhow::{Context, Result};
use pi_daq::config::Settings;
use pi_daq::data::TracingSink;
use pi_daq::gpio::{shared, SharedGpio};
use pi_daq::poller::DevicePoller;
use pi_daq::registry::DeviceRegistry;
use pi_daq::timing_loop::TimingLoop;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(feature = "rpi_gpio")]
fn open_gpio() -> Result<SharedGpio> {
    let gpio = pi_daq::gpio::RppalGpio::new().context("Failed to open Raspberry Pi GPIO")?;
    Ok(shared(gpio))
}

#[cfg(not(feature = "rpi_gpio"))]
fn open_gpio() -> Result<SharedGpio> {
    warn!("Built without 'rpi_gpio'; running against mock GPIO");
    Ok(shared(pi_daq::gpio::MockGpio::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.application.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting {}", settings.application.name);

    let gpio = open_gpio()?;
    let devices = DeviceRegistry::with_defaults().build_all(&settings, &gpio)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    // With the poller enabled the devices log free-running and the timing loop only
    // drives the outputs.
    let (loop_devices, poller) = match &settings.poller {
        Some(poller) if poller.enabled => {
            let handle = DevicePoller::spawn_with_retry(
                devices,
                Duration::from_millis(poller.interval_ms),
                Box::new(TracingSink::new()),
                settings.retry.clone(),
            );
            (Vec::new(), Some(handle))
        }
        _ => (devices, None),
    };

    let mut timing = TimingLoop::new(
        settings.timing_loop.clone(),
        gpio,
        loop_devices,
        Box::new(TracingSink::new()),
    )?
    .with_retry(settings.retry.clone());

    info!("Event sequence:\n{}", timing.sequence());
    println!("Press CTRL+C to exit");

    let outcome = match timing.setup().await {
        Ok(()) => timing.run(shutdown_rx).await,
        Err(e) => {
            if let Err(cleanup) = timing.cleanup().await {
                warn!("Cleanup after failed setup: {}", cleanup);
            }
            Err(e)
        }
    };

    if let Some(poller) = poller {
        poller.stop().await?;
    }
    outcome?;
    info!("Done");
    Ok(())
}
