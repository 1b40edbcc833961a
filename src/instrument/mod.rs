//! Data-acquisition devices.
//!
//! Every device variant implements the [`Device`] capability trait: activate the
//! hardware, query a [`Reading`], describe the last reading for the terminal, persist
//! it to a [`ReadingSink`], and shut down. The timing loop and the background poller
//! only ever see `Box<dyn Device>`.
//!
//! | type              | driver                                   |
//! |-------------------|------------------------------------------|
//! | `dummy`           | [`dummy::DummyDevice`]                   |
//! | `gpio_input`      | [`gpio_input::GpioInputDevice`]          |
//! | `tenma_psu`       | [`tenma::TenmaPsu`]                      |
//! | `cpu_temperature` | [`cpu_temperature::CpuTemperature`]      |

pub mod cpu_temperature;
pub mod dummy;
pub mod gpio_input;
pub mod tenma;

use crate::data::ReadingSink;
use crate::error::DaqError;
use crate::measurement::Reading;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Capability interface shared by all devices.
#[async_trait]
pub trait Device: Send + Sync {
    /// Configured device name.
    fn name(&self) -> &str;

    /// Open the connection and prepare for queries.
    async fn activate(&mut self) -> Result<()>;

    /// Take a fresh reading. The reading is also kept as [`Device::last_reading`].
    async fn query(&mut self) -> Result<Reading>;

    /// Most recent successful reading.
    fn last_reading(&self) -> Option<&Reading>;

    /// Close the connection. Safe to call on an inactive device.
    async fn shutdown(&mut self) -> Result<()>;

    /// Terminal rendering of the last reading.
    fn describe(&self) -> String {
        match self.last_reading() {
            Some(reading) => format!("{}\n{}", self.name(), reading.render(" ")),
            None => format!("{}\n (no reading)", self.name()),
        }
    }

    /// Write the last reading to `sink`.
    async fn persist(&self, sink: &mut dyn ReadingSink, loop_counter: Option<u64>) -> Result<()> {
        let reading = self.last_reading().ok_or_else(|| {
            DaqError::Instrument(format!("'{}' has not been queried yet", self.name()))
        })?;
        sink.write(reading, loop_counter)
            .await
            .with_context(|| format!("Failed to persist reading from '{}'", self.name()))
    }

    /// Re-establish the connection.
    async fn reset(&mut self) -> Result<()> {
        self.shutdown().await?;
        self.activate().await
    }
}

/// Error for a query issued before `activate`.
pub(crate) fn not_active(name: &str) -> anyhow::Error {
    DaqError::Instrument(format!("'{}' is not active", name)).into()
}
