//! TENMA 72-2710 bench power supply.
//!
//! Line protocol at 115200 baud, `\n` terminated:
//! - `*IDN?`: identification string
//! - `VSET1?` / `ISET1?`: voltage and current set points
//! - `VOUT1?` / `IOUT1?`: measured output voltage and current
//! - `VSET1:{v}` / `ISET1:{i}`: change the set points
//!
//! The identification and set points are read once on activation and attached to
//! every reading as metadata.

use super::{not_active, Device};
use crate::adapters::{LineTransport, SerialAdapter};
use crate::error::DaqError;
use crate::measurement::{Calibration, ChannelSpec, Reading};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    1000
}

/// `[devices.tenma_psu]` block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenmaPsuConfig {
    /// Serial device, e.g. `/dev/ttyACM0`
    pub port: String,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-query timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Voltage set point applied on activation
    #[serde(default)]
    pub set_voltage: Option<f64>,
    /// Current limit applied on activation
    #[serde(default)]
    pub set_current: Option<f64>,
}

/// Identification and set points captured on activation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PsuStatus {
    /// `*IDN?` response
    pub identity: String,
    /// Voltage set point read back at activation, V
    pub voltage_set: f64,
    /// Current set point read back at activation, A
    pub current_set: f64,
}

/// TENMA 72-2710 bench supply.
pub struct TenmaPsu {
    name: String,
    transport: Box<dyn LineTransport>,
    set_voltage: Option<f64>,
    set_current: Option<f64>,
    channels: Vec<ChannelSpec>,
    status: Option<PsuStatus>,
    active: bool,
    last: Option<Reading>,
}

impl TenmaPsu {
    /// Driver over a serial port built from `config`.
    pub fn from_config(name: &str, config: &TenmaPsuConfig) -> Self {
        let adapter = SerialAdapter::new(config.port.clone(), config.baud_rate)
            .with_timeout(Duration::from_millis(config.timeout_ms));
        Self::new(name, Box::new(adapter))
            .with_set_points(config.set_voltage, config.set_current)
    }

    /// Driver over an already-built transport.
    pub fn new(name: &str, transport: Box<dyn LineTransport>) -> Self {
        Self {
            name: name.to_string(),
            transport,
            set_voltage: None,
            set_current: None,
            channels: vec![
                ChannelSpec::new("Voltage", "V"),
                ChannelSpec::new("Current", "A"),
            ],
            status: None,
            active: false,
            last: None,
        }
    }

    /// Set points written at activation; `None` leaves the front-panel value.
    pub fn with_set_points(mut self, voltage: Option<f64>, current: Option<f64>) -> Self {
        self.set_voltage = voltage;
        self.set_current = current;
        self
    }

    /// Apply calibrations to the Voltage and Current channels.
    pub fn with_calibration(mut self, calibration: &[Calibration]) -> Result<Self> {
        ChannelSpec::calibrate_all(&mut self.channels, calibration)?;
        Ok(self)
    }

    /// Identity and set points read at activation.
    pub fn status(&self) -> Option<&PsuStatus> {
        self.status.as_ref()
    }

    async fn query_number(&mut self, command: &str) -> Result<f64> {
        let response = self
            .transport
            .query(command)
            .await
            .with_context(|| format!("'{}': {} failed", self.name, command))?;
        parse_number(command, &response).map_err(Into::into)
    }

    async fn apply_set_points(&mut self) -> Result<()> {
        if let Some(v) = self.set_voltage {
            self.transport
                .send(&format!("VSET1:{:.2}", v))
                .await
                .with_context(|| format!("'{}': failed to set voltage", self.name))?;
            debug!("'{}' voltage set point {:.2} V", self.name, v);
        }
        if let Some(i) = self.set_current {
            self.transport
                .send(&format!("ISET1:{:.3}", i))
                .await
                .with_context(|| format!("'{}': failed to set current", self.name))?;
            debug!("'{}' current limit {:.3} A", self.name, i);
        }
        Ok(())
    }
}

/// Parse a numeric reply; the supply sometimes pads with spaces or a trailing `\r`.
fn parse_number(command: &str, response: &str) -> Result<f64, DaqError> {
    let trimmed = response.trim();
    trimmed.parse::<f64>().map_err(|_| {
        DaqError::Instrument(format!(
            "unexpected response to {}: '{}'",
            command, trimmed
        ))
    })
}

#[async_trait]
impl Device for TenmaPsu {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&mut self) -> Result<()> {
        self.transport
            .connect()
            .await
            .with_context(|| format!("Failed to connect to '{}'", self.name))?;
        self.apply_set_points().await?;

        let identity = self
            .transport
            .query("*IDN?")
            .await
            .with_context(|| format!("'{}': *IDN? failed", self.name))?
            .trim()
            .to_string();
        let voltage_set = self.query_number("VSET1?").await?;
        let current_set = self.query_number("ISET1?").await?;
        info!(
            "'{}' connected: {} ({:.2} V / {:.3} A)",
            self.name, identity, voltage_set, current_set
        );
        self.status = Some(PsuStatus {
            identity,
            voltage_set,
            current_set,
        });

        self.active = true;
        self.query().await?;
        Ok(())
    }

    async fn query(&mut self) -> Result<Reading> {
        if !self.active {
            return Err(not_active(&self.name));
        }
        let voltage = self.query_number("VOUT1?").await?;
        let current = self.query_number("IOUT1?").await?;

        let mut reading =
            Reading::from_samples(&self.name, &self.channels, &[Some(voltage), Some(current)]);
        if let Some(status) = &self.status {
            reading = reading.with_metadata(json!({
                "identity": status.identity,
                "voltage_set": status.voltage_set,
                "current_set": status.current_set,
            }));
        }
        self.last = Some(reading.clone());
        Ok(reading)
    }

    fn last_reading(&self) -> Option<&Reading> {
        self.last.as_ref()
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.active = false;
        self.transport
            .disconnect()
            .await
            .with_context(|| format!("Failed to disconnect '{}'", self.name))
    }
}
