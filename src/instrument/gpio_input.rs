//! Samples a set of GPIO input lines as 0/1 channels.
//!
//! The device borrows the rig's [`SharedGpio`]; it configures its pins on activation
//! but never releases the backend, which belongs to whoever built the rig.

use super::{not_active, Device};
use crate::error::{AppResult, DaqError};
use crate::gpio::{Pull, SharedGpio};
use crate::measurement::{Calibration, ChannelSpec, Reading};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `[devices.gpio_input]` block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpioInputConfig {
    /// BCM input pins to sample
    pub pins: Vec<u8>,
    /// Pull-up per pin; empty means pull-down on every pin
    #[serde(default)]
    pub pull_up: Vec<bool>,
    /// Channel names; default `PinNN`
    #[serde(default)]
    pub channel_names: Vec<String>,
}

impl GpioInputConfig {
    /// Pull and name lists are either empty or give one entry per pin.
    pub fn validate(&self, name: &str) -> AppResult<()> {
        if self.pins.is_empty() {
            return Err(DaqError::Configuration(format!(
                "gpio_input device '{}': 'pins' cannot be empty",
                name
            )));
        }
        if !self.pull_up.is_empty() && self.pull_up.len() != self.pins.len() {
            return Err(DaqError::Configuration(format!(
                "gpio_input device '{}': {} pull_up entries for {} pins",
                name,
                self.pull_up.len(),
                self.pins.len()
            )));
        }
        if !self.channel_names.is_empty() && self.channel_names.len() != self.pins.len() {
            return Err(DaqError::Configuration(format!(
                "gpio_input device '{}': {} channel names for {} pins",
                name,
                self.channel_names.len(),
                self.pins.len()
            )));
        }
        Ok(())
    }
}

/// Reads each configured pin as a 0/1 channel.
pub struct GpioInputDevice {
    name: String,
    gpio: SharedGpio,
    pins: Vec<(u8, Pull)>,
    channels: Vec<ChannelSpec>,
    active: bool,
    last: Option<Reading>,
}

impl GpioInputDevice {
    /// Build the device; pins are not touched until `activate`.
    pub fn new(name: &str, config: &GpioInputConfig, gpio: SharedGpio) -> Result<Self> {
        config.validate(name)?;

        let pins = config
            .pins
            .iter()
            .enumerate()
            .map(|(i, &pin)| {
                let pull = if config.pull_up.get(i).copied().unwrap_or(false) {
                    Pull::Up
                } else {
                    Pull::Down
                };
                (pin, pull)
            })
            .collect();

        let channels = config
            .pins
            .iter()
            .enumerate()
            .map(|(i, pin)| {
                let label = config
                    .channel_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Pin{:02}", pin));
                ChannelSpec::new(label, "")
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            gpio,
            pins,
            channels,
            active: false,
            last: None,
        })
    }

    /// Apply per-channel calibrations.
    pub fn with_calibration(mut self, calibration: &[Calibration]) -> Result<Self> {
        ChannelSpec::calibrate_all(&mut self.channels, calibration)?;
        Ok(self)
    }
}

#[async_trait]
impl Device for GpioInputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&mut self) -> Result<()> {
        {
            let mut gpio = self.gpio.lock().await;
            for &(pin, pull) in &self.pins {
                gpio.setup_input(pin, pull)
                    .with_context(|| format!("'{}': failed to configure input pin {}", self.name, pin))?;
                debug!(pin, ?pull, "'{}' input configured", self.name);
            }
        }
        self.active = true;
        self.query().await?;
        Ok(())
    }

    async fn query(&mut self) -> Result<Reading> {
        if !self.active {
            return Err(not_active(&self.name));
        }
        let mut raw = Vec::with_capacity(self.pins.len());
        {
            let mut gpio = self.gpio.lock().await;
            for &(pin, _) in &self.pins {
                let level = gpio
                    .read(pin)
                    .with_context(|| format!("'{}': failed to read pin {}", self.name, pin))?;
                raw.push(Some(if level { 1.0 } else { 0.0 }));
            }
        }
        let reading = Reading::from_samples(&self.name, &self.channels, &raw);
        self.last = Some(reading.clone());
        Ok(reading)
    }

    fn last_reading(&self) -> Option<&Reading> {
        self.last.as_ref()
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{shared, MockGpio};

    fn config() -> GpioInputConfig {
        GpioInputConfig {
            pins: vec![5, 6],
            pull_up: vec![true, false],
            channel_names: vec![],
        }
    }

    #[tokio::test]
    async fn test_reads_levels_as_zero_one() {
        let mock = MockGpio::new();
        let mut device = GpioInputDevice::new("ttl_in", &config(), shared(mock.clone())).unwrap();
        device.activate().await.unwrap();

        assert_eq!(mock.pull(5), Some(Pull::Up));
        assert_eq!(mock.pull(6), Some(Pull::Down));

        let reading = device.query().await.unwrap();
        assert_eq!(reading.raw_values(), vec![Some(1.0), Some(0.0)]);
        assert_eq!(reading.channels[0].name, "Pin05");

        mock.set_input(5, false);
        mock.set_input(6, true);
        let reading = device.query().await.unwrap();
        assert_eq!(reading.raw_values(), vec![Some(0.0), Some(1.0)]);
    }

    #[test]
    fn test_pull_list_must_match_pins() {
        for pull_up in [vec![true], vec![true, false, true]] {
            let mut cfg = config();
            cfg.pull_up = pull_up;
            let err = cfg.validate("x").unwrap_err();
            assert!(matches!(err, DaqError::Configuration(_)));
            assert!(GpioInputDevice::new("x", &cfg, shared(MockGpio::new())).is_err());
        }
    }

    #[tokio::test]
    async fn test_empty_pull_list_means_pull_down() {
        let mock = MockGpio::new();
        let mut cfg = config();
        cfg.pull_up.clear();
        let mut device = GpioInputDevice::new("ttl_in", &cfg, shared(mock.clone())).unwrap();
        device.activate().await.unwrap();
        assert_eq!(mock.pull(5), Some(Pull::Down));
        assert_eq!(mock.pull(6), Some(Pull::Down));
    }

    #[test]
    fn test_no_pins_rejected() {
        let cfg = GpioInputConfig {
            pins: vec![],
            pull_up: vec![],
            channel_names: vec![],
        };
        assert!(GpioInputDevice::new("x", &cfg, shared(MockGpio::new())).is_err());
    }
}
