//! Device factories keyed by the `type` string of a `[[devices]]` entry.

use crate::config::{DeviceDefinition, Settings};
use crate::error::DaqError;
use crate::gpio::SharedGpio;
use crate::instrument::cpu_temperature::CpuTemperature;
use crate::instrument::dummy::DummyDevice;
use crate::instrument::gpio_input::GpioInputDevice;
use crate::instrument::tenma::TenmaPsu;
use crate::instrument::Device;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Builds one device from its definition. GPIO-backed devices clone the handle.
pub type DeviceFactory =
    Box<dyn Fn(&DeviceDefinition, &SharedGpio) -> Result<Box<dyn Device>> + Send + Sync>;

/// A registry for device factories.
pub struct DeviceRegistry {
    factories: HashMap<String, DeviceFactory>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in device types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register("dummy", |def, _gpio| {
            let config = def.dummy.clone().unwrap_or_default();
            let device = DummyDevice::new(&def.name, &config)?.with_calibration(&def.calibration)?;
            Ok(Box::new(device))
        });

        registry.register("gpio_input", |def, gpio| {
            let config = def.require(&def.gpio_input, "gpio_input")?;
            let device = GpioInputDevice::new(&def.name, config, gpio.clone())?
                .with_calibration(&def.calibration)?;
            Ok(Box::new(device))
        });

        registry.register("tenma_psu", |def, _gpio| {
            let config = def.require(&def.tenma_psu, "tenma_psu")?;
            let device = TenmaPsu::from_config(&def.name, config).with_calibration(&def.calibration)?;
            Ok(Box::new(device))
        });

        registry.register("cpu_temperature", |def, _gpio| {
            let config = def.cpu_temperature.clone().unwrap_or_default();
            Ok(Box::new(
                CpuTemperature::new(&def.name, &config).with_calibration(&def.calibration),
            ))
        });

        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&DeviceDefinition, &SharedGpio) -> Result<Box<dyn Device>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Box::new(factory));
    }

    /// Registered type names, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build one device.
    pub fn create(&self, def: &DeviceDefinition, gpio: &SharedGpio) -> Result<Box<dyn Device>> {
        let factory = self.factories.get(&def.kind).ok_or_else(|| {
            DaqError::Configuration(format!(
                "Unknown device type '{}' for device '{}'. Known types: {}",
                def.kind,
                def.name,
                self.kinds().join(", ")
            ))
        })?;
        debug!("Creating {} device '{}'", def.kind, def.name);
        factory(def, gpio).with_context(|| format!("Failed to create device '{}'", def.name))
    }

    /// Build every enabled device in config order.
    pub fn build_all(&self, settings: &Settings, gpio: &SharedGpio) -> Result<Vec<Box<dyn Device>>> {
        let devices = settings
            .enabled_devices()
            .map(|def| self.create(def, gpio))
            .collect::<Result<Vec<_>>>()?;
        info!("Built {} device(s)", devices.len());
        Ok(devices)
    }
}
