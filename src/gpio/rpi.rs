//! Raspberry Pi GPIO through `rppal`.
//!
//! Pins use BCM numbering. `rppal` resets each pin to its original mode when the
//! pin handle is dropped, so `cleanup` only has to drop the handles it holds.

use super::{GpioBackend, Pull};
use crate::error::{AppResult, DaqError};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};
use std::collections::HashMap;
use tracing::debug;

/// GPIO through `rppal`, BCM numbering.
pub struct RppalGpio {
    gpio: Gpio,
    outputs: HashMap<u8, OutputPin>,
    inputs: HashMap<u8, InputPin>,
}

impl RppalGpio {
    /// Open `/dev/gpiomem`.
    pub fn new() -> AppResult<Self> {
        let gpio = Gpio::new().map_err(|e| DaqError::Gpio(format!("Failed to open GPIO: {}", e)))?;
        Ok(Self {
            gpio,
            outputs: HashMap::new(),
            inputs: HashMap::new(),
        })
    }

    fn claim(&mut self, pin: u8) -> AppResult<rppal::gpio::Pin> {
        // re-configuring a pin releases the old handle first
        self.outputs.remove(&pin);
        self.inputs.remove(&pin);
        self.gpio
            .get(pin)
            .map_err(|e| DaqError::Gpio(format!("Failed to claim pin {}: {}", pin, e)))
    }
}

impl GpioBackend for RppalGpio {
    fn name(&self) -> &str {
        "rppal"
    }

    fn setup_output(&mut self, pin: u8, initial: bool) -> AppResult<()> {
        let handle = self.claim(pin)?;
        let output = if initial {
            handle.into_output_high()
        } else {
            handle.into_output_low()
        };
        self.outputs.insert(pin, output);
        debug!(pin, initial, "GPIO output configured");
        Ok(())
    }

    fn setup_input(&mut self, pin: u8, pull: Pull) -> AppResult<()> {
        let handle = self.claim(pin)?;
        let input = match pull {
            Pull::None => handle.into_input(),
            Pull::Up => handle.into_input_pullup(),
            Pull::Down => handle.into_input_pulldown(),
        };
        self.inputs.insert(pin, input);
        debug!(pin, ?pull, "GPIO input configured");
        Ok(())
    }

    fn write(&mut self, pin: u8, level: bool) -> AppResult<()> {
        let output = self
            .outputs
            .get_mut(&pin)
            .ok_or_else(|| DaqError::Gpio(format!("pin {} is not configured as an output", pin)))?;
        output.write(if level { Level::High } else { Level::Low });
        Ok(())
    }

    fn read(&mut self, pin: u8) -> AppResult<bool> {
        if let Some(input) = self.inputs.get(&pin) {
            return Ok(input.read() == Level::High);
        }
        if let Some(output) = self.outputs.get(&pin) {
            return Ok(output.is_set_high());
        }
        Err(DaqError::Gpio(format!("pin {} is not configured", pin)))
    }

    fn cleanup(&mut self) -> AppResult<()> {
        self.outputs.clear();
        self.inputs.clear();
        debug!("GPIO pins released");
        Ok(())
    }
}
