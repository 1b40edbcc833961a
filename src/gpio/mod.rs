//! GPIO backends.
//!
//! The timing loop and the GPIO input device share one backend through [`SharedGpio`].
//! Whoever builds the rig owns that handle and passes it into constructors; nothing
//! touches pin state from module scope.
//!
//! - [`MockGpio`]: in-memory pins with a write log, for tests and for running the
//!   binary on a machine without GPIO.
//! - `RppalGpio` (feature `rpi_gpio`): Raspberry Pi pins in BCM numbering.

pub mod mock;
#[cfg(feature = "rpi_gpio")]
pub mod rpi;

pub use mock::{MockGpio, PinWrite};
#[cfg(feature = "rpi_gpio")]
pub use rpi::RppalGpio;

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Input bias resistor selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Pull {
    /// Floating input.
    None,
    /// Pull-up: the line idles high and a closed contact reads low.
    Up,
    /// Pull-down: the line idles low.
    #[default]
    Down,
}

/// Minimal pin-level access needed by the rig.
///
/// Levels are booleans: `true` drives or reads the line high.
pub trait GpioBackend: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &str;

    /// Configure `pin` as an output and drive it to `initial`.
    fn setup_output(&mut self, pin: u8, initial: bool) -> AppResult<()>;

    /// Configure `pin` as an input with the given bias.
    fn setup_input(&mut self, pin: u8, pull: Pull) -> AppResult<()>;

    /// Drive an output pin.
    fn write(&mut self, pin: u8, level: bool) -> AppResult<()>;

    /// Sample an input pin.
    fn read(&mut self, pin: u8) -> AppResult<bool>;

    /// Release every pin this backend configured.
    fn cleanup(&mut self) -> AppResult<()>;
}

/// The single owned handle to a rig's GPIO.
pub type SharedGpio = Arc<Mutex<Box<dyn GpioBackend>>>;

/// Wrap a backend into a [`SharedGpio`].
pub fn shared(backend: impl GpioBackend + 'static) -> SharedGpio {
    Arc::new(Mutex::new(Box::new(backend)))
}
