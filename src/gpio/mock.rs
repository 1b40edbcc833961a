//! Mock GPIO backend.
//!
//! Keeps pin modes and levels in memory and records every output write with the
//! `tokio::time::Instant` it happened at, so timing can be asserted under a paused
//! clock. Clones share state: keep one clone for assertions and hand the other to
//! [`shared`](super::shared).
//!
//! ```
//! use pi_daq::gpio::{GpioBackend, MockGpio, Pull};
//!
//! let mock = MockGpio::new();
//! let mut backend = mock.clone();
//! backend.setup_input(16, Pull::Up).unwrap();
//! assert!(backend.read(16).unwrap()); // pulled up
//! mock.set_input(16, false);
//! assert!(!backend.read(16).unwrap());
//! ```

use super::{GpioBackend, Pull};
use crate::error::{AppResult, DaqError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// One recorded output write.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinWrite {
    /// BCM pin
    pub pin: u8,
    /// Level written; `true` is high
    pub level: bool,
    /// Time of the write on the tokio clock
    pub at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PinMode {
    Output,
    Input(Pull),
}

#[derive(Default)]
struct MockState {
    modes: HashMap<u8, PinMode>,
    levels: HashMap<u8, bool>,
    writes: Vec<PinWrite>,
    cleanups: u32,
}

/// In-memory GPIO.
#[derive(Clone, Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockState>>,
}

impl MockGpio {
    /// All pins unconfigured.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Force the level an input pin reads.
    pub fn set_input(&self, pin: u8, level: bool) {
        self.state().levels.insert(pin, level);
    }

    /// Current level of any configured pin.
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.state().levels.get(&pin).copied()
    }

    /// True when `pin` is configured as an output.
    pub fn is_output(&self, pin: u8) -> bool {
        self.state().modes.get(&pin) == Some(&PinMode::Output)
    }

    /// Bias of an input pin, if it is one.
    pub fn pull(&self, pin: u8) -> Option<Pull> {
        match self.state().modes.get(&pin) {
            Some(PinMode::Input(pull)) => Some(*pull),
            _ => None,
        }
    }

    /// Every output write so far, in order.
    pub fn writes(&self) -> Vec<PinWrite> {
        self.state().writes.clone()
    }

    /// Output writes to a single pin.
    pub fn writes_for(&self, pin: u8) -> Vec<PinWrite> {
        self.state()
            .writes
            .iter()
            .filter(|w| w.pin == pin)
            .copied()
            .collect()
    }

    /// Drop the write log (pin state is kept).
    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    /// Number of times `cleanup` ran.
    pub fn cleanup_count(&self) -> u32 {
        self.state().cleanups
    }
}

impl GpioBackend for MockGpio {
    fn name(&self) -> &str {
        "mock"
    }

    fn setup_output(&mut self, pin: u8, initial: bool) -> AppResult<()> {
        let mut state = self.state();
        state.modes.insert(pin, PinMode::Output);
        state.levels.insert(pin, initial);
        Ok(())
    }

    fn setup_input(&mut self, pin: u8, pull: Pull) -> AppResult<()> {
        let mut state = self.state();
        state.modes.insert(pin, PinMode::Input(pull));
        let idle = pull == Pull::Up;
        state.levels.entry(pin).or_insert(idle);
        Ok(())
    }

    fn write(&mut self, pin: u8, level: bool) -> AppResult<()> {
        let mut state = self.state();
        match state.modes.get(&pin) {
            Some(PinMode::Output) => {
                state.levels.insert(pin, level);
                state.writes.push(PinWrite {
                    pin,
                    level,
                    at: Instant::now(),
                });
                Ok(())
            }
            Some(PinMode::Input(_)) => Err(DaqError::Gpio(format!(
                "pin {} is configured as an input",
                pin
            ))),
            None => Err(DaqError::Gpio(format!("pin {} is not configured", pin))),
        }
    }

    fn read(&mut self, pin: u8) -> AppResult<bool> {
        let state = self.state();
        if !state.modes.contains_key(&pin) {
            return Err(DaqError::Gpio(format!("pin {} is not configured", pin)));
        }
        Ok(state.levels.get(&pin).copied().unwrap_or(false))
    }

    fn cleanup(&mut self) -> AppResult<()> {
        let mut state = self.state();
        state.modes.clear();
        state.cleanups += 1;
        Ok(())
    }
}
