//! A dummy device that generates sine waves, for rigs without hardware attached.
use super::{not_active, Device};
use crate::measurement::{Calibration, ChannelSpec, Reading};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use tracing::info;

fn default_channels() -> usize {
    1
}

fn default_period() -> f64 {
    1.0
}

/// `[devices.dummy]` block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DummyConfig {
    /// Number of sine channels
    #[serde(default = "default_channels")]
    pub n_channels: usize,
    /// Sine period in seconds
    #[serde(default = "default_period")]
    pub period_s: f64,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            n_channels: default_channels(),
            period_s: default_period(),
        }
    }
}

/// Channel `i` reads `sin(phase[i] + 2π·t/period)` with `t` the wall-clock time.
pub struct DummyDevice {
    name: String,
    period_s: f64,
    phases: Vec<f64>,
    channels: Vec<ChannelSpec>,
    active: bool,
    last: Option<Reading>,
}

impl DummyDevice {
    /// Random phase per channel.
    pub fn new(name: &str, config: &DummyConfig) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let phases = (0..config.n_channels).map(|_| rng.gen::<f64>()).collect();
        Self::with_phases(name, phases, config.period_s)
    }

    /// Device with fixed per-channel phases (radians) instead of random ones.
    pub fn with_phases(name: &str, phases: Vec<f64>, period_s: f64) -> Result<Self> {
        if phases.is_empty() {
            bail!("dummy device '{}' needs at least one channel", name);
        }
        if !(period_s.is_finite() && period_s > 0.0) {
            bail!("dummy device '{}': period must be positive, got {}", name, period_s);
        }
        let channels = (1..=phases.len())
            .map(|n| ChannelSpec::new(format!("Value{}", n), ""))
            .collect();
        Ok(Self {
            name: name.to_string(),
            period_s,
            phases,
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

    fn sample(&self, t: f64) -> Vec<Option<f64>> {
        self.phases
            .iter()
            .map(|phase| Some((phase + TAU * t / self.period_s).sin()))
            .collect()
    }
}

#[async_trait]
impl Device for DummyDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&mut self) -> Result<()> {
        self.active = true;
        info!("Dummy device '{}' active with {} channel(s)", self.name, self.phases.len());
        self.query().await?;
        Ok(())
    }

    async fn query(&mut self) -> Result<Reading> {
        if !self.active {
            return Err(not_active(&self.name));
        }
        let now = Utc::now();
        let t = now.timestamp_micros() as f64 * 1e-6;
        let mut reading = Reading::from_samples(&self.name, &self.channels, &self.sample(t));
        reading.timestamp = now;
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
