//! Per-channel linear calibration.

use super::ChannelValue;
use serde::{Deserialize, Serialize};

fn default_scale() -> f64 {
    1.0
}

/// Linear raw-to-engineering conversion for one channel.
///
/// `scaled = raw * scale + offset`. Configured per device as a list aligned with the
/// device's channels:
///
/// ```toml
/// calibration = [
///     { scale = 250.0, offset = -100.0, eng_unit = "kPa" },
/// ]
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Multiplier applied to the raw value
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Added after scaling
    #[serde(default)]
    pub offset: f64,
    /// Engineering unit; the raw unit is used when absent.
    #[serde(default)]
    pub eng_unit: Option<String>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
            eng_unit: None,
        }
    }
}

impl Calibration {
    /// Calibration with an explicit engineering unit.
    pub fn new(scale: f64, offset: f64, eng_unit: impl Into<String>) -> Self {
        Self {
            scale,
            offset,
            eng_unit: Some(eng_unit.into()),
        }
    }

    /// True for scale 1 and offset 0.
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    /// Scaled value; a missing sample becomes NaN.
    pub fn apply(&self, raw: Option<f64>) -> f64 {
        match raw {
            Some(v) => v * self.scale + self.offset,
            None => f64::NAN,
        }
    }
}

/// Static description of one device channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSpec {
    /// Channel name
    pub name: String,
    /// Unit the device reports in
    pub raw_unit: String,
    /// Raw-to-engineering conversion
    pub calibration: Calibration,
}

impl ChannelSpec {
    /// Uncalibrated channel.
    pub fn new(name: impl Into<String>, raw_unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_unit: raw_unit.into(),
            calibration: Calibration::default(),
        }
    }

    /// Engineering unit after calibration.
    pub fn eng_unit(&self) -> &str {
        self.calibration
            .eng_unit
            .as_deref()
            .unwrap_or(&self.raw_unit)
    }

    /// Turn one raw sample into a channel value.
    pub fn sample(&self, raw: Option<f64>) -> ChannelValue {
        ChannelValue {
            name: self.name.clone(),
            raw,
            raw_unit: self.raw_unit.clone(),
            scaled: self.calibration.apply(raw),
            eng_unit: self.eng_unit().to_string(),
            calibrated: !self.calibration.is_identity(),
        }
    }

    /// Attach calibrations to channels index by index.
    ///
    /// An empty list leaves every channel at identity; otherwise the lengths must match.
    pub fn calibrate_all(specs: &mut [ChannelSpec], calibrations: &[Calibration]) -> anyhow::Result<()> {
        if calibrations.is_empty() {
            return Ok(());
        }
        if calibrations.len() != specs.len() {
            anyhow::bail!(
                "{} calibration entries given for {} channels",
                calibrations.len(),
                specs.len()
            );
        }
        for (spec, cal) in specs.iter_mut().zip(calibrations) {
            spec.calibration = cal.clone();
        }
        Ok(())
    }
}
