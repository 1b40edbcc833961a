//! Device readings.

use super::ChannelSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One channel of a reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelValue {
    /// Channel identifier (e.g. "Voltage", "Pin16")
    pub name: String,
    /// Raw sample; `None` when the device returned something non-numeric
    pub raw: Option<f64>,
    /// Unit of `raw`
    pub raw_unit: String,
    /// `raw * scale + offset`, NaN for a missing sample
    pub scaled: f64,
    /// Unit of `scaled`
    pub eng_unit: String,
    /// The channel's calibration is not identity (scale != 1 or offset != 0)
    #[serde(default)]
    pub calibrated: bool,
}

fn join_values<'a>(values: impl Iterator<Item = (String, &'a str)>) -> String {
    values
        .map(|(v, unit)| format!("{} {}", v, unit).trim_end().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of one device query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Name of the device that produced the reading
    pub device: String,
    /// UTC timestamp when the query completed
    pub timestamp: DateTime<Utc>,
    /// Channel values in device order
    pub channels: Vec<ChannelValue>,
    /// Optional device-specific metadata (set points, identification string, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Reading {
    /// Build a reading stamped now from raw samples aligned with `specs`.
    pub fn from_samples(device: &str, specs: &[ChannelSpec], raw: &[Option<f64>]) -> Self {
        Self {
            device: device.to_string(),
            timestamp: Utc::now(),
            channels: specs
                .iter()
                .zip(raw)
                .map(|(spec, value)| spec.sample(*value))
                .collect(),
            metadata: None,
        }
    }

    /// Attach device metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Raw values in channel order.
    pub fn raw_values(&self) -> Vec<Option<f64>> {
        self.channels.iter().map(|c| c.raw).collect()
    }

    /// Scaled values in channel order.
    pub fn scaled_values(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.scaled).collect()
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Option<&ChannelValue> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// True when some channel carries a non-identity calibration.
    pub fn is_calibrated(&self) -> bool {
        self.channels.iter().any(|c| c.calibrated)
    }

    /// Human-readable rendering, each line prefixed with `lead`.
    ///
    /// ```text
    ///  Raw values: 12.5 V, 0.25 A
    ///  Scaled values: 26 bar, 0.25 A
    /// ```
    ///
    /// The scaled line only appears when [`Reading::is_calibrated`].
    pub fn render(&self, lead: &str) -> String {
        let raw = join_values(self.channels.iter().map(|c| {
            let value = c.raw.map_or_else(|| "n/a".to_string(), |v| v.to_string());
            (value, c.raw_unit.as_str())
        }));
        let mut out = format!("{}Raw values: {}", lead, raw);
        if self.is_calibrated() {
            let scaled = join_values(
                self.channels
                    .iter()
                    .map(|c| (c.scaled.to_string(), c.eng_unit.as_str())),
            );
            out.push('\n');
            out.push_str(lead);
            out.push_str("Scaled values: ");
            out.push_str(&scaled);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Calibration;

    fn psu_specs() -> Vec<ChannelSpec> {
        vec![ChannelSpec::new("Voltage", "V"), ChannelSpec::new("Current", "A")]
    }

    #[test]
    fn test_from_samples_aligns_channels() {
        let reading = Reading::from_samples("psu", &psu_specs(), &[Some(12.0), None]);
        assert_eq!(reading.device, "psu");
        assert_eq!(reading.raw_values(), vec![Some(12.0), None]);
        assert!(reading.scaled_values()[1].is_nan());
        assert_eq!(reading.channel("Voltage").map(|c| c.scaled), Some(12.0));
    }

    #[test]
    fn test_render_raw_only() {
        let reading = Reading::from_samples("psu", &psu_specs(), &[Some(12.5), Some(0.25)]);
        assert_eq!(reading.render(" "), " Raw values: 12.5 V, 0.25 A");
    }

    #[test]
    fn test_render_shows_scaled_when_calibrated() {
        let mut specs = vec![ChannelSpec::new("P1", "V"), ChannelSpec::new("P2", "")];
        specs[0].calibration = Calibration::new(2.0, 1.0, "bar");
        let reading = Reading::from_samples("adc", &specs, &[Some(1.5), None]);
        assert_eq!(
            reading.render(""),
            "Raw values: 1.5 V, n/a\nScaled values: 4 bar, NaN"
        );
    }

    #[test]
    fn test_scaled_line_follows_calibration_not_values() {
        let mut specs = vec![ChannelSpec::new("P1", "V")];
        specs[0].calibration = Calibration::new(2.0, 0.0, "V");
        let reading = Reading::from_samples("adc", &specs, &[Some(0.0)]);
        assert!(reading.is_calibrated());
        assert_eq!(reading.render(""), "Raw values: 0 V\nScaled values: 0 V");

        let mut specs = vec![ChannelSpec::new("P1", "V")];
        specs[0].calibration = Calibration::new(1.0, 0.0, "mV");
        let reading = Reading::from_samples("adc", &specs, &[Some(3.0)]);
        assert!(!reading.is_calibrated());
        assert_eq!(reading.render(""), "Raw values: 3 V");
    }

    #[test]
    fn test_serializes_without_empty_metadata() {
        let reading = Reading::from_samples("psu", &psu_specs(), &[Some(1.0), Some(2.0)]);
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["channels"][1]["raw_unit"], "A");
    }
}
