//! CPU temperature from the Linux thermal sysfs interface.
//!
//! Each `thermal_zone*` directory under the root becomes one channel, named after the
//! zone's `type` file (`cpu-thermal`, `x86_pkg_temp`, ...). `temp` holds millidegrees.

use super::{not_active, Device};
use crate::error::DaqError;
use crate::measurement::{Calibration, ChannelSpec, Reading};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn default_root() -> PathBuf {
    PathBuf::from("/sys/class/thermal")
}

/// `[devices.cpu_temperature]` block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CpuTemperatureConfig {
    /// Directory holding the `thermal_zone*` entries
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for CpuTemperatureConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

struct Zone {
    temp_path: PathBuf,
}

/// One channel per kernel thermal zone, in degrees Celsius.
pub struct CpuTemperature {
    name: String,
    root: PathBuf,
    zones: Vec<Zone>,
    channels: Vec<ChannelSpec>,
    calibration: Vec<Calibration>,
    active: bool,
    last: Option<Reading>,
}

impl CpuTemperature {
    /// Zones are discovered on activation.
    pub fn new(name: &str, config: &CpuTemperatureConfig) -> Self {
        Self {
            name: name.to_string(),
            root: config.root.clone(),
            zones: Vec::new(),
            channels: Vec::new(),
            calibration: Vec::new(),
            active: false,
            last: None,
        }
    }

    /// Calibration is checked against the zone count on activation.
    pub fn with_calibration(mut self, calibration: &[Calibration]) -> Self {
        self.calibration = calibration.to_vec();
        self
    }

    async fn scan(&self) -> Result<(Vec<Zone>, Vec<ChannelSpec>)> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with("thermal_zone") {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut zones = Vec::with_capacity(dirs.len());
        let mut channels = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let label = zone_label(&dir).await;
            debug!("'{}' found {} ({})", self.name, dir.display(), label);
            channels.push(ChannelSpec::new(label, "degC"));
            zones.push(Zone {
                temp_path: dir.join("temp"),
            });
        }
        Ok((zones, channels))
    }
}

async fn zone_label(dir: &Path) -> String {
    match tokio::fs::read_to_string(dir.join("type")).await {
        Ok(kind) if !kind.trim().is_empty() => kind.trim().to_string(),
        _ => dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn parse_millidegrees(path: &Path, text: &str) -> Result<f64, DaqError> {
    text.trim()
        .parse::<f64>()
        .map(|milli| milli / 1000.0)
        .map_err(|_| {
            DaqError::Instrument(format!(
                "unexpected content in {}: '{}'",
                path.display(),
                text.trim()
            ))
        })
}

#[async_trait]
impl Device for CpuTemperature {
    fn name(&self) -> &str {
        &self.name
    }

    async fn activate(&mut self) -> Result<()> {
        let (zones, mut channels) = self.scan().await?;
        if zones.is_empty() {
            return Err(DaqError::Instrument(format!(
                "'{}': no thermal zones under {}",
                self.name,
                self.root.display()
            ))
            .into());
        }
        ChannelSpec::calibrate_all(&mut channels, &self.calibration)?;
        info!("'{}' reading {} thermal zone(s)", self.name, zones.len());
        self.zones = zones;
        self.channels = channels;
        self.active = true;
        self.query().await?;
        Ok(())
    }

    async fn query(&mut self) -> Result<Reading> {
        if !self.active {
            return Err(not_active(&self.name));
        }
        let mut raw = Vec::with_capacity(self.zones.len());
        for zone in &self.zones {
            let text = tokio::fs::read_to_string(&zone.temp_path)
                .await
                .with_context(|| format!("Failed to read {}", zone.temp_path.display()))?;
            raw.push(Some(parse_millidegrees(&zone.temp_path, &text)?));
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
