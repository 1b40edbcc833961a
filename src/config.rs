//! Rig configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. A TOML file: `config/default.toml`, or the path in `PIDAQ_CONFIG`
//! 2. Environment variables prefixed with `PIDAQ_`, nested keys separated by `__`
//!
//! ```text
//! PIDAQ_APPLICATION__LOG_LEVEL=debug
//! PIDAQ_TIMING_LOOP__DEBOUNCE_DELAY_S=0.5
//! ```
//!
//! After extraction [`Settings::validate`] checks the parts serde cannot: pin
//! conflicts, duplicate device names, missing per-type blocks.
//!
//! # Example
//!
//! ```no_run
//! use pi_daq::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Trigger on GPIO{}", settings.timing_loop.trigger_pin);
//!     println!("Devices: {}", settings.devices.len());
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, DaqError};
use crate::error_recovery::RetryPolicy;
use crate::instrument::cpu_temperature::CpuTemperatureConfig;
use crate::instrument::dummy::DummyConfig;
use crate::instrument::gpio_input::GpioInputConfig;
use crate::instrument::tenma::TenmaPsuConfig;
use crate::measurement::Calibration;
use crate::sequencer::OutputChannel;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "PIDAQ_CONFIG";
/// Prefix for per-key environment overrides.
pub const ENV_PREFIX: &str = "PIDAQ_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level rig configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Trigger input, output channels and logging rounds
    pub timing_loop: TimingLoopConfig,
    /// Device definitions, in polling order
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
    /// Background per-device logger
    #[serde(default)]
    pub poller: Option<PollerConfig>,
    /// Query retry policy shared by the timing loop and the poller
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Name shown in the start-up banner
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_app_name() -> String {
    "pi_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Status LED or similar line driven around the logging round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// BCM output pin
    pub pin: u8,
    /// Active-low indicator
    #[serde(default)]
    pub invert: bool,
}

impl IndicatorConfig {
    /// Level between logging rounds.
    pub fn rest_level(&self) -> bool {
        self.invert
    }

    /// Level while the indicator is on.
    pub fn active_level(&self) -> bool {
        !self.invert
    }
}

/// `[timing_loop]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingLoopConfig {
    /// Input pin, pulled up; a trigger is the line reading low
    pub trigger_pin: u8,
    /// Minimum seconds between accepted triggers
    #[serde(default = "default_debounce")]
    pub debounce_delay_s: f64,
    /// Output channels to pulse on every trigger
    #[serde(default)]
    pub channels: Vec<OutputChannel>,
    /// Driven active while readings are persisted
    #[serde(default)]
    pub busy_indicator: Option<IndicatorConfig>,
    /// Driven active while devices are queried
    #[serde(default)]
    pub arm_indicator: Option<IndicatorConfig>,
    /// Logging rounds per trigger
    #[serde(default = "default_ensembles")]
    pub num_ensembles: u32,
    /// Pause after each logging round, in seconds
    #[serde(default)]
    pub logging_period_s: f64,
    /// Initial value of the loop counter
    #[serde(default)]
    pub loop_counter_start: u64,
    /// Trigger polling interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_debounce() -> f64 {
    1.0
}

fn default_ensembles() -> u32 {
    1
}

fn default_poll_interval() -> u64 {
    1
}

impl TimingLoopConfig {
    /// Config with library defaults for everything but the trigger and channels.
    pub fn new(trigger_pin: u8, channels: Vec<OutputChannel>) -> Self {
        Self {
            trigger_pin,
            debounce_delay_s: default_debounce(),
            channels,
            busy_indicator: None,
            arm_indicator: None,
            num_ensembles: default_ensembles(),
            logging_period_s: 0.0,
            loop_counter_start: 0,
            poll_interval_ms: default_poll_interval(),
        }
    }

    /// Every pin driven as an output: channels first, then indicators, each pin once.
    pub fn output_pins(&self) -> Vec<u8> {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .map(|c| c.pin)
            .chain(self.busy_indicator.map(|i| i.pin))
            .chain(self.arm_indicator.map(|i| i.pin))
            .filter(|pin| seen.insert(*pin))
            .collect()
    }

    /// Check channel timings, pin conflicts and periods.
    pub fn validate(&self) -> AppResult<()> {
        for channel in &self.channels {
            channel
                .validate()
                .map_err(|e| DaqError::Configuration(e.to_string()))?;
        }

        // An indicator may share a channel's pin (e.g. a trigger LED that also shows
        // the arm state); two channels or two indicators may not.
        let mut channel_pins = HashSet::new();
        for channel in &self.channels {
            if !channel_pins.insert(channel.pin) {
                return Err(DaqError::Configuration(format!(
                    "GPIO{} is used by more than one output channel",
                    channel.pin
                )));
            }
        }
        if let (Some(busy), Some(arm)) = (self.busy_indicator, self.arm_indicator) {
            if busy.pin == arm.pin {
                return Err(DaqError::Configuration(format!(
                    "busy and arm indicators both use GPIO{}",
                    busy.pin
                )));
            }
        }
        if self.output_pins().contains(&self.trigger_pin) {
            return Err(DaqError::Configuration(format!(
                "Trigger pin GPIO{} is also configured as an output",
                self.trigger_pin
            )));
        }

        if Duration::try_from_secs_f64(self.debounce_delay_s).is_err() {
            return Err(DaqError::Configuration(format!(
                "debounce_delay_s must be a non-negative number of seconds, got {}",
                self.debounce_delay_s
            )));
        }
        if Duration::try_from_secs_f64(self.logging_period_s).is_err() {
            return Err(DaqError::Configuration(format!(
                "logging_period_s must be a non-negative number of seconds, got {}",
                self.logging_period_s
            )));
        }
        if self.num_ensembles == 0 {
            return Err(DaqError::Configuration(
                "num_ensembles must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[poller]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Run the poller instead of logging from the timing loop
    #[serde(default)]
    pub enabled: bool,
    /// Query period per device
    #[serde(default = "default_poller_interval")]
    pub interval_ms: u64,
}

fn default_poller_interval() -> u64 {
    1000
}

/// One `[[devices]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique device name, used in logs and readings
    pub name: String,
    /// Device type (dummy, gpio_input, tenma_psu, cpu_temperature)
    #[serde(rename = "type")]
    pub kind: String,
    /// Disabled devices are skipped by the registry
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Per-channel calibration, aligned with the device's channels
    #[serde(default)]
    pub calibration: Vec<Calibration>,
    /// Settings for `type = "dummy"`
    #[serde(default)]
    pub dummy: Option<DummyConfig>,
    /// Settings for `type = "gpio_input"`
    #[serde(default)]
    pub gpio_input: Option<GpioInputConfig>,
    /// Settings for `type = "tenma_psu"`
    #[serde(default)]
    pub tenma_psu: Option<TenmaPsuConfig>,
    /// Settings for `type = "cpu_temperature"`
    #[serde(default)]
    pub cpu_temperature: Option<CpuTemperatureConfig>,
}

fn default_enabled() -> bool {
    true
}

impl DeviceDefinition {
    /// Definition with no type-specific block.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            enabled: true,
            calibration: Vec::new(),
            dummy: None,
            gpio_input: None,
            tenma_psu: None,
            cpu_temperature: None,
        }
    }

    /// The type-specific block, or a configuration error naming the device.
    pub fn require<'a, T>(&'a self, block: &'a Option<T>, key: &str) -> AppResult<&'a T> {
        block.as_ref().ok_or_else(|| {
            DaqError::Configuration(format!(
                "{} device '{}' missing '{}' configuration block",
                self.kind, self.name, key
            ))
        })
    }
}

impl Settings {
    /// Load from `PIDAQ_CONFIG` if set, else [`DEFAULT_CONFIG_PATH`].
    pub fn load() -> AppResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(path)
    }

    /// Load configuration from a specific file path, with environment overrides.
    ///
    /// # Errors
    ///
    /// A missing file, a type mismatch or a failed [`Settings::validate`].
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DaqError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let settings: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate a TOML document, without environment overrides.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let settings: Self = Figment::new().merge(Toml::string(toml)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize back to TOML, e.g. to dump the effective configuration.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("Failed to serialize settings: {}", e)))
    }

    /// Enabled device definitions in config order.
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|d| d.enabled)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Timing loop values and pin assignments
    /// - Device names are unique
    /// - Each known device type has its required block
    /// - GPIO input devices do not read output pins
    pub fn validate(&self) -> AppResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        self.timing_loop.validate()?;

        if self.retry.max_attempts == 0 {
            return Err(DaqError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(poller) = &self.poller {
            if poller.enabled && poller.interval_ms == 0 {
                return Err(DaqError::Configuration(
                    "poller.interval_ms must be at least 1".to_string(),
                ));
            }
        }

        let outputs: HashSet<u8> = self.timing_loop.output_pins().into_iter().collect();
        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(DaqError::Configuration(
                    "Device name cannot be empty".to_string(),
                ));
            }
            if !names.insert(device.name.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate device name: '{}'",
                    device.name
                )));
            }
            self.validate_device(device, &outputs)?;
        }
        Ok(())
    }

    fn validate_device(&self, device: &DeviceDefinition, outputs: &HashSet<u8>) -> AppResult<()> {
        match device.kind.as_str() {
            "gpio_input" => {
                let block = device.require(&device.gpio_input, "gpio_input")?;
                block.validate(&device.name)?;
                if let Some(pin) = block.pins.iter().find(|p| outputs.contains(*p)) {
                    return Err(DaqError::Configuration(format!(
                        "gpio_input device '{}' reads GPIO{}, which is an output",
                        device.name, pin
                    )));
                }
                if block.pins.contains(&self.timing_loop.trigger_pin) {
                    return Err(DaqError::Configuration(format!(
                        "gpio_input device '{}' reads the trigger pin GPIO{}",
                        device.name, self.timing_loop.trigger_pin
                    )));
                }
            }
            "tenma_psu" => {
                let block = device.require(&device.tenma_psu, "tenma_psu")?;
                if block.port.is_empty() {
                    return Err(DaqError::Configuration(format!(
                        "tenma_psu device '{}': 'port' cannot be empty",
                        device.name
                    )));
                }
            }
            "dummy" => {
                if let Some(block) = &device.dummy {
                    if block.n_channels == 0 {
                        return Err(DaqError::Configuration(format!(
                            "dummy device '{}': 'n_channels' must be > 0",
                            device.name
                        )));
                    }
                }
            }
            // Types added to a custom registry are checked when they are built.
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [timing_loop]
        trigger_pin = 16

        [[timing_loop.channels]]
        pin = 25
        name = "Sol1"
        delay_s = 0.5
        duration_s = 0.5
    "#;

    #[test]
    fn test_minimal_uses_defaults() {
        let settings = Settings::from_toml_str(MINIMAL).unwrap();
        assert_eq!(settings.application.log_level, "info");
        assert_eq!(settings.timing_loop.debounce_delay_s, 1.0);
        assert_eq!(settings.timing_loop.num_ensembles, 1);
        assert_eq!(settings.timing_loop.poll_interval_ms, 1);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert!(settings.devices.is_empty());
        assert!(settings.poller.is_none());
    }

    #[test]
    fn test_trigger_pin_as_output_rejected() {
        let toml = format!(
            "{}\n[timing_loop.busy_indicator]\npin = 16\n",
            MINIMAL
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("Trigger pin GPIO16"));
    }

    #[test]
    fn test_duplicate_output_pin_rejected() {
        let toml = format!(
            "{}\n[[timing_loop.channels]]\npin = 25\ndelay_s = 0.0\nduration_s = 0.1\n",
            MINIMAL
        );
        assert!(matches!(
            Settings::from_toml_str(&toml),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_negative_channel_timing_rejected() {
        let toml = MINIMAL.replace("delay_s = 0.5", "delay_s = -0.5");
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("delay must be a non-negative"));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let toml = format!("[application]\nlog_level = \"loud\"\n{}", MINIMAL);
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("Invalid log_level 'loud'"));
    }

    #[test]
    fn test_duplicate_device_names_rejected() {
        let toml = format!(
            "{}\n[[devices]]\nname = \"a\"\ntype = \"dummy\"\n[[devices]]\nname = \"a\"\ntype = \"dummy\"\n",
            MINIMAL
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("Duplicate device name: 'a'"));
    }

    #[test]
    fn test_missing_block_rejected() {
        let toml = format!(
            "{}\n[[devices]]\nname = \"psu\"\ntype = \"tenma_psu\"\n",
            MINIMAL
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("missing 'tenma_psu' configuration block"));
    }

    #[test]
    fn test_gpio_input_on_output_pin_rejected() {
        let toml = format!(
            "{}\n[[devices]]\nname = \"ttl\"\ntype = \"gpio_input\"\ngpio_input = {{ pins = [25] }}\n",
            MINIMAL
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("GPIO25, which is an output"));
    }

    #[test]
    fn test_gpio_input_short_pull_list_rejected() {
        let toml = format!(
            "{}\n[[devices]]\nname = \"ttl\"\ntype = \"gpio_input\"\ngpio_input = {{ pins = [5, 6, 7], pull_up = [true] }}\n",
            MINIMAL
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("1 pull_up entries for 3 pins"));
    }

    #[test]
    fn test_indicator_may_share_channel_pin() {
        let toml = format!(
            "{}\n[timing_loop.arm_indicator]\npin = 25\ninvert = true\n",
            MINIMAL
        );
        let settings = Settings::from_toml_str(&toml).unwrap();
        assert_eq!(settings.timing_loop.output_pins(), vec![25]);
    }

    #[test]
    fn test_indicators_on_same_pin_rejected() {
        let toml = format!(
            "{}\n[timing_loop.arm_indicator]\npin = 22\n[timing_loop.busy_indicator]\npin = 22\n",
            MINIMAL
        );
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("both use GPIO22"));
    }

    #[test]
    fn test_unrepresentable_debounce_rejected() {
        let toml = MINIMAL.replace("trigger_pin = 16", "trigger_pin = 16\ndebounce_delay_s = 1e300");
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(err.to_string().contains("debounce_delay_s"));
    }

    #[test]
    fn test_type_mismatch_is_config_error() {
        let toml = MINIMAL.replace("trigger_pin = 16", "trigger_pin = \"sixteen\"");
        assert!(matches!(
            Settings::from_toml_str(&toml),
            Err(DaqError::Config(_))
        ));
    }

    #[test]
    fn test_to_toml_reloads() {
        let settings = Settings::from_toml_str(MINIMAL).unwrap();
        let text = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml_str(&text).unwrap(), settings);
    }
}
