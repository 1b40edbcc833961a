//! The GPIO timing loop.
//!
//! [`TimingLoop`] owns everything a triggered rig needs: the GPIO handle, the event
//! sequence (built once from the configured channels), the devices and the sink.
//! Each accepted trigger replays the sequence, then runs `num_ensembles` logging
//! rounds:
//!
//! 1. arm indicator active, query every device, arm indicator back to rest
//! 2. busy indicator active, persist and print every device
//! 3. wait `logging_period_s`, busy indicator back to rest, bump the loop counter
//!
//! The trigger pin is a pulled-up input; a trigger is the line reading low while
//! more than `debounce_delay_s` has passed since the previous accepted trigger.

use crate::config::{IndicatorConfig, TimingLoopConfig};
use crate::data::ReadingSink;
use crate::error::{AppResult, DaqError};
use crate::error_recovery::{query_with_retry, RetryPolicy};
use crate::gpio::{Pull, SharedGpio};
use crate::instrument::Device;
use crate::sequencer::{EventSequence, SequencePlayer};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

const RULE: &str = "===============================================================================";

/// Trigger-driven sequencer and logger for one rig.
pub struct TimingLoop {
    config: TimingLoopConfig,
    gpio: SharedGpio,
    sequence: EventSequence,
    devices: Vec<Box<dyn Device>>,
    sink: Box<dyn ReadingSink>,
    retry: RetryPolicy,
    loop_counter: u64,
    last_trigger: Option<Instant>,
}

impl TimingLoop {
    /// Validate `config` and build the event sequence.
    pub fn new(
        config: TimingLoopConfig,
        gpio: SharedGpio,
        devices: Vec<Box<dyn Device>>,
        sink: Box<dyn ReadingSink>,
    ) -> AppResult<Self> {
        config.validate()?;
        let sequence = EventSequence::from_channels(&config.channels)?;
        Ok(Self {
            loop_counter: config.loop_counter_start,
            config,
            gpio,
            sequence,
            devices,
            sink,
            retry: RetryPolicy::default(),
            last_trigger: None,
        })
    }

    /// Retry policy for device queries during logging rounds.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Next loop counter value to be logged.
    pub fn loop_counter(&self) -> u64 {
        self.loop_counter
    }

    /// Sequence replayed on every trigger.
    pub fn sequence(&self) -> &EventSequence {
        &self.sequence
    }

    /// Devices logged on every trigger.
    pub fn devices(&self) -> &[Box<dyn Device>] {
        &self.devices
    }

    /// Configure the pins and activate every device.
    pub async fn setup(&mut self) -> Result<()> {
        {
            let mut gpio = self.gpio.lock().await;
            gpio.setup_input(self.config.trigger_pin, Pull::Up)?;
            for channel in &self.config.channels {
                gpio.setup_output(channel.pin, channel.rest_level())?;
            }
            for indicator in self.indicators() {
                gpio.setup_output(indicator.pin, indicator.rest_level())?;
            }
            info!(
                "GPIO ready on {}: trigger GPIO{}, outputs {:?}",
                gpio.name(),
                self.config.trigger_pin,
                self.config.output_pins()
            );
        }

        for device in &mut self.devices {
            device
                .activate()
                .await
                .with_context(|| format!("Failed to activate '{}'", device.name()))?;
        }
        info!("{} device(s) active", self.devices.len());
        Ok(())
    }

    fn indicators(&self) -> impl Iterator<Item = IndicatorConfig> {
        self.config
            .busy_indicator
            .into_iter()
            .chain(self.config.arm_indicator)
    }

    /// Check the trigger input at `now`; `true` means a trigger was accepted.
    pub async fn poll_trigger(&mut self, now: Instant) -> AppResult<bool> {
        let level = self.gpio.lock().await.read(self.config.trigger_pin)?;
        if level {
            return Ok(false);
        }
        let debounce = seconds(self.config.debounce_delay_s, "debounce_delay_s")?;
        let armed = match self.last_trigger {
            None => true,
            Some(last) => now.saturating_duration_since(last) > debounce,
        };
        if armed {
            self.last_trigger = Some(now);
        }
        Ok(armed)
    }

    /// Replay the sequence, then run the logging rounds.
    pub async fn fire(&mut self) -> Result<()> {
        let elapsed = SequencePlayer::play(&self.sequence, &self.gpio).await?;
        debug!("Sequence replayed in {:?}", elapsed);

        for ensemble in 0..self.config.num_ensembles {
            debug!("Ensemble {}/{}", ensemble + 1, self.config.num_ensembles);
            self.log_ensemble().await?;
        }
        info!("{}", RULE);
        info!("Loop counter = {}\tWaiting for trigger", self.loop_counter);
        Ok(())
    }

    async fn log_ensemble(&mut self) -> Result<()> {
        self.drive_indicator(self.config.arm_indicator, true).await?;
        for device in &mut self.devices {
            query_with_retry(device.as_mut(), &self.retry).await?;
        }
        self.drive_indicator(self.config.arm_indicator, false).await?;

        self.drive_indicator(self.config.busy_indicator, true).await?;
        for device in &self.devices {
            device
                .persist(self.sink.as_mut(), Some(self.loop_counter))
                .await?;
            info!("{}", device.describe());
        }

        if self.config.logging_period_s > 0.0 {
            sleep(seconds(self.config.logging_period_s, "logging_period_s")?).await;
        }
        self.drive_indicator(self.config.busy_indicator, false).await?;
        self.loop_counter += 1;
        Ok(())
    }

    async fn drive_indicator(&self, indicator: Option<IndicatorConfig>, active: bool) -> AppResult<()> {
        if let Some(indicator) = indicator {
            let level = if active {
                indicator.active_level()
            } else {
                indicator.rest_level()
            };
            self.gpio.lock().await.write(indicator.pin, level)?;
        }
        Ok(())
    }

    /// Poll the trigger until `shutdown` turns true (or its sender goes away), then
    /// clean up. An error from a trigger cycle stops the loop; cleanup still runs.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("{}", RULE);
        info!("Loop counter = {}\nWaiting for trigger", self.loop_counter);

        let outcome: Result<()> = if *shutdown.borrow() {
            Ok(())
        } else {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Shutdown requested");
                            break Ok(());
                        }
                    }
                    _ = ticker.tick() => {
                        match self.poll_trigger(Instant::now()).await {
                            Ok(true) => {
                                if let Err(e) = self.fire().await {
                                    break Err(e);
                                }
                            }
                            Ok(false) => {}
                            Err(e) => break Err(e.into()),
                        }
                    }
                }
            }
        };

        if let Err(e) = &outcome {
            error!("Timing loop stopped: {:#}", e);
        }
        let cleanup = self.cleanup().await;
        outcome?;
        cleanup.map_err(Into::into)
    }

    /// Shut down every device, flush the sink and release the GPIO.
    pub async fn cleanup(&mut self) -> AppResult<()> {
        let mut errors = Vec::new();

        for device in &mut self.devices {
            if let Err(e) = device.shutdown().await {
                error!("Failed to shut down '{}': {:#}", device.name(), e);
                errors.push(DaqError::Instrument(format!("{}: {:#}", device.name(), e)));
            }
        }
        if let Err(e) = self.sink.flush().await {
            error!("Failed to flush sink: {:#}", e);
            errors.push(DaqError::Instrument(format!("sink: {:#}", e)));
        }
        if let Err(e) = self.gpio.lock().await.cleanup() {
            error!("Failed to release GPIO: {}", e);
            errors.push(e);
        }

        if errors.is_empty() {
            info!("Timing loop cleaned up at loop counter {}", self.loop_counter);
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

fn seconds(value: f64, field: &str) -> AppResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        DaqError::Configuration(format!("{} = {} is not a usable duration: {}", field, value, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySink;
    use crate::gpio::{shared, MockGpio};
    use crate::instrument::dummy::DummyDevice;
    use crate::sequencer::OutputChannel;

    fn rig(config: TimingLoopConfig) -> (TimingLoop, MockGpio, MemorySink) {
        let mock = MockGpio::new();
        let sink = MemorySink::new();
        let devices: Vec<Box<dyn Device>> =
            vec![Box::new(DummyDevice::with_phases("dummy", vec![0.0], 1.0).unwrap())];
        let timing =
            TimingLoop::new(config, shared(mock.clone()), devices, Box::new(sink.clone())).unwrap();
        (timing, mock, sink)
    }

    fn config() -> TimingLoopConfig {
        TimingLoopConfig::new(
            16,
            vec![
                OutputChannel::new(12, "TTL1", 0.0, 0.05),
                OutputChannel::new(13, "TTL2", 0.001, 0.05).inverted(),
            ],
        )
    }

    #[tokio::test]
    async fn test_setup_puts_outputs_at_rest() {
        let (mut timing, mock, _) = rig(config());
        timing.setup().await.unwrap();
        assert_eq!(mock.pull(16), Some(Pull::Up));
        assert_eq!(mock.level(12), Some(false));
        assert_eq!(mock.level(13), Some(true));
        assert!(timing.devices()[0].last_reading().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce() {
        let (mut timing, mock, _) = rig(config());
        timing.setup().await.unwrap();
        let t0 = Instant::now();

        assert!(!timing.poll_trigger(t0).await.unwrap());

        mock.set_input(16, false);
        assert!(timing.poll_trigger(t0).await.unwrap());
        assert!(!timing.poll_trigger(t0 + Duration::from_millis(500)).await.unwrap());
        assert!(!timing.poll_trigger(t0 + Duration::from_secs(1)).await.unwrap());
        assert!(timing.poll_trigger(t0 + Duration::from_millis(1001)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_counts_ensembles() {
        let mut cfg = config();
        cfg.num_ensembles = 3;
        cfg.loop_counter_start = 10;
        let (mut timing, _, sink) = rig(cfg);
        timing.setup().await.unwrap();
        timing.fire().await.unwrap();

        assert_eq!(timing.loop_counter(), 13);
        let counters: Vec<_> = sink.records().iter().map(|r| r.loop_counter).collect();
        assert_eq!(counters, vec![Some(10), Some(11), Some(12)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_indicator_shares_channel_pin() {
        let mut cfg = TimingLoopConfig::new(16, vec![OutputChannel::new(22, "TRG LED", 0.0, 0.05)]);
        cfg.arm_indicator = Some(IndicatorConfig {
            pin: 22,
            invert: true,
        });
        let (mut timing, mock, _) = rig(cfg);
        timing.setup().await.unwrap();
        // Indicators are set up after channels, so the pin rests at the indicator level.
        assert_eq!(mock.level(22), Some(true));

        timing.fire().await.unwrap();
        let levels: Vec<bool> = mock.writes_for(22).iter().map(|w| w.level).collect();
        assert_eq!(levels, vec![true, false, false, true]);
    }

    #[tokio::test]
    async fn test_cleanup_releases_gpio() {
        let (mut timing, mock, _) = rig(config());
        timing.setup().await.unwrap();
        timing.cleanup().await.unwrap();
        assert_eq!(mock.cleanup_count(), 1);
        assert!(!mock.is_output(12));
    }

    #[test]
    fn test_new_rejects_bad_channel() {
        let cfg = TimingLoopConfig::new(16, vec![OutputChannel::new(12, "", -1.0, 0.1)]);
        let devices: Vec<Box<dyn Device>> = Vec::new();
        let result = TimingLoop::new(
            cfg,
            shared(MockGpio::new()),
            devices,
            Box::new(MemorySink::new()),
        );
        assert!(result.is_err());
    }
}
