//! End-to-end runs of the timing loop against mock GPIO on a paused clock.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pi_daq::config::{IndicatorConfig, TimingLoopConfig};
use pi_daq::data::MemorySink;
use pi_daq::error_recovery::RetryPolicy;
use pi_daq::gpio::{shared, MockGpio};
use pi_daq::instrument::dummy::DummyDevice;
use pi_daq::instrument::Device;
use pi_daq::measurement::Reading;
use pi_daq::sequencer::OutputChannel;
use pi_daq::timing_loop::TimingLoop;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const TRIGGER: u8 = 16;
const TTL: u8 = 12;
const ARM: u8 = 20;
const BUSY: u8 = 21;

fn config() -> TimingLoopConfig {
    let mut config = TimingLoopConfig::new(TRIGGER, vec![OutputChannel::new(TTL, "TTL1", 0.0, 0.05)]);
    config.arm_indicator = Some(IndicatorConfig {
        pin: ARM,
        invert: false,
    });
    config.busy_indicator = Some(IndicatorConfig {
        pin: BUSY,
        invert: true,
    });
    config
}

fn dummy() -> Box<dyn Device> {
    Box::new(DummyDevice::with_phases("dummy", vec![0.0, 1.0], 1.0).unwrap())
}

fn levels(mock: &MockGpio, pin: u8) -> Vec<bool> {
    mock.writes_for(pin).iter().map(|w| w.level).collect()
}

#[tokio::test(start_paused = true)]
async fn test_trigger_runs_sequence_and_ensembles() {
    let mut cfg = config();
    cfg.num_ensembles = 2;
    cfg.logging_period_s = 0.5;

    let mock = MockGpio::new();
    let sink = MemorySink::new();
    let mut timing =
        TimingLoop::new(cfg, shared(mock.clone()), vec![dummy()], Box::new(sink.clone())).unwrap();
    timing.setup().await.unwrap();

    let (tx, rx) = watch::channel(false);
    mock.set_input(TRIGGER, false);
    let handle = tokio::spawn(async move {
        let outcome = timing.run(rx).await;
        (timing, outcome)
    });

    sleep(Duration::from_millis(10)).await;
    mock.set_input(TRIGGER, true);
    sleep(Duration::from_secs(2)).await;
    tx.send(true).unwrap();

    let (timing, outcome) = handle.await.unwrap();
    outcome.unwrap();

    assert_eq!(timing.loop_counter(), 2);
    assert_eq!(levels(&mock, TTL), vec![true, false]);
    assert_eq!(levels(&mock, ARM), vec![true, false, true, false]);
    assert_eq!(levels(&mock, BUSY), vec![false, true, false, true]);

    let busy = mock.writes_for(BUSY);
    assert!(busy[1].at - busy[0].at >= Duration::from_millis(500));

    let counters: Vec<_> = sink.records().iter().map(|r| r.loop_counter).collect();
    assert_eq!(counters, vec![Some(0), Some(1)]);
    assert_eq!(mock.cleanup_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_held_trigger_is_debounced() {
    let mock = MockGpio::new();
    let sink = MemorySink::new();
    let mut timing = TimingLoop::new(
        config(),
        shared(mock.clone()),
        vec![dummy()],
        Box::new(sink.clone()),
    )
    .unwrap();
    timing.setup().await.unwrap();

    let (tx, rx) = watch::channel(false);
    mock.set_input(TRIGGER, false);
    let handle = tokio::spawn(async move { timing.run(rx).await });

    sleep(Duration::from_millis(2500)).await;
    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    // Accepted at ~0 s, just after 1 s and just after 2 s.
    assert_eq!(levels(&mock, TTL).len(), 6);
    assert_eq!(sink.len(), 3);
}

#[tokio::test]
async fn test_shutdown_before_trigger_cleans_up() {
    let mock = MockGpio::new();
    let mut timing = TimingLoop::new(
        config(),
        shared(mock.clone()),
        vec![dummy()],
        Box::new(MemorySink::new()),
    )
    .unwrap();
    timing.setup().await.unwrap();

    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();
    timing.run(rx).await.unwrap();

    assert_eq!(timing.loop_counter(), 0);
    assert!(mock.writes_for(TTL).is_empty());
    assert_eq!(mock.cleanup_count(), 1);
}

struct BrokenProbe;

#[async_trait]
impl Device for BrokenProbe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn activate(&mut self) -> Result<()> {
        Ok(())
    }

    async fn query(&mut self) -> Result<Reading> {
        Err(anyhow!("checksum mismatch"))
    }

    fn last_reading(&self) -> Option<&Reading> {
        None
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_device_failure_stops_loop_after_cleanup() {
    let mock = MockGpio::new();
    let devices: Vec<Box<dyn Device>> = vec![Box::new(BrokenProbe)];
    let mut timing = TimingLoop::new(
        config(),
        shared(mock.clone()),
        devices,
        Box::new(MemorySink::new()),
    )
    .unwrap()
    .with_retry(RetryPolicy::no_retry());
    timing.setup().await.unwrap();

    let (_tx, rx) = watch::channel(false);
    mock.set_input(TRIGGER, false);
    let err = timing.run(rx).await.unwrap_err();

    assert!(format!("{:#}", err).contains("checksum mismatch"));
    assert_eq!(timing.loop_counter(), 0);
    assert_eq!(mock.cleanup_count(), 1);
    // The pulse went out before the failing query.
    assert_eq!(levels(&mock, TTL), vec![true, false]);
}
