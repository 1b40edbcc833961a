//! Background logger: every device is polled from its own task at a fixed interval,
//! and readings funnel through an `mpsc` channel into a single sink task.
//!
//! Readings from the poller carry no loop counter. A failing device only logs a
//! warning; the other devices keep going.

use crate::data::ReadingSink;
use crate::error::{AppResult, DaqError};
use crate::error_recovery::{query_with_retry, RetryPolicy};
use crate::instrument::Device;
use crate::measurement::Reading;
use futures::future::join_all;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Background logger: one task per device feeding a single sink task.
pub struct DevicePoller {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<Box<dyn Device>>>,
    writer: JoinHandle<Box<dyn ReadingSink>>,
}

impl DevicePoller {
    /// Start polling with the default retry policy.
    pub fn spawn(
        devices: Vec<Box<dyn Device>>,
        period: Duration,
        sink: Box<dyn ReadingSink>,
    ) -> Self {
        Self::spawn_with_retry(devices, period, sink, RetryPolicy::default())
    }

    /// Start one task per device plus the sink task. Devices are activated by their
    /// own task.
    pub fn spawn_with_retry(
        devices: Vec<Box<dyn Device>>,
        period: Duration,
        mut sink: Box<dyn ReadingSink>,
        retry: RetryPolicy,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel::<Reading>(CHANNEL_CAPACITY);

        info!("Polling {} device(s) every {:?}", devices.len(), period);
        let workers = devices
            .into_iter()
            .map(|device| {
                tokio::spawn(poll_device(
                    device,
                    period,
                    retry.clone(),
                    tx.clone(),
                    shutdown.subscribe(),
                ))
            })
            .collect();
        drop(tx);

        let writer = tokio::spawn(async move {
            while let Some(reading) = rx.recv().await {
                if let Err(e) = sink.write(&reading, None).await {
                    warn!("Failed to persist reading from '{}': {:#}", reading.device, e);
                }
            }
            if let Err(e) = sink.flush().await {
                warn!("Failed to flush sink: {:#}", e);
            }
            sink
        });

        Self {
            shutdown,
            workers,
            writer,
        }
    }

    /// Stop every task, shut the devices down and hand back the sink.
    pub async fn stop(self) -> AppResult<Box<dyn ReadingSink>> {
        // Receivers may already be gone if every worker exited early.
        let _ = self.shutdown.send(true);

        let mut errors = Vec::new();
        for joined in join_all(self.workers).await {
            match joined {
                Ok(mut device) => {
                    if let Err(e) = device.shutdown().await {
                        error!("Failed to shut down '{}': {:#}", device.name(), e);
                        errors.push(DaqError::Instrument(format!("{}: {:#}", device.name(), e)));
                    }
                }
                Err(e) => errors.push(DaqError::Instrument(format!("poll task failed: {}", e))),
            }
        }

        let sink = self
            .writer
            .await
            .map_err(|e| DaqError::Instrument(format!("sink task failed: {}", e)))?;

        if errors.is_empty() {
            info!("Poller stopped");
            Ok(sink)
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

async fn poll_device(
    mut device: Box<dyn Device>,
    period: Duration,
    retry: RetryPolicy,
    tx: mpsc::Sender<Reading>,
    mut shutdown: watch::Receiver<bool>,
) -> Box<dyn Device> {
    if let Err(e) = device.activate().await {
        warn!("Failed to activate '{}': {:#}", device.name(), e);
    }

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match query_with_retry(device.as_mut(), &retry).await {
                    Ok(reading) => {
                        debug!("{}", device.describe());
                        if tx.send(reading).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Polling '{}': {:#}", device.name(), e),
                }
            }
        }
    }
    device
}
