//! Reading sinks.
//!
//! A sink receives every persisted reading together with the loop counter of the
//! ensemble it belongs to (`None` for readings from the background poller).

use crate::measurement::Reading;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Receives persisted readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    /// Store one reading tagged with the loop counter it belongs to.
    async fn write(&mut self, reading: &Reading, loop_counter: Option<u64>) -> Result<()>;

    /// Push out anything buffered.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A reading as stored by [`MemorySink`].
#[derive(Clone, Debug, PartialEq)]
pub struct LoggedReading {
    /// Loop counter at the time of writing; `None` from the poller
    pub loop_counter: Option<u64>,
    /// The reading itself
    pub reading: Reading,
}

/// Keeps every reading in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LoggedReading>>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records so far.
    pub fn records(&self) -> Vec<LoggedReading> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True before anything was written.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReadingSink for MemorySink {
    async fn write(&mut self, reading: &Reading, loop_counter: Option<u64>) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LoggedReading {
                loop_counter,
                reading: reading.clone(),
            });
        Ok(())
    }
}

/// Emits each reading as a structured `tracing` event under the `pi_daq::readings`
/// target, so `RUST_LOG=pi_daq::readings=info` isolates the data stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Sink logging at `info`.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReadingSink for TracingSink {
    async fn write(&mut self, reading: &Reading, loop_counter: Option<u64>) -> Result<()> {
        let values = serde_json::to_string(&reading.channels)?;
        info!(
            target: "pi_daq::readings",
            device = %reading.device,
            timestamp = %reading.timestamp.to_rfc3339(),
            loop_counter = ?loop_counter,
            values = %values,
            "reading"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ChannelSpec;
    use tracing_test::traced_test;

    fn reading() -> Reading {
        Reading::from_samples("dummy", &[ChannelSpec::new("Value1", "")], &[Some(0.5)])
    }

    #[tokio::test]
    async fn test_memory_sink_shares_buffer_between_clones() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.write(&reading(), Some(3)).await.unwrap();
        writer.flush().await.unwrap();

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].loop_counter, Some(3));
        assert_eq!(records[0].reading.device, "dummy");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_tracing_sink_logs_device_and_values() {
        let mut sink = TracingSink::new();
        sink.write(&reading(), Some(7)).await.unwrap();
        assert!(logs_contain("device=dummy"));
        assert!(logs_contain("Value1"));
    }
}
