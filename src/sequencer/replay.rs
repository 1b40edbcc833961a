//! Replays an [`EventSequence`] against a GPIO backend.
//!
//! Every deadline is computed from one start instant captured before the first write,
//! so the time spent locking and writing a pin never accumulates into later edges.
//! Sleeps use `tokio::time`, which lets tests run the replay on a paused clock.

use super::EventSequence;
use crate::error::{AppResult, DaqError};
use crate::gpio::SharedGpio;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Drives a precomputed sequence onto the output pins.
pub struct SequencePlayer;

impl SequencePlayer {
    /// Play `sequence` once, returning the wall time the replay took.
    ///
    /// GPIO errors abort the replay at the failing step, as does a deadline too far
    /// out for the clock to represent.
    pub async fn play(sequence: &EventSequence, gpio: &SharedGpio) -> AppResult<Duration> {
        let start = Instant::now();
        let offsets = sequence.offsets();

        for (k, event) in sequence.events().iter().enumerate() {
            gpio.lock().await.write(event.pin, event.level)?;
            trace!(pin = event.pin, level = event.level, "sequence step {}", k);

            if event.wait_s > 0.0 {
                let next = offsets[k] + event.wait_s;
                let deadline = Duration::try_from_secs_f64(next)
                    .ok()
                    .and_then(|offset| start.checked_add(offset))
                    .ok_or_else(|| {
                        DaqError::InvalidArgument(format!(
                            "sequence step {} waits until {} s, which is out of range",
                            k, next
                        ))
                    })?;
                sleep_until(deadline).await;
            }
        }

        Ok(start.elapsed())
    }
}
