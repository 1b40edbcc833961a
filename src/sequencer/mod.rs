//! GPIO timed-event sequencer.
//!
//! Turns a table of output channels (pin, delay, pulse length, polarity) into a single
//! time-ordered list of `(pin, level, wait)` actions. Replaying that list against one
//! clock reference produces every channel's pulse with the requested relative timing,
//! instead of running one timer per channel.
//!
//! # Algorithm
//!
//! 1. Each channel contributes a rising entry at `delay` (level = `!invert`) and a
//!    falling entry at `delay + duration` (level = `invert`).
//! 2. The combined list holds all rising entries in channel order followed by all
//!    falling entries in channel order.
//! 3. The list is sorted by timestamp with a stable sort, so equal timestamps keep
//!    their combined-list order.
//! 4. Each event waits for the gap to the next event; the last event waits zero.
//!
//! A zero-duration channel therefore produces its rising entry immediately followed by
//! its falling entry: the line is driven active and returned to rest within one step.
//!
//! # Example
//!
//! ```
//! use pi_daq::sequencer::build_sequence;
//!
//! let seq = build_sequence(&[25, 12], &[0.5, 0.0], &[0.5, 0.001], &[false, false])?;
//! assert_eq!(seq.pins(), vec![12, 12, 25, 25]);
//! assert_eq!(seq.levels(), vec![true, false, true, false]);
//! # Ok::<(), pi_daq::error::DaqError>(())
//! ```

pub mod replay;

pub use replay::SequencePlayer;

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One controlled output line with its own timing parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputChannel {
    /// BCM pin number.
    pub pin: u8,
    /// Human-readable label used in logs (e.g. "Sol1", "TTL2").
    #[serde(default)]
    pub name: String,
    /// Seconds from trigger to the active edge.
    pub delay_s: f64,
    /// Pulse width in seconds.
    pub duration_s: f64,
    /// Active-low output: rests high and pulses low.
    #[serde(default)]
    pub invert: bool,
}

impl OutputChannel {
    /// Create an active-high channel.
    pub fn new(pin: u8, name: impl Into<String>, delay_s: f64, duration_s: f64) -> Self {
        Self {
            pin,
            name: name.into(),
            delay_s,
            duration_s,
            invert: false,
        }
    }

    /// Same channel with inverted polarity.
    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    /// Level the line sits at between triggers.
    pub fn rest_level(&self) -> bool {
        self.invert
    }

    /// Level the line is driven to during the pulse.
    pub fn active_level(&self) -> bool {
        !self.invert
    }

    /// Name used when printing the sequence; falls back to the pin number.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("GPIO{}", self.pin)
        } else {
            self.name.clone()
        }
    }

    /// Checks delay, duration and pulse end are finite, non-negative seconds.
    pub fn validate(&self) -> AppResult<()> {
        if !self.delay_s.is_finite() || self.delay_s < 0.0 {
            return Err(DaqError::InvalidArgument(format!(
                "channel on pin {}: delay must be a non-negative number of seconds, got {}",
                self.pin, self.delay_s
            )));
        }
        if !self.duration_s.is_finite() || self.duration_s < 0.0 {
            return Err(DaqError::InvalidArgument(format!(
                "channel on pin {}: duration must be a non-negative number of seconds, got {}",
                self.pin, self.duration_s
            )));
        }
        if !(self.delay_s + self.duration_s).is_finite() {
            return Err(DaqError::InvalidArgument(format!(
                "channel on pin {}: pulse end {} + {} s overflows",
                self.pin, self.delay_s, self.duration_s
            )));
        }
        Ok(())
    }
}

/// A single step of the merged sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    /// Pin to drive.
    pub pin: u8,
    /// Level to drive it to (`true` = high).
    pub level: bool,
    /// Absolute time of this edge, seconds from trigger.
    pub at_s: f64,
    /// Seconds to wait after this event before the next one.
    pub wait_s: f64,
    /// Index of the originating channel in the input table.
    pub channel: usize,
}

/// Time-ordered action list computed once from a channel table.
#[derive(Clone, Debug, PartialEq)]
pub struct EventSequence {
    events: Vec<Event>,
    names: Vec<String>,
}

/// Builds a sequence from parallel channel tables.
///
/// All four slices describe the same channels index by index and must have equal
/// length; otherwise `DaqError::InvalidArgument` is returned.
pub fn build_sequence(
    pins: &[u8],
    delays: &[f64],
    durations: &[f64],
    inverts: &[bool],
) -> AppResult<EventSequence> {
    let n = pins.len();
    if delays.len() != n || durations.len() != n || inverts.len() != n {
        return Err(DaqError::InvalidArgument(
            "channel arrays must have equal length".to_string(),
        ));
    }

    let channels: Vec<OutputChannel> = (0..n)
        .map(|i| OutputChannel {
            pin: pins[i],
            name: String::new(),
            delay_s: delays[i],
            duration_s: durations[i],
            invert: inverts[i],
        })
        .collect();

    EventSequence::from_channels(&channels)
}

impl EventSequence {
    /// Builds the merged, time-ordered sequence for `channels`.
    pub fn from_channels(channels: &[OutputChannel]) -> AppResult<Self> {
        for channel in channels {
            channel.validate()?;
        }

        let rising = channels.iter().enumerate().map(|(i, c)| Event {
            pin: c.pin,
            level: c.active_level(),
            at_s: c.delay_s,
            wait_s: 0.0,
            channel: i,
        });
        let falling = channels.iter().enumerate().map(|(i, c)| Event {
            pin: c.pin,
            level: c.rest_level(),
            at_s: c.delay_s + c.duration_s,
            wait_s: 0.0,
            channel: i,
        });

        let mut events: Vec<Event> = rising.chain(falling).collect();
        // sort_by is stable: ties keep combined-list order
        events.sort_by(|a, b| a.at_s.total_cmp(&b.at_s));

        for k in 1..events.len() {
            events[k - 1].wait_s = events[k].at_s - events[k - 1].at_s;
        }

        Ok(Self {
            events,
            names: channels.iter().map(OutputChannel::display_name).collect(),
        })
    }

    /// Ordered events.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Ordered pins.
    pub fn pins(&self) -> Vec<u8> {
        self.events.iter().map(|e| e.pin).collect()
    }

    /// Ordered levels.
    pub fn levels(&self) -> Vec<bool> {
        self.events.iter().map(|e| e.level).collect()
    }

    /// Ordered waits in seconds; the last entry is always zero.
    pub fn waits(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.wait_s).collect()
    }

    /// Time of each event relative to the first one (prefix sums of the waits).
    pub fn offsets(&self) -> Vec<f64> {
        let mut elapsed = 0.0;
        self.events
            .iter()
            .map(|e| {
                let at = elapsed;
                elapsed += e.wait_s;
                at
            })
            .collect()
    }

    /// Sum of all waits: time from the first to the last edge.
    pub fn total_duration(&self) -> f64 {
        self.events.iter().map(|e| e.wait_s).sum()
    }

    /// Number of events (twice the channel count).
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when built from an empty channel table.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Display name of the channel that produced `event`.
    pub fn channel_name(&self, event: &Event) -> &str {
        self.names
            .get(event.channel)
            .map(String::as_str)
            .unwrap_or("?")
    }
}

impl fmt::Display for EventSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.events {
            writeln!(
                f,
                "Pin {} ({}) = {}, then wait {:.6} s",
                event.pin,
                self.channel_name(event),
                u8::from(event.level),
                event.wait_s
            )?;
        }
        write!(f, "Then wait for next trigger.")
    }
}
