//! Destinations for device readings.

pub mod sink;

pub use sink::{LoggedReading, MemorySink, ReadingSink, TracingSink};
