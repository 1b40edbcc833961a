//! Device readings and per-channel calibration.
//!
//! A [`Reading`] is what one `Device::query` returns: a timestamp plus one
//! [`ChannelValue`] per channel, each carrying the raw sample and its scaled
//! engineering value.

pub mod calibration;
pub mod reading;

pub use calibration::{Calibration, ChannelSpec};
pub use reading::{ChannelValue, Reading};
