//! Core library for the pi_daq rig.
//!
//! A Raspberry Pi watches a trigger input; on every trigger it replays a fixed pulse
//! pattern on its output lines, then queries a set of data-acquisition devices and
//! hands their readings to a sink. The binary in `main.rs` wires these pieces from a
//! configuration file.
//!
//! - [`sequencer`]: turns per-channel delay/duration tables into one ordered event list
//! - [`gpio`]: pin access behind a trait, with a mock and an `rppal` backend
//! - [`instrument`]: the [`instrument::Device`] trait and its drivers
//! - [`timing_loop`]: trigger detection, replay and logging rounds
//! - [`poller`]: free-running per-device logging

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod gpio;
pub mod instrument;
pub mod measurement;
pub mod poller;
pub mod registry;
pub mod sequencer;
pub mod timing_loop;
