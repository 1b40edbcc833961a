//! Scripted [`LineTransport`] for driver tests.

use super::LineTransport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MockState {
    connected: bool,
    sent: Vec<String>,
    fixed: HashMap<String, String>,
    queued: HashMap<String, VecDeque<String>>,
}

/// Scripted transport. Clones share state so a test can keep a handle after moving
/// the adapter into a driver.
///
/// Queued responses are consumed first; after that the fixed response (if any) is
/// returned for every query of that command. Unknown commands fail.
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Empty transport: no scripted responses, not connected.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Always answer `command` with `response`.
    pub fn respond(self, command: &str, response: &str) -> Self {
        self.state()
            .fixed
            .insert(command.to_string(), response.to_string());
        self
    }

    /// Answer the next query of `command` with `response`.
    pub fn queue(&self, command: &str, response: &str) {
        self.state()
            .queued
            .entry(command.to_string())
            .or_default()
            .push_back(response.to_string());
    }

    /// Every command written so far, queries included.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// True between `connect` and `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.state().connected
    }
}

#[async_trait]
impl LineTransport for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&mut self) -> Result<()> {
        self.state().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state().connected = false;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        let mut state = self.state();
        if !state.connected {
            return Err(anyhow!("Mock adapter not connected"));
        }
        state.sent.push(command.to_string());
        Ok(())
    }

    async fn query(&mut self, query: &str) -> Result<String> {
        let mut state = self.state();
        if !state.connected {
            return Err(anyhow!("Mock adapter not connected"));
        }
        state.sent.push(query.to_string());
        if let Some(response) = state.queued.get_mut(query).and_then(VecDeque::pop_front) {
            return Ok(response);
        }
        state
            .fixed
            .get(query)
            .cloned()
            .ok_or_else(|| anyhow!("No scripted response for '{}'", query))
    }
}
