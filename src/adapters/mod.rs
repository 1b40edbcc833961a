//! Line-oriented transport adapters
//!
//! Text-protocol instruments (the TENMA supply, SCPI-ish meters) only need to write a
//! terminated command and read one delimited response line. The [`LineTransport`]
//! trait captures that; drivers own a `Box<dyn LineTransport>` so tests can swap in
//! [`MockAdapter`].

pub mod mock;
pub mod serial_adapter;

pub use mock::MockAdapter;
pub use serial_adapter::SerialAdapter;

use anyhow::Result;
use async_trait::async_trait;

/// Request/response transport for ASCII instruments.
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Adapter kind for logs (e.g. "serial").
    fn name(&self) -> &str;

    /// Open the underlying port.
    async fn connect(&mut self) -> Result<()>;

    /// Close the underlying port. Closing an unopened adapter is a no-op.
    async fn disconnect(&mut self) -> Result<()>;

    /// Write a command without waiting for a reply.
    async fn send(&mut self, command: &str) -> Result<()>;

    /// Write a command and return the trimmed response line.
    async fn query(&mut self, query: &str) -> Result<String>;
}
