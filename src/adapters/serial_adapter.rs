//! Line-oriented serial port transport.
//!
//! `serialport` is blocking, so every read and write runs on `spawn_blocking`. Without
//! the `instrument_serial` feature each operation fails with `FeatureNotEnabled`.

use super::LineTransport;
use crate::error::DaqError;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Default overall response timeout.
pub const DEFAULT_SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial adapter for RS-232 / USB-serial instruments
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "/dev/ttyACM0")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Overall response timeout
    timeout: Duration,

    /// Line terminator for commands (e.g., "\n")
    line_terminator: String,

    /// Response line ending character
    response_delimiter: u8,

    /// The actual serial port (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with `\n` framing
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_SERIAL_TIMEOUT,
            line_terminator: "\n".to_string(),
            response_delimiter: b'\n',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Overall deadline for one query.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Line terminator appended to commands and the byte that ends a response.
    pub fn with_terminator(mut self, terminator: &str, delimiter: u8) -> Self {
        self.line_terminator = terminator.to_string();
        self.response_delimiter = delimiter;
        self
    }

    /// Serial device path.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Overall query timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| DaqError::SerialPortNotConnected.into())
    }
}

#[async_trait]
impl LineTransport for SerialAdapter {
    fn name(&self) -> &str {
        "serial"
    }

    async fn connect(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(100)) // Internal read timeout
                .open()
                .with_context(|| {
                    format!(
                        "Failed to open serial port '{}' at {} baud",
                        self.port_name, self.baud_rate
                    )
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));

            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let command_str = format!("{}{}", command, self.line_terminator);

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> Result<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard
                    .write_all(command_str.as_bytes())
                    .context("Failed to write to serial port")?;
                port_guard.flush().context("Failed to flush serial port")?;

                debug!("Sent serial command: {}", command_str.trim());
                Ok(())
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
        }
    }

    async fn query(&mut self, query: &str) -> Result<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let command_str = format!("{}{}", query, self.line_terminator);
            let delimiter = self.response_delimiter;
            let timeout = self.timeout;

            tokio::task::spawn_blocking(move || -> Result<String> {
                use std::io::{Read, Write};

                let mut port_guard = port.blocking_lock();
                port_guard
                    .write_all(command_str.as_bytes())
                    .context("Failed to write to serial port")?;
                port_guard.flush().context("Failed to flush serial port")?;

                debug!("Sent serial command: {}", command_str.trim());

                // Read byte-by-byte until delimiter
                let mut response: Vec<u8> = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(DaqError::SerialTimeout(timeout).into());
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(0) => {
                            return Err(anyhow!("Unexpected EOF from serial port"));
                        }
                        Ok(_) => {
                            if buffer[0] == delimiter {
                                break;
                            }
                            response.push(buffer[0]);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // Port timeout is shorter than our overall timeout
                            continue;
                        }
                        Err(e) => {
                            return Err(anyhow!("Serial read error: {}", e));
                        }
                    }
                }

                let response = String::from_utf8_lossy(&response).trim().to_string();
                debug!("Received serial response: {}", response);
                Ok(response)
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = query;
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
        }
    }
}
