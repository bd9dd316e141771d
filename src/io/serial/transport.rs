// src/io/serial/transport.rs
//
// Serial port transport. Owns the port handle; the inbound reader works on a clone.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

use super::utils::{self, Parity};
use crate::io::error::IoError;
use crate::io::Transport;

/// Serial port configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
}

fn default_data_bits() -> u8 { 8 }
fn default_stop_bits() -> u8 { 1 }

impl SerialConfig {
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
        }
    }

    /// e.g. `/dev/ttyUSB0 @ 115200 (8N1)`
    pub fn summary(&self) -> String {
        format!(
            "{} @ {} ({}{}{})",
            self.port,
            self.baud_rate,
            self.data_bits,
            self.parity.letter(),
            self.stop_bits
        )
    }
}

/// Read timeout; short so the reader notices cancellation promptly
const PORT_TIMEOUT: Duration = Duration::from_millis(50);

pub struct SerialTransport {
    device: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, IoError> {
        let device = format!("serial({})", config.port);

        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(utils::to_serialport_data_bits(config.data_bits))
            .stop_bits(utils::to_serialport_stop_bits(config.stop_bits))
            .parity(utils::to_serialport_parity(config.parity))
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(&device, e.to_string()))?;

        tlog!("[serial] Opened {}", config.summary());

        Ok(Self {
            device,
            port: Some(port),
        })
    }

    /// Second handle on the same port for the inbound reader.
    pub fn try_clone_port(&self) -> Result<Box<dyn serialport::SerialPort>, IoError> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| IoError::disconnected(&self.device))?;
        port.try_clone()
            .map_err(|e| IoError::connection(&self.device, format!("clone port: {}", e)))
    }
}

fn classify_write_error(device: &str, e: std::io::Error) -> IoError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof => {
            IoError::disconnected(device)
        }
        ErrorKind::TimedOut => IoError::timeout(device, "write"),
        _ => IoError::write(device, e.to_string()),
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| IoError::disconnected(&self.device))?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| classify_write_error(&self.device, e))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tlog!("[serial] Closed {}", self.device);
        }
    }

    fn name(&self) -> &str {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_summary() {
        let mut config = SerialConfig::new("/dev/ttyUSB0", 115_200);
        assert_eq!(config.summary(), "/dev/ttyUSB0 @ 115200 (8N1)");
        config.parity = Parity::Even;
        config.stop_bits = 2;
        assert_eq!(config.summary(), "/dev/ttyUSB0 @ 115200 (8E2)");
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: SerialConfig =
            serde_json::from_str(r#"{"port":"COM3","baud_rate":115200}"#).unwrap();
        assert_eq!(config, SerialConfig::new("COM3", 115_200));
    }

    #[test]
    fn test_open_missing_port_is_connection_error() {
        let config = SerialConfig::new("/dev/ledbus-does-not-exist", 115_200);
        let err = SerialTransport::open(&config).err().unwrap();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_write_error_classification() {
        let e = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(classify_write_error("s", e), IoError::Disconnected { .. }));
        let e = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(classify_write_error("s", e), IoError::Timeout { .. }));
        let e = std::io::Error::new(std::io::ErrorKind::Other, "odd");
        assert!(matches!(classify_write_error("s", e), IoError::Write { .. }));
    }
}
