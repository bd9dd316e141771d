// src/io/error.rs
//
// Error type shared by transports and line codecs.

use thiserror::Error;

/// Errors raised by transports (open/write/read) and by the wire codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoError {
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },

    #[error("{device}: {operation} timed out")]
    Timeout { device: String, operation: String },

    #[error("{device}: disconnected")]
    Disconnected { device: String },

    #[error("{protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, operation: &str) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn disconnected(device: &str) -> Self {
        IoError::Disconnected {
            device: device.to_string(),
        }
    }

    pub fn protocol(protocol: &str, message: impl Into<String>) -> Self {
        IoError::Protocol {
            protocol: protocol.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        IoError::Configuration(message.into())
    }

    /// Device gone or port unusable, as opposed to a single bad frame.
    pub fn is_permanent(&self) -> bool {
        matches!(self, IoError::Disconnected { .. } | IoError::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = IoError::protocol("line", "invalid hex digit");
        assert_eq!(e.to_string(), "line: invalid hex digit");

        let e = IoError::write("serial(/dev/ttyUSB0)", "broken pipe");
        assert_eq!(e.to_string(), "serial(/dev/ttyUSB0): write failed: broken pipe");
    }

    #[test]
    fn test_permanent_errors() {
        assert!(IoError::disconnected("serial").is_permanent());
        assert!(IoError::connection("serial", "no such device").is_permanent());
        assert!(!IoError::protocol("slcan", "id too large").is_permanent());
        assert!(!IoError::timeout("serial", "write").is_permanent());
    }
}
