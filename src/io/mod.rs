// src/io/mod.rs
//
// Transport abstraction and wire codecs.
//
// Frames leave the core as `CanFrame` values and are turned into bytes by one of the
// wire formats (the emulator line protocol or slcan). A `Transport` only moves bytes;
// it never interprets them.

pub mod codec; // Frame codec trait
mod error;
pub mod line; // Emulator line protocol + LED colour stream
pub mod serial;
pub mod slcan;

pub use codec::FrameCodec;
pub use error::IoError;
pub use line::{parse_line, ColorFrame, InboundLine, LineCodec, Rgb};
pub use slcan::SlcanCodec;

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};

// ============================================================================
// Frames
// ============================================================================

/// One classic CAN data frame ready for a wire codec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// Frame identifier as defined by the protocol table
    pub frame_id: u32,
    /// Payload, 0-8 bytes; its length is the DLC
    pub data: Vec<u8>,
}

impl CanFrame {
    pub fn new(frame_id: u32, data: Vec<u8>) -> Self {
        Self { frame_id, data }
    }

    pub fn dlc(&self) -> u8 {
        self.data.len().min(u8::MAX as usize) as u8
    }
}

/// Outbound wire encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `CAN:<id>:<dlc>:<hex>\n`, understood by the LED controller's serial emulator input
    #[default]
    Emulator,
    /// Lawicel/slcan `t<id><dlc><hex>\r` for USB-CAN adapters
    Slcan,
}

impl WireFormat {
    pub fn encode(self, frame: &CanFrame) -> Result<Vec<u8>, IoError> {
        match self {
            WireFormat::Emulator => LineCodec::encode(frame),
            WireFormat::Slcan => SlcanCodec::encode(frame),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WireFormat::Emulator => "emulator",
            WireFormat::Slcan => "slcan",
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "emulator" | "line" => Ok(WireFormat::Emulator),
            "slcan" => Ok(WireFormat::Slcan),
            other => Err(format!("Unknown wire format '{}' (expected emulator or slcan)", other)),
        }
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Byte sink owned by a session. Implementations must write each buffer whole or fail.
pub trait Transport: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<(), IoError>;

    /// Release the underlying handle. Writes after close fail with `Disconnected`.
    fn close(&mut self) {}

    /// Human-readable device name for log lines
    fn name(&self) -> &str;
}

/// The single-writer handle shared by the scheduler and one-shot sends.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub fn shared(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Writes every buffer to stdout. Used for `--dry-run`.
pub struct StdoutTransport {
    closed: bool,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self { closed: false }
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for StdoutTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        if self.closed {
            return Err(IoError::disconnected("stdout"));
        }
        let mut out = std::io::stdout().lock();
        // slcan lines end in \r only; keep the terminal readable
        let text = String::from_utf8_lossy(bytes).replace('\r', "\n");
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| IoError::write("stdout", e.to_string()))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn name(&self) -> &str {
        "stdout"
    }
}

// ============================================================================
// Test transports
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::time::Instant;

    /// Records every write with the instant it happened.
    #[derive(Clone, Default)]
    pub struct RecordingTransport {
        pub writes: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
        pub closed: Arc<Mutex<bool>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn lines(&self) -> Vec<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|(_, b)| String::from_utf8_lossy(b).to_string())
                .collect()
        }

        pub fn count(&self) -> usize {
            self.writes.lock().unwrap().len()
        }

        pub fn is_closed(&self) -> bool {
            *self.closed.lock().unwrap()
        }
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
            if self.is_closed() {
                return Err(IoError::disconnected("recording"));
            }
            self.writes.lock().unwrap().push((Instant::now(), bytes.to_vec()));
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Fails every write whose bytes contain `needle`, records the rest.
    pub struct FailingTransport {
        pub needle: Vec<u8>,
        pub inner: RecordingTransport,
    }

    impl Transport for FailingTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
            if bytes.windows(self.needle.len()).any(|w| w == self.needle.as_slice()) {
                return Err(IoError::write("failing", "injected failure"));
            }
            self.inner.write(bytes)
        }

        fn name(&self) -> &str {
            "failing"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_selects_codec() {
        let frame = CanFrame::new(0x102, vec![0x20, 0x03]);
        assert_eq!(WireFormat::Emulator.encode(&frame).unwrap(), b"CAN:102:2:2003\n");
        assert_eq!(WireFormat::Slcan.encode(&frame).unwrap(), b"t10222003\r");
    }

    #[test]
    fn test_wire_format_from_str() {
        assert_eq!("slcan".parse::<WireFormat>().unwrap(), WireFormat::Slcan);
        assert_eq!("Emulator".parse::<WireFormat>().unwrap(), WireFormat::Emulator);
        assert!("gvret".parse::<WireFormat>().is_err());
    }

    #[test]
    fn test_recording_transport_rejects_after_close() {
        let mut t = testing::RecordingTransport::new();
        t.write(b"a").unwrap();
        t.close();
        assert!(matches!(t.write(b"b"), Err(IoError::Disconnected { .. })));
        assert_eq!(t.count(), 1);
    }
}
