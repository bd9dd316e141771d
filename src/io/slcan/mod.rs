// src/io/slcan/mod.rs
//
// slcan (Serial Line CAN) support for CANable, CANable Pro, and other USB-CAN adapters
// using the Lawicel/slcan ASCII protocol.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf

pub mod codec;

pub use codec::SlcanCodec;

use std::time::Duration;

use crate::io::error::IoError;
use crate::io::Transport;

// ============================================================================
// Constants
// ============================================================================

/// slcan bitrate commands (S0-S8)
const SLCAN_BITRATES: [(u32, &str); 9] = [
    (10_000, "S0"),    // 10 Kbit/s
    (20_000, "S1"),    // 20 Kbit/s
    (50_000, "S2"),    // 50 Kbit/s
    (100_000, "S3"),   // 100 Kbit/s
    (125_000, "S4"),   // 125 Kbit/s
    (250_000, "S5"),   // 250 Kbit/s
    (500_000, "S6"),   // 500 Kbit/s
    (750_000, "S7"),   // 750 Kbit/s
    (1_000_000, "S8"), // 1 Mbit/s
];

pub const DEFAULT_BITRATE: u32 = 500_000;

/// Settle time between init commands; adapters drop bytes sent back-to-back
pub const COMMAND_GAP: Duration = Duration::from_millis(50);

// ============================================================================
// Channel control
// ============================================================================

/// Find the slcan bitrate command for a given bitrate
pub fn find_bitrate_command(bitrate: u32) -> Result<&'static str, IoError> {
    SLCAN_BITRATES
        .iter()
        .find(|(rate, _)| *rate == bitrate)
        .map(|(_, cmd)| *cmd)
        .ok_or_else(|| {
            let valid: Vec<String> = SLCAN_BITRATES.iter().map(|(r, _)| format!("{}", r)).collect();
            IoError::configuration(format!(
                "Invalid CAN bitrate {}. Valid bitrates: {}",
                bitrate,
                valid.join(", ")
            ))
        })
}

/// Commands that open a channel at `bitrate`: close any open channel, set bitrate, open.
pub fn open_commands(bitrate: u32) -> Result<Vec<Vec<u8>>, IoError> {
    let bitrate_cmd = find_bitrate_command(bitrate)?;
    Ok(vec![
        b"C\r".to_vec(),
        format!("{}\r", bitrate_cmd).into_bytes(),
        b"O\r".to_vec(),
    ])
}

/// Put the adapter on the bus. The leading close is best effort since no channel may be open.
pub fn open_channel(transport: &mut dyn Transport, bitrate: u32, gap: Duration) -> Result<(), IoError> {
    let commands = open_commands(bitrate)?;
    for (i, cmd) in commands.iter().enumerate() {
        match transport.write(cmd) {
            Ok(()) => {}
            Err(e) if i == 0 && !e.is_permanent() => {
                tlog!("[slcan] Ignoring close before open on {}: {}", transport.name(), e);
            }
            Err(e) => return Err(e),
        }
        if !gap.is_zero() {
            std::thread::sleep(gap);
        }
    }
    tlog!("[slcan] Channel open on {} (bitrate: {})", transport.name(), bitrate);
    Ok(())
}

/// Take the adapter off the bus.
pub fn close_channel(transport: &mut dyn Transport) -> Result<(), IoError> {
    transport.write(b"C\r")
}

/// Wraps a transport whose channel is open; closing it takes the adapter off the bus
/// before releasing the port.
pub struct SlcanChannel<T: Transport> {
    inner: T,
}

impl<T: Transport> SlcanChannel<T> {
    pub fn open(mut inner: T, bitrate: u32, gap: Duration) -> Result<Self, IoError> {
        open_channel(&mut inner, bitrate, gap)?;
        Ok(Self { inner })
    }
}

impl<T: Transport> Transport for SlcanChannel<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        self.inner.write(bytes)
    }

    fn close(&mut self) {
        if let Err(e) = close_channel(&mut self.inner) {
            tlog!("[slcan] Close command failed on {}: {}", self.inner.name(), e);
        }
        self.inner.close();
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
