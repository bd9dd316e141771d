// src/io/line/color.rs
//
// Inbound lines from the LED controller.
//
// The firmware mirrors its strip as `LED:<count>:<hex>` where hex holds one RRGGBB group
// per LED. Anything else it prints (boot banner, debug output) is passed through as an
// opaque diagnostic line.

use serde::Serialize;

use super::codec::{LineCodec, COMMAND_PREFIX};
use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::slcan::SlcanCodec;
use crate::io::CanFrame;

const PROTOCOL: &str = "led";
pub const COLOR_PREFIX: &str = "LED:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<(u8, u8, u8)> for Rgb {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Rgb { r, g, b }
    }
}

/// One decoded strip snapshot. `colors[i]` is strip position `i`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColorFrame {
    /// Count announced by the firmware; not enforced against `colors.len()`
    pub declared_count: usize,
    pub colors: Vec<Rgb>,
}

/// Classified inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    Colors(ColorFrame),
    /// A frame seen on the wire: a `CAN:` echo from the controller or an slcan `t` frame
    /// reported by a USB-CAN adapter
    Frame(CanFrame),
    Diagnostic(String),
}

/// Parse a colour-stream line.
///
/// Returns `Ok(None)` when the line has fewer than three `:`-separated parts. A trailing
/// partial RRGGBB group is dropped. A bad hex digit or count fails the whole line.
pub fn parse_color_line(line: &str) -> Result<Option<ColorFrame>, IoError> {
    let parts: Vec<&str> = line.trim().splitn(3, ':').collect();
    if parts.len() < 3 {
        return Ok(None);
    }

    let declared_count: usize = parts[1]
        .trim()
        .parse()
        .map_err(|_| IoError::protocol(PROTOCOL, format!("invalid LED count: {:?}", parts[1])))?;

    let hex_data = parts[2].trim().as_bytes();
    let whole = hex_data.len() / 6 * 6;
    let raw = hex::decode(&hex_data[..whole])
        .map_err(|e| IoError::protocol(PROTOCOL, format!("invalid colour data: {}", e)))?;

    let colors = raw
        .chunks_exact(3)
        .map(|c| Rgb::from((c[0], c[1], c[2])))
        .collect();

    Ok(Some(ColorFrame {
        declared_count,
        colors,
    }))
}

/// Classify one received line (terminator already stripped).
///
/// Lines that look like frames but fail to decode are kept as diagnostics.
pub fn parse_line(line: &str) -> Result<InboundLine, IoError> {
    if line.starts_with(COLOR_PREFIX) {
        return match parse_color_line(line)? {
            Some(frame) => Ok(InboundLine::Colors(frame)),
            None => Err(IoError::protocol(PROTOCOL, format!("truncated colour line: {:?}", line))),
        };
    }

    let frame = if line.starts_with(COMMAND_PREFIX) {
        LineCodec::decode(line).ok()
    } else if line.starts_with('t') {
        SlcanCodec::decode(line).ok()
    } else {
        None
    };

    Ok(match frame {
        Some(frame) => InboundLine::Frame(frame),
        None => InboundLine::Diagnostic(line.to_string()),
    })
}
