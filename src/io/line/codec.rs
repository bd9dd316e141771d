// src/io/line/codec.rs
//
// Emulator line protocol codec.
//
// Frame format (one command per line, `\n` terminated):
//   CAN:<ID:3+hex upper>:<DLC decimal>:<DATA:2hex*DLC upper>
//
// Example: CAN:5F0:8:2003000000000000

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::CanFrame;
use crate::protocols::MAX_DLC;

const PROTOCOL: &str = "line";
pub const COMMAND_PREFIX: &str = "CAN:";

/// Format one outbound command line, terminator included.
pub fn format_command(frame_id: u32, dlc: u8, data: &[u8]) -> String {
    format!("CAN:{:03X}:{}:{}\n", frame_id, dlc, hex::encode_upper(data))
}

/// Emulator line protocol codec.
pub struct LineCodec;

impl FrameCodec for LineCodec {
    /// One line without its terminator
    type RawFrame = str;
    /// ASCII bytes with trailing `\n`
    type EncodedFrame = Vec<u8>;

    /// Decode a `CAN:` command line.
    ///
    /// Examples:
    ///   `CAN:102:2:2003` -> ID=0x102, data=20 03
    ///   `CAN:7FF:0:`     -> ID=0x7FF, no data
    fn decode(line: &str) -> Result<CanFrame, IoError> {
        let body = line
            .trim()
            .strip_prefix(COMMAND_PREFIX)
            .ok_or_else(|| IoError::protocol(PROTOCOL, format!("not a CAN command: {:?}", line)))?;

        let mut parts = body.splitn(3, ':');
        let (id_str, dlc_str, data_str) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(dlc), Some(data)) => (id, dlc, data),
            _ => return Err(IoError::protocol(PROTOCOL, "expected CAN:<id>:<dlc>:<data>")),
        };

        let frame_id = u32::from_str_radix(id_str, 16)
            .map_err(|_| IoError::protocol(PROTOCOL, format!("invalid hex ID: {}", id_str)))?;

        let dlc: u8 = dlc_str
            .parse()
            .map_err(|_| IoError::protocol(PROTOCOL, format!("invalid DLC: {}", dlc_str)))?;
        if dlc > MAX_DLC {
            return Err(IoError::protocol(PROTOCOL, format!("invalid DLC: {} (max 8)", dlc)));
        }

        let data = hex::decode(data_str)
            .map_err(|e| IoError::protocol(PROTOCOL, format!("invalid data {:?}: {}", data_str, e)))?;
        if data.len() != dlc as usize {
            return Err(IoError::protocol(
                PROTOCOL,
                format!("DLC {} does not match {} data bytes", dlc, data.len()),
            ));
        }

        Ok(CanFrame::new(frame_id, data))
    }

    fn encode(frame: &CanFrame) -> Result<Vec<u8>, IoError> {
        if frame.data.len() > MAX_DLC as usize {
            return Err(IoError::protocol(
                PROTOCOL,
                format!("data too long: {} bytes (max 8)", frame.data.len()),
            ));
        }
        Ok(format_command(frame.frame_id, frame.dlc(), &frame.data).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_command() {
        assert_eq!(
            format_command(0x5F0, 8, &[0x20, 0x03, 0, 0, 0, 0, 0, 0]),
            "CAN:5F0:8:2003000000000000\n"
        );
    }

    #[test]
    fn test_format_pads_short_ids() {
        assert_eq!(format_command(0x5, 1, &[0xAB]), "CAN:005:1:AB\n");
    }

    #[test]
    fn test_format_keeps_wide_ids() {
        assert_eq!(format_command(0x2000, 2, &[0x01, 0x02]), "CAN:2000:2:0102\n");
    }

    #[test]
    fn test_format_empty_payload() {
        assert_eq!(format_command(0x7FF, 0, &[]), "CAN:7FF:0:\n");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let frame = CanFrame::new(0x100, vec![0; 9]);
        assert!(matches!(LineCodec::encode(&frame), Err(IoError::Protocol { .. })));
    }

    #[test]
    fn test_decode_command() {
        let frame = LineCodec::decode("CAN:5F0:2:2003\r").unwrap();
        assert_eq!(frame, CanFrame::new(0x5F0, vec![0x20, 0x03]));

        let frame = LineCodec::decode("CAN:7FF:0:").unwrap();
        assert!(frame.data.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(LineCodec::decode("LED:1:FFFFFF").is_err());
        assert!(LineCodec::decode("CAN:5F0:2").is_err());
        assert!(LineCodec::decode("CAN:XYZ:1:00").is_err());
        assert!(LineCodec::decode("CAN:100:9:000000000000000000").is_err());
        assert!(LineCodec::decode("CAN:100:2:00").is_err());
        assert!(LineCodec::decode("CAN:100:1:G0").is_err());
    }
}
