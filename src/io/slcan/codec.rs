// src/io/slcan/codec.rs
//
// slcan (Serial Line CAN) ASCII protocol codec.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf
//
// Only standard data frames are produced or accepted:
//   t<ID:3hex><DLC:1hex><DATA:2hex*DLC>\r

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::CanFrame;
use crate::protocols::{MAX_DLC, MAX_STANDARD_ID};

/// slcan (Serial Line CAN) ASCII protocol codec.
pub struct SlcanCodec;

impl FrameCodec for SlcanCodec {
    /// Raw frame is an ASCII string (without trailing \r)
    type RawFrame = str;
    /// Encoded frame is a Vec<u8> (ASCII bytes with trailing \r)
    type EncodedFrame = Vec<u8>;

    /// Decode an slcan standard data frame.
    ///
    /// Example: `t1234AABBCCDD` -> ID=0x123, DLC=4, data=AA BB CC DD
    fn decode(line: &str) -> Result<CanFrame, IoError> {
        let bytes = line.as_bytes();
        match bytes.first() {
            Some(b't') => {}
            Some(b'T') | Some(b'R') => {
                return Err(IoError::protocol("slcan", "extended frames are not supported"))
            }
            Some(b'r') => return Err(IoError::protocol("slcan", "remote frames are not supported")),
            Some(&c) => {
                return Err(IoError::protocol(
                    "slcan",
                    format!("invalid frame prefix: '{}'", c as char),
                ))
            }
            None => return Err(IoError::protocol("slcan", "empty frame")),
        }

        // prefix + 3 ID digits + DLC
        if bytes.len() < 5 {
            return Err(IoError::protocol(
                "slcan",
                format!("frame too short: {} bytes, need at least 5", bytes.len()),
            ));
        }

        let id_str = line
            .get(1..4)
            .ok_or_else(|| IoError::protocol("slcan", "invalid UTF-8 in frame ID"))?;
        let frame_id = u32::from_str_radix(id_str, 16)
            .map_err(|_| IoError::protocol("slcan", format!("invalid hex ID: {}", id_str)))?;

        let dlc_char = bytes[4] as char;
        let dlc = dlc_char.to_digit(16).ok_or_else(|| {
            IoError::protocol("slcan", format!("invalid DLC character: '{}'", dlc_char))
        })? as u8;
        if dlc > MAX_DLC {
            return Err(IoError::protocol("slcan", format!("invalid DLC: {} (max 8)", dlc)));
        }

        let expected_len = 5 + dlc as usize * 2;
        let data_str = line.get(5..expected_len).ok_or_else(|| {
            IoError::protocol(
                "slcan",
                format!("incomplete data: {} bytes, need {}", bytes.len(), expected_len),
            )
        })?;
        let data = hex::decode(data_str)
            .map_err(|e| IoError::protocol("slcan", format!("invalid data bytes: {}", e)))?;

        Ok(CanFrame::new(frame_id, data))
    }

    /// Encode a frame as an slcan standard data frame, trailing `\r` included.
    fn encode(frame: &CanFrame) -> Result<Vec<u8>, IoError> {
        if frame.frame_id > MAX_STANDARD_ID {
            return Err(IoError::protocol(
                "slcan",
                format!("ID 0x{:X} exceeds the 11-bit standard range", frame.frame_id),
            ));
        }
        if frame.data.len() > MAX_DLC as usize {
            return Err(IoError::protocol(
                "slcan",
                format!("data too long for slcan: {} bytes (max 8)", frame.data.len()),
            ));
        }

        let cmd = format!(
            "t{:03X}{:X}{}\r",
            frame.frame_id,
            frame.data.len(),
            hex::encode_upper(&frame.data)
        );
        Ok(cmd.into_bytes())
    }
}
