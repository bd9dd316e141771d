// src/io/codec.rs
//
// Frame codec trait shared by the wire formats.
//
// Each wire format implements it in its own module:
// - line/codec.rs  - emulator line protocol (`CAN:<id>:<dlc>:<hex>`)
// - slcan/codec.rs - slcan ASCII protocol
//
// Codecs are stateless and never block; stream splitting is the framer's job.

use crate::io::error::IoError;
use crate::io::CanFrame;

// ============================================================================
// Frame Codec Trait
// ============================================================================

/// Trait for CAN frame codecs.
///
/// The associated types define the wire-specific raw frame formats.
pub trait FrameCodec {
    /// The raw frame type for decoding (one line, terminator stripped)
    type RawFrame: ?Sized;

    /// The encoded frame type for transmission
    type EncodedFrame;

    /// Decode one raw frame. Malformed input is an `IoError::Protocol`.
    fn decode(raw: &Self::RawFrame) -> Result<CanFrame, IoError>;

    /// Encode a frame for the wire, terminator included.
    fn encode(frame: &CanFrame) -> Result<Self::EncodedFrame, IoError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{LineCodec, SlcanCodec};

    fn make_test_frame() -> CanFrame {
        CanFrame::new(0x123, vec![0x11, 0x22, 0x33, 0x44])
    }

    #[test]
    fn test_line_encode_decode() {
        let frame = make_test_frame();
        let encoded = LineCodec::encode(&frame).expect("encode failed");
        assert!(encoded.ends_with(b"\n"));
        let text = std::str::from_utf8(&encoded).unwrap();
        assert_eq!(LineCodec::decode(text.trim_end()).unwrap(), frame);
    }

    #[test]
    fn test_slcan_encode_decode() {
        let frame = make_test_frame();
        let encoded = SlcanCodec::encode(&frame).expect("encode failed");
        assert!(encoded.starts_with(b"t"));
        assert!(encoded.ends_with(b"\r"));
        let text = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        assert_eq!(SlcanCodec::decode(text).unwrap(), frame);
    }
}
