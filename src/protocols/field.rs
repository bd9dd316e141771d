// src/protocols/field.rs
//
// Field codec: one named physical quantity packed into a byte span.
//
// Scalar fields are scaled, rounded, clamped to the storage range of their width and
// signedness, and written little-endian. Bit fields occupy one bit of the byte at their
// offset and are set when the physical value is non-zero.
//
// The codec never rejects a value for being outside the field's [min, max] range; it only
// enforces the storage range. The wire format, not the UI, is authoritative.

use serde::{Deserialize, Serialize};

/// Storage width of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteWidth {
    One,
    Two,
    Four,
}

impl ByteWidth {
    pub fn len(self) -> usize {
        match self {
            ByteWidth::One => 1,
            ByteWidth::Two => 2,
            ByteWidth::Four => 4,
        }
    }

    /// Inclusive storage range for this width.
    pub fn storage_range(self, signed: bool) -> (i64, i64) {
        match (self, signed) {
            (ByteWidth::One, false) => (0, u8::MAX as i64),
            (ByteWidth::One, true) => (i8::MIN as i64, i8::MAX as i64),
            (ByteWidth::Two, false) => (0, u16::MAX as i64),
            (ByteWidth::Two, true) => (i16::MIN as i64, i16::MAX as i64),
            (ByteWidth::Four, false) => (0, u32::MAX as i64),
            (ByteWidth::Four, true) => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// A named physical quantity within one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub description: String,
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub unit: String,
    /// Byte offset within the frame (0-based)
    pub offset: usize,
    pub width: ByteWidth,
    /// Physical value x scale = stored integer
    pub scale: f64,
    pub signed: bool,
    /// When set, the field is a boolean flag at this bit of the byte at `offset`
    pub bit: Option<u8>,
}

/// Result of encoding one field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Little-endian storage bytes, exactly `width.len()` long
    Bytes(Vec<u8>),
    /// Mask to OR into the byte at the field's offset; `0` when the flag is clear
    Bit(u8),
}

impl Field {
    /// Unsigned scalar field with scale 1.
    pub fn new(
        name: &str,
        description: &str,
        range: (f64, f64),
        default: f64,
        unit: &str,
        offset: usize,
        width: ByteWidth,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            min: range.0,
            max: range.1,
            default,
            unit: unit.to_string(),
            offset,
            width,
            scale: 1.0,
            signed: false,
            bit: None,
        }
    }

    /// Boolean flag at `bit` of the byte at `offset`.
    pub fn flag(name: &str, description: &str, default: bool, offset: usize, bit: u8) -> Self {
        let mut field = Field::new(
            name,
            description,
            (0.0, 1.0),
            if default { 1.0 } else { 0.0 },
            "",
            offset,
            ByteWidth::One,
        );
        field.bit = Some(bit);
        field
    }

    pub fn scaled(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub fn is_bit_flag(&self) -> bool {
        self.bit.is_some()
    }

    /// Number of bytes this field touches in the frame.
    pub fn span(&self) -> usize {
        if self.is_bit_flag() {
            1
        } else {
            self.width.len()
        }
    }

    /// Scale, round and clamp a physical value to the stored integer.
    pub fn to_raw(&self, value: f64) -> i64 {
        let (lo, hi) = self.width.storage_range(self.signed);
        let scaled = (value * self.scale).round();
        if scaled.is_nan() {
            return 0i64.clamp(lo, hi);
        }
        // f64 -> i64 casts saturate, so the clamp below always sees a finite value
        (scaled as i64).clamp(lo, hi)
    }

    /// The physical value that survives a round trip through storage.
    pub fn clamp_physical(&self, value: f64) -> f64 {
        self.to_raw(value) as f64 / self.scale
    }

    pub fn encode(&self, value: f64) -> Encoded {
        if let Some(bit) = self.bit {
            // An out-of-range bit contributes nothing rather than landing on another flag
            let mask = 1u8.checked_shl(bit as u32).filter(|_| bit <= 7).unwrap_or(0);
            return Encoded::Bit(if value != 0.0 { mask } else { 0 });
        }

        let raw = self.to_raw(value);
        let bytes = match (self.width, self.signed) {
            (ByteWidth::One, false) => (raw as u8).to_le_bytes().to_vec(),
            (ByteWidth::One, true) => (raw as i8).to_le_bytes().to_vec(),
            (ByteWidth::Two, false) => (raw as u16).to_le_bytes().to_vec(),
            (ByteWidth::Two, true) => (raw as i16).to_le_bytes().to_vec(),
            (ByteWidth::Four, false) => (raw as u32).to_le_bytes().to_vec(),
            (ByteWidth::Four, true) => (raw as i32).to_le_bytes().to_vec(),
        };
        Encoded::Bytes(bytes)
    }

    /// Decode the field from its byte span.
    ///
    /// For scalar fields `bytes` must hold at least `width` bytes; for bit fields it is
    /// the status byte. Returns `None` when the span is too short.
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        if let Some(bit) = self.bit {
            if bit > 7 {
                return None;
            }
            let byte = *bytes.first()?;
            return Some(if byte & (1u8 << bit) != 0 { 1.0 } else { 0.0 });
        }

        let span = bytes.get(..self.width.len())?;
        let raw: i64 = match (self.width, self.signed) {
            (ByteWidth::One, false) => span[0] as i64,
            (ByteWidth::One, true) => span[0] as i8 as i64,
            (ByteWidth::Two, false) => u16::from_le_bytes([span[0], span[1]]) as i64,
            (ByteWidth::Two, true) => i16::from_le_bytes([span[0], span[1]]) as i64,
            (ByteWidth::Four, false) => {
                u32::from_le_bytes([span[0], span[1], span[2], span[3]]) as i64
            }
            (ByteWidth::Four, true) => {
                i32::from_le_bytes([span[0], span[1], span[2], span[3]]) as i64
            }
        };
        Some(raw as f64 / self.scale)
    }
}
