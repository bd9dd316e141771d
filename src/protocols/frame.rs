// src/protocols/frame.rs
//
// Frame definitions and the frame builder.
//
// Building is permissive: fields that spill past the DLC are truncated, never raised.
// `validate()` is the explicit pass that reports such authoring mistakes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::field::{Encoded, Field};

/// Largest payload of a classic CAN frame.
pub const MAX_DLC: u8 = 8;
/// Largest 11-bit standard identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// One fixed-length frame: an identifier, a DLC and the fields packed into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDefinition {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub dlc: u8,
    pub fields: Vec<Field>,
}

/// Problems found by the validation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueKind {
    DlcTooLarge { dlc: u8 },
    IdOutsideStandardRange,
    /// Scalar field whose offset + width exceeds the DLC; the tail is dropped on build
    FieldOverflow { offset: usize, width: usize, dlc: u8 },
    /// Bit field whose byte lies beyond the DLC; the flag is never sent
    FlagBeyondDlc { offset: usize, dlc: u8 },
    BitOutOfRange { bit: u8 },
    NonPositiveScale { scale: f64 },
    DuplicateFieldName,
    /// Two scalar fields share bytes; the later one in field order wins
    OverlappingFields { other: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub frame_id: u32,
    pub field: Option<String>,
    #[serde(flatten)]
    pub kind: IssueKind,
}

impl ValidationIssue {
    /// Issues that change what ends up on the wire (as opposed to advisory ones).
    pub fn is_encoding_overflow(&self) -> bool {
        matches!(
            self.kind,
            IssueKind::FieldOverflow { .. } | IssueKind::FlagBeyondDlc { .. }
        )
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.field {
            Some(field) => format!("0x{:03X}.{}", self.frame_id, field),
            None => format!("0x{:03X}", self.frame_id),
        };
        match &self.kind {
            IssueKind::DlcTooLarge { dlc } => write!(f, "{}: DLC {} exceeds {}", target, dlc, MAX_DLC),
            IssueKind::IdOutsideStandardRange => {
                write!(f, "{}: ID exceeds the 11-bit standard range", target)
            }
            IssueKind::FieldOverflow { offset, width, dlc } => write!(
                f,
                "{}: bytes {}..{} extend past DLC {}",
                target,
                offset,
                offset + width,
                dlc
            ),
            IssueKind::FlagBeyondDlc { offset, dlc } => {
                write!(f, "{}: flag byte {} is beyond DLC {}", target, offset, dlc)
            }
            IssueKind::BitOutOfRange { bit } => write!(f, "{}: bit {} is not in 0..=7", target, bit),
            IssueKind::NonPositiveScale { scale } => {
                write!(f, "{}: scale {} must be positive", target, scale)
            }
            IssueKind::DuplicateFieldName => write!(f, "{}: duplicate field name", target),
            IssueKind::OverlappingFields { other } => {
                write!(f, "{}: byte range overlaps field '{}'", target, other)
            }
        }
    }
}

impl FrameDefinition {
    pub fn new(id: u32, name: &str, description: &str, dlc: u8, fields: Vec<Field>) -> Self {
        Self {
            id,
            name: name.to_string(),
            description: description.to_string(),
            dlc,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Default physical value for every field.
    pub fn default_values(&self) -> HashMap<String, f64> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.default))
            .collect()
    }

    /// Assemble the payload for the given field values.
    ///
    /// Missing values fall back to the field default. All scalar fields are written
    /// first, then bit flags are OR'd in, so a scalar landing on a status byte never
    /// clobbers a flag. Bytes beyond the DLC are silently dropped.
    pub fn build(&self, values: &HashMap<String, f64>) -> Vec<u8> {
        let dlc = self.dlc.min(MAX_DLC) as usize;
        let mut data = vec![0u8; dlc];
        let value_of = |field: &Field| values.get(&field.name).copied().unwrap_or(field.default);

        for field in self.fields.iter().filter(|f| !f.is_bit_flag()) {
            if let Encoded::Bytes(bytes) = field.encode(value_of(field)) {
                for (i, byte) in bytes.into_iter().enumerate() {
                    if let Some(slot) = data.get_mut(field.offset + i) {
                        *slot = byte;
                    }
                }
            }
        }

        for field in self.fields.iter().filter(|f| f.is_bit_flag()) {
            if let Encoded::Bit(mask) = field.encode(value_of(field)) {
                if let Some(slot) = data.get_mut(field.offset) {
                    *slot |= mask;
                }
            }
        }

        data
    }

    /// Read every field back out of a payload. Fields beyond the payload are skipped.
    pub fn decode(&self, payload: &[u8]) -> Vec<(String, f64)> {
        self.fields
            .iter()
            .filter_map(|field| {
                let span = payload.get(field.offset..)?;
                field.decode(span).map(|v| (field.name.clone(), v))
            })
            .collect()
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let issue = |field: Option<&str>, kind: IssueKind| ValidationIssue {
            frame_id: self.id,
            field: field.map(str::to_string),
            kind,
        };

        if self.dlc > MAX_DLC {
            issues.push(issue(None, IssueKind::DlcTooLarge { dlc: self.dlc }));
        }
        if self.id > MAX_STANDARD_ID {
            issues.push(issue(None, IssueKind::IdOutsideStandardRange));
        }

        let dlc = self.dlc.min(MAX_DLC) as usize;
        let mut seen: HashMap<&str, usize> = HashMap::new();

        for (idx, field) in self.fields.iter().enumerate() {
            let name = Some(field.name.as_str());

            if seen.insert(field.name.as_str(), idx).is_some() {
                issues.push(issue(name, IssueKind::DuplicateFieldName));
            }

            match field.bit {
                Some(bit) => {
                    if bit > 7 {
                        issues.push(issue(name, IssueKind::BitOutOfRange { bit }));
                    }
                    if field.offset >= dlc {
                        issues.push(issue(
                            name,
                            IssueKind::FlagBeyondDlc {
                                offset: field.offset,
                                dlc: self.dlc,
                            },
                        ));
                    }
                }
                None => {
                    if field.offset + field.width.len() > dlc {
                        issues.push(issue(
                            name,
                            IssueKind::FieldOverflow {
                                offset: field.offset,
                                width: field.width.len(),
                                dlc: self.dlc,
                            },
                        ));
                    }
                    if !(field.scale > 0.0) {
                        issues.push(issue(name, IssueKind::NonPositiveScale { scale: field.scale }));
                    }
                    // Only earlier scalars: each overlapping pair is reported once
                    let range = field.offset..field.offset + field.width.len();
                    for other in self.fields[..idx].iter().filter(|f| !f.is_bit_flag()) {
                        let other_range = other.offset..other.offset + other.width.len();
                        if range.start < other_range.end && other_range.start < range.end {
                            issues.push(issue(
                                name,
                                IssueKind::OverlappingFields {
                                    other: other.name.clone(),
                                },
                            ));
                        }
                    }
                }
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::field::ByteWidth;

    fn voltage_and_flags() -> FrameDefinition {
        FrameDefinition::new(
            0x5F4,
            "Voltage & Flags",
            "Battery voltage and status flags",
            4,
            vec![
                Field::new("battery", "Battery Voltage", (8.0, 18.0), 14.0, "V", 0, ByteWidth::Two)
                    .scaled(100.0),
                Field::flag("rev_limiter", "Rev Limiter", false, 2, 0),
                Field::flag("launch_control", "Launch Control", false, 2, 1),
                Field::flag("flat_shift", "Flat Shift", false, 2, 2),
                Field::flag("ignition", "Ignition On", true, 2, 7),
            ],
        )
    }

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_build_uses_defaults() {
        let frame = voltage_and_flags();
        // 14.0 V * 100 = 1400 = 0x0578, ignition defaults on
        assert_eq!(frame.build(&HashMap::new()), vec![0x78, 0x05, 0x80, 0x00]);
    }

    #[test]
    fn test_build_ors_flags_sharing_a_byte() {
        let frame = voltage_and_flags();
        let data = frame.build(&values(&[("rev_limiter", 1.0), ("launch_control", 1.0), ("ignition", 0.0)]));
        assert_eq!(data[2], 0b0000_0011);
    }

    #[test]
    fn test_flags_are_applied_after_scalars() {
        // A scalar sharing the status byte must not wipe the flag
        let frame = FrameDefinition::new(
            0x100,
            "Mixed",
            "",
            2,
            vec![
                Field::flag("flag", "", false, 0, 3),
                Field::new("level", "", (0.0, 255.0), 0.0, "", 0, ByteWidth::One),
            ],
        );
        let data = frame.build(&values(&[("flag", 1.0), ("level", 0x41 as f64)]));
        assert_eq!(data, vec![0x41 | 0x08, 0x00]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let frame = voltage_and_flags();
        let vals = values(&[("battery", 12.34), ("flat_shift", 1.0)]);
        assert_eq!(frame.build(&vals), frame.build(&vals));
    }

    #[test]
    fn test_build_truncates_past_dlc() {
        let frame = FrameDefinition::new(
            0x102,
            "RPM",
            "",
            2,
            vec![
                Field::new("rpm", "", (0.0, 15000.0), 0.0, "rpm", 0, ByteWidth::Four),
                Field::new("late", "", (0.0, 255.0), 0.0, "", 5, ByteWidth::One),
                Field::flag("lost_flag", "", false, 3, 0),
            ],
        );
        let data = frame.build(&values(&[("rpm", 0x0102_0304 as f64), ("late", 9.0), ("lost_flag", 1.0)]));
        assert_eq!(data, vec![0x04, 0x03]);

        let issues = frame.validate();
        assert!(issues.iter().any(|i| i.field.as_deref() == Some("rpm") && i.is_encoding_overflow()));
        assert!(issues.iter().any(|i| i.field.as_deref() == Some("late") && i.is_encoding_overflow()));
        assert!(issues.iter().any(|i| i.field.as_deref() == Some("lost_flag") && i.is_encoding_overflow()));
    }

    #[test]
    fn test_zero_dlc_builds_empty_payload() {
        let frame = FrameDefinition::new(0x7FF, "Empty", "", 0, vec![]);
        assert!(frame.build(&HashMap::new()).is_empty());
        assert!(frame.validate().is_empty());
    }

    #[test]
    fn test_overlapping_scalars_last_write_wins() {
        let frame = FrameDefinition::new(
            0x200,
            "Overlap",
            "",
            2,
            vec![
                Field::new("wide", "", (0.0, 65535.0), 0.0, "", 0, ByteWidth::Two),
                Field::new("narrow", "", (0.0, 255.0), 0.0, "", 1, ByteWidth::One),
            ],
        );
        let data = frame.build(&values(&[("wide", 0xAABB as f64), ("narrow", 0x11 as f64)]));
        assert_eq!(data, vec![0xBB, 0x11]);

        let issues = frame.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(
            issues[0].kind,
            IssueKind::OverlappingFields {
                other: "wide".to_string()
            }
        );
    }

    #[test]
    fn test_validate_reports_bad_definitions() {
        let frame = FrameDefinition::new(
            0x2000,
            "Bad",
            "",
            9,
            vec![
                Field::flag("flag", "", false, 0, 9),
                Field::flag("flag", "", false, 0, 1),
                Field::new("zero_scale", "", (0.0, 1.0), 0.0, "", 1, ByteWidth::One).scaled(0.0),
            ],
        );
        let kinds: Vec<IssueKind> = frame.validate().into_iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&IssueKind::DlcTooLarge { dlc: 9 }));
        assert!(kinds.contains(&IssueKind::IdOutsideStandardRange));
        assert!(kinds.contains(&IssueKind::BitOutOfRange { bit: 9 }));
        assert!(kinds.contains(&IssueKind::DuplicateFieldName));
        assert!(kinds.contains(&IssueKind::NonPositiveScale { scale: 0.0 }));
    }

    #[test]
    fn test_out_of_range_bit_does_not_touch_other_flags() {
        let frame = FrameDefinition::new(
            0x105,
            "Flags",
            "",
            1,
            vec![
                Field::flag("als_active", "", false, 0, 1),
                Field::flag("broken", "", false, 0, 9),
            ],
        );
        let values: HashMap<String, f64> = [("broken".to_string(), 1.0)].into_iter().collect();
        assert_eq!(frame.build(&values), vec![0x00]);
        assert_eq!(frame.decode(&[0xFF]), vec![("als_active".to_string(), 1.0)]);
    }

    #[test]
    fn test_decode_payload() {
        let frame = voltage_and_flags();
        let decoded = frame.decode(&[0x78, 0x05, 0x81, 0x00]);
        let lookup: HashMap<String, f64> = decoded.into_iter().collect();
        assert_eq!(lookup["battery"], 14.0);
        assert_eq!(lookup["rev_limiter"], 1.0);
        assert_eq!(lookup["launch_control"], 0.0);
        assert_eq!(lookup["ignition"], 1.0);
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue {
            frame_id: 0x102,
            field: Some("rpm".to_string()),
            kind: IssueKind::FieldOverflow {
                offset: 0,
                width: 4,
                dlc: 2,
            },
        };
        assert_eq!(issue.to_string(), "0x102.rpm: bytes 0..4 extend past DLC 2");
    }
}
