// src/protocols/mod.rs
//
// Declarative frame model and the protocol registry.
//
// The registry is built once from the built-in tables and never mutated afterwards.

pub mod field;
pub mod frame;
pub mod tables;

pub use field::{ByteWidth, Encoded, Field};
pub use frame::{FrameDefinition, IssueKind, ValidationIssue, MAX_DLC, MAX_STANDARD_ID};

use once_cell::sync::Lazy;
use serde::Serialize;

/// A named, ordered set of frame definitions. Order is the default send sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Protocol {
    pub name: String,
    pub frames: Vec<FrameDefinition>,
}

impl Protocol {
    pub fn new(name: &str, frames: Vec<FrameDefinition>) -> Self {
        Self {
            name: name.to_string(),
            frames,
        }
    }

    pub fn frame(&self, id: u32) -> Option<&FrameDefinition> {
        self.frames.iter().find(|f| f.id == id)
    }

    pub fn validate(&self) -> Vec<ValidationIssue> {
        self.frames.iter().flat_map(|f| f.validate()).collect()
    }
}

static REGISTRY: Lazy<Vec<Protocol>> = Lazy::new(tables::builtin_protocols);

/// Names of all known protocols, in registry order.
pub fn list_protocols() -> Vec<&'static str> {
    REGISTRY.iter().map(|p| p.name.as_str()).collect()
}

pub fn get_protocol(name: &str) -> Option<&'static Protocol> {
    REGISTRY.iter().find(|p| p.name == name)
}

/// Frame definitions for a protocol; empty for an unknown name.
pub fn get_frames(name: &str) -> &'static [FrameDefinition] {
    get_protocol(name).map(|p| p.frames.as_slice()).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_list_protocols_in_order() {
        assert_eq!(
            list_protocols(),
            vec![tables::CUSTOM_PROTOCOL, tables::LINK_GENERIC, tables::LINK_GENERIC_2]
        );
    }

    #[test]
    fn test_unknown_protocol_has_no_frames() {
        assert!(get_frames("Nope").is_empty());
        assert!(get_protocol("Nope").is_none());
    }

    #[test]
    fn test_frame_order_is_table_order() {
        let ids: Vec<u32> = get_frames(tables::LINK_GENERIC).iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0x5F0, 0x5F1, 0x5F2, 0x5F3, 0x5F4, 0x5F5, 0x5F6, 0x5F7]);
    }

    #[test]
    fn test_builtin_tables_have_no_encoding_overflow() {
        for name in list_protocols() {
            let issues = get_protocol(name).unwrap().validate();
            assert!(
                issues.iter().all(|i| !i.is_encoding_overflow()),
                "{}: {:?}",
                name,
                issues
            );
        }
    }

    #[test]
    fn test_only_dashboard2_ids_are_extended() {
        assert!(get_protocol(tables::CUSTOM_PROTOCOL).unwrap().validate().is_empty());
        assert!(get_protocol(tables::LINK_GENERIC).unwrap().validate().is_empty());

        let issues = get_protocol(tables::LINK_GENERIC_2).unwrap().validate();
        assert_eq!(issues.len(), 8);
        assert!(issues.iter().all(|i| i.kind == IssueKind::IdOutsideStandardRange));
    }

    #[test]
    fn test_rpm_tps_frame_bytes() {
        let frame = get_protocol(tables::LINK_GENERIC).unwrap().frame(0x5F0).unwrap();
        let values: HashMap<String, f64> =
            [("rpm".to_string(), 3000.0), ("tps".to_string(), 25.0)].into_iter().collect();
        assert_eq!(frame.build(&values), vec![0xB8, 0x0B, 0x00, 0x00, 0xFA, 0x00]);
    }
}
