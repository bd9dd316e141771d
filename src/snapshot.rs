// src/snapshot.rs
//
// Saved session configuration. The JSON shape matches the configuration files written
// by the desktop emulator:
//
// {
//   "protocol": "Link ECU Generic Dashboard",
//   "interface": "slcan", "channel": "/dev/ttyUSB0", "bitrate": 500000,
//   "sequence": [1520, 1521, ...],
//   "messages": { "1520": { "enabled": true, "interval_ms": 100, "values": { "rpm": 800 } } }
// }
//
// Connection keys are opaque here; the CLI reads the ones it understands.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Top-level keys owned by the snapshot itself; never written from the connection map
const RESERVED_KEYS: [&str; 3] = ["protocol", "sequence", "messages"];

/// Drop connection entries that would collide with the snapshot's own keys.
pub fn connection_keys(mut connection: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        if connection.remove(key).is_some() {
            vlog!("[snapshot] Ignoring reserved connection key '{}'", key);
        }
    }
    connection
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    #[serde(default, deserialize_with = "numeric_values")]
    pub values: BTreeMap<String, f64>,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    crate::transmit::DEFAULT_INTERVAL_MS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub protocol: String,
    /// Connection parameters (interface, channel, bitrate, ...), stored at top level
    #[serde(flatten)]
    pub connection: Map<String, Value>,
    #[serde(default)]
    pub sequence: Vec<u32>,
    /// Keyed by decimal frame ID
    #[serde(default, rename = "messages")]
    pub frames: BTreeMap<String, FrameSnapshot>,
}

impl SessionSnapshot {
    pub fn frame(&self, frame_id: u32) -> Option<&FrameSnapshot> {
        self.frames.get(&frame_id.to_string())
    }

    pub fn to_json(&self) -> Result<String, String> {
        let result = if RESERVED_KEYS.iter().any(|key| self.connection.contains_key(*key)) {
            let mut clean = self.clone();
            clean.connection = connection_keys(clean.connection);
            serde_json::to_string_pretty(&clean)
        } else {
            serde_json::to_string_pretty(self)
        };
        result.map_err(|e| format!("Failed to serialize snapshot: {}", e))
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Failed to parse snapshot: {}", e))
    }
}

/// Field values saved by older tools may be booleans (flag checkboxes); anything that is
/// neither a number nor a boolean is dropped.
fn numeric_values<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| {
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
                _ => None,
            }?;
            Some((name, number))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAVED: &str = r#"{
        "protocol": "Custom Protocol",
        "interface": "slcan",
        "channel": "/dev/ttyACM0",
        "bitrate": 500000,
        "sequence": [258, 256],
        "messages": {
            "258": {"enabled": true, "interval_ms": 50, "values": {"rpm": 3000}},
            "261": {"enabled": false, "interval_ms": 200, "values": {"rev_limiter": true, "als_active": 0, "note": "x"}}
        }
    }"#;

    #[test]
    fn test_parse_saved_configuration() {
        let snap = SessionSnapshot::from_json(SAVED).unwrap();
        assert_eq!(snap.protocol, "Custom Protocol");
        assert_eq!(snap.sequence, vec![258, 256]);
        assert_eq!(snap.connection["interface"], "slcan");
        assert_eq!(snap.connection["bitrate"], 500000);

        let rpm = snap.frame(0x102).unwrap();
        assert_eq!(rpm.interval_ms, 50);
        assert_eq!(rpm.values["rpm"], 3000.0);

        let flags = snap.frame(0x105).unwrap();
        assert!(!flags.enabled);
        assert_eq!(flags.values["rev_limiter"], 1.0);
        assert!(!flags.values.contains_key("note"));
    }

    #[test]
    fn test_connection_keys_stay_top_level() {
        let snap = SessionSnapshot::from_json(SAVED).unwrap();
        let json: Value = serde_json::from_str(&snap.to_json().unwrap()).unwrap();
        assert_eq!(json["channel"], "/dev/ttyACM0");
        assert!(json.get("connection").is_none());
        assert_eq!(json["messages"]["258"]["values"]["rpm"], 3000.0);
    }

    #[test]
    fn test_connection_cannot_shadow_snapshot_keys() {
        let mut snap = SessionSnapshot::from_json(SAVED).unwrap();
        snap.connection.insert("protocol".to_string(), Value::from("bogus"));
        snap.connection.insert("sequence".to_string(), Value::from(7));
        snap.connection.insert("messages".to_string(), Value::Null);

        let text = snap.to_json().unwrap();
        assert_eq!(text.matches("\"protocol\"").count(), 1);
        assert_eq!(text.matches("\"sequence\"").count(), 1);
        assert_eq!(text.matches("\"messages\"").count(), 1);

        let back = SessionSnapshot::from_json(&text).unwrap();
        assert_eq!(back.protocol, "Custom Protocol");
        assert_eq!(back.sequence, vec![258, 256]);
        assert_eq!(back.frames.len(), 2);
        assert_eq!(back.connection["channel"], "/dev/ttyACM0");

        let kept = connection_keys(snap.connection.clone());
        assert!(!kept.contains_key("protocol"));
        assert_eq!(kept["interface"], "slcan");
    }

    #[test]
    fn test_missing_sections_default() {
        let snap = SessionSnapshot::from_json(r#"{"protocol": "Custom Protocol", "messages": {"256": {}}}"#).unwrap();
        assert!(snap.sequence.is_empty());
        let frame = snap.frame(0x100).unwrap();
        assert!(frame.enabled);
        assert_eq!(frame.interval_ms, 100);
        assert!(frame.values.is_empty());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(SessionSnapshot::from_json("{").is_err());
        assert!(SessionSnapshot::from_json(r#"{"sequence": []}"#).is_err());
    }
}
