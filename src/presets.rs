// src/presets.rs
//
// Named driving scenarios. Each preset is a flat map of field name to physical value;
// a session applies it to every frame that carries a field of that name, so the same
// preset works for all protocols.

/// (preset name, human label, values)
type PresetTable = &'static [(&'static str, &'static str, &'static [(&'static str, f64)])];

const PRESETS: PresetTable = &[
    (
        "idle",
        "Idle Engine",
        &[
            ("rpm", 800.0),
            ("throttle", 0.0),
            ("tps", 0.0),
            ("coolant", 85.0),
            ("oil_pressure", 3.5),
            ("brake", 0.0),
            ("clutch", 0.0),
            ("ignition", 1.0),
            ("rev_limiter", 0.0),
            ("als_active", 0.0),
            ("speed", 0.0),
            ("gear", 0.0),
        ],
    ),
    (
        "cruise",
        "Cruising",
        &[
            ("rpm", 3000.0),
            ("throttle", 25.0),
            ("tps", 25.0),
            ("coolant", 90.0),
            ("oil_pressure", 4.5),
            ("brake", 0.0),
            ("clutch", 0.0),
            ("ignition", 1.0),
            ("rev_limiter", 0.0),
            ("als_active", 0.0),
            ("speed", 80.0),
            ("gear", 4.0),
        ],
    ),
    (
        "acceleration",
        "Hard Acceleration",
        &[
            ("rpm", 5500.0),
            ("throttle", 100.0),
            ("tps", 100.0),
            ("coolant", 95.0),
            ("oil_pressure", 5.0),
            ("brake", 0.0),
            ("clutch", 0.0),
            ("ignition", 1.0),
            ("rev_limiter", 0.0),
            ("als_active", 0.0),
            ("speed", 120.0),
            ("gear", 3.0),
        ],
    ),
    (
        "rev_limiter",
        "Rev Limiter",
        &[
            ("rpm", 6500.0),
            ("throttle", 100.0),
            ("tps", 100.0),
            ("coolant", 100.0),
            ("oil_pressure", 5.5),
            ("brake", 0.0),
            ("clutch", 0.0),
            ("ignition", 1.0),
            ("rev_limiter", 1.0),
            ("als_active", 0.0),
            ("speed", 150.0),
            ("gear", 4.0),
        ],
    ),
    (
        "cold_start",
        "Cold Start",
        &[
            ("rpm", 1200.0),
            ("throttle", 0.0),
            ("tps", 0.0),
            ("coolant", 20.0),
            ("oil_pressure", 4.0),
            ("brake", 0.0),
            ("clutch", 0.0),
            ("ignition", 1.0),
            ("rev_limiter", 0.0),
            ("als_active", 0.0),
            ("speed", 0.0),
            ("gear", 0.0),
        ],
    ),
    (
        "oil_warning",
        "Oil Pressure Warning",
        &[
            ("rpm", 4000.0),
            ("throttle", 50.0),
            ("tps", 50.0),
            ("coolant", 95.0),
            ("oil_pressure", 0.5),
            ("brake", 0.0),
            ("clutch", 0.0),
            ("ignition", 1.0),
            ("rev_limiter", 0.0),
            ("als_active", 0.0),
            ("speed", 100.0),
            ("gear", 3.0),
        ],
    ),
    (
        "overheat",
        "Overheat",
        &[
            ("rpm", 3500.0),
            ("throttle", 40.0),
            ("tps", 40.0),
            ("coolant", 115.0),
            ("oil_pressure", 3.0),
            ("brake", 0.0),
            ("ignition", 1.0),
            ("gear", 2.0),
        ],
    ),
];

pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|(name, _, _)| *name).collect()
}

pub fn preset_label(name: &str) -> Option<&'static str> {
    PRESETS.iter().find(|(n, _, _)| *n == name).map(|(_, label, _)| *label)
}

pub fn preset_values(name: &str) -> Option<&'static [(&'static str, f64)]> {
    PRESETS.iter().find(|(n, _, _)| *n == name).map(|(_, _, values)| *values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_presets_listed() {
        assert_eq!(
            preset_names(),
            vec!["idle", "cruise", "acceleration", "rev_limiter", "cold_start", "oil_warning", "overheat"]
        );
    }

    #[test]
    fn test_preset_lookup() {
        let values = preset_values("rev_limiter").unwrap();
        assert!(values.contains(&("rev_limiter", 1.0)));
        assert_eq!(preset_label("oil_warning"), Some("Oil Pressure Warning"));
        assert!(preset_values("launch").is_none());
    }

    #[test]
    fn test_preset_keys_are_unique() {
        for name in preset_names() {
            let values = preset_values(name).unwrap();
            let mut keys: Vec<&str> = values.iter().map(|(k, _)| *k).collect();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), values.len(), "{}", name);
        }
    }
}
