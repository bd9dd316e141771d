// src/settings.rs
//
// Persistent application settings, stored as TOML in the user config directory.
// Command-line arguments override whatever is loaded here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::io::serial::{Parity, SerialConfig};
use crate::io::slcan::DEFAULT_BITRATE;
use crate::io::WireFormat;
use crate::protocols::tables::LINK_GENERIC;
use crate::transmit::DEFAULT_INTERVAL_MS;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    /// Serial port path; empty means "not configured"
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub wire: WireFormat,
    #[serde(default = "default_slcan_bitrate")]
    pub slcan_bitrate: u32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    #[serde(default = "default_tick_quantum_ms")]
    pub tick_quantum_ms: u64,
    /// Directory for log files; unset disables file logging
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_slcan_bitrate() -> u32 {
    DEFAULT_BITRATE
}

fn default_protocol() -> String {
    LINK_GENERIC.to_string()
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_tick_quantum_ms() -> u64 {
    1
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            wire: WireFormat::Emulator,
            slcan_bitrate: default_slcan_bitrate(),
            protocol: default_protocol(),
            default_interval_ms: default_interval_ms(),
            tick_quantum_ms: default_tick_quantum_ms(),
            log_dir: None,
        }
    }
}

impl AppSettings {
    pub fn serial_config(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }
}

/// `<config dir>/ledbus/settings.toml`
pub fn default_settings_path() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join("ledbus").join("settings.toml"))
        .ok_or_else(|| "Failed to get config dir".to_string())
}

/// Load settings from `path`. A missing file yields defaults; nothing is written.
pub fn load_settings(path: &Path) -> Result<AppSettings, String> {
    if !path.exists() {
        vlog!("[settings] {} not found, using defaults", path.display());
        return Ok(AppSettings::default());
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read settings: {}", e))?;

    toml::from_str(&content).map_err(|e| format!("Failed to parse settings: {}", e))
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config dir: {}", e))?;
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
    tlog!("[settings] Saved {}", path.display());
    Ok(())
}
