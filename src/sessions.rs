// src/sessions.rs
//
// Emulator session: runtime frame state for the loaded protocol, the connected
// transport and the cyclic transmitter.
//
// All configuration changes go through `Session` setters. The frame table sits behind
// a mutex the transmit loop reads every tick, so edits apply on the next tick without
// stopping transmission. Invalid input is rejected with a `ConfigError` and the previous
// value is kept.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use crate::io::line::format_command;
use crate::io::{self, CanFrame, SharedTransport, Transport, WireFormat};
use crate::presets;
use crate::protocols::{self, FrameDefinition};
use crate::snapshot::{connection_keys, FrameSnapshot, SessionSnapshot};
use crate::transmit::{
    CyclicTransmitter, TickReport, TransmitStats, DEFAULT_INTERVAL_MS, DEFAULT_TICK_QUANTUM,
    MAX_INTERVAL_MS, MIN_INTERVAL_MS,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid frame ID '{0}' (expected hex, e.g. 5F0 or 0x5F0)")]
    InvalidFrameId(String),

    #[error("unknown frame 0x{0:03X}")]
    UnknownFrame(u32),

    #[error("frame 0x{frame_id:03X} has no field '{field}'")]
    UnknownField { frame_id: u32, field: String },

    #[error("no frame in this protocol has a field '{0}'")]
    UnknownFieldName(String),

    #[error("interval {0} ms is outside {min}..={max} ms", min = MIN_INTERVAL_MS, max = MAX_INTERVAL_MS)]
    IntervalOutOfRange(u64),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("not connected")]
    NotConnected,
}

/// Parse a frame ID typed by the user: `5F0`, `0x5F0` or `0X5f0`.
pub fn parse_frame_id(text: &str) -> Result<u32, ConfigError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(ConfigError::InvalidFrameId(text.to_string()));
    }
    u32::from_str_radix(digits, 16).map_err(|_| ConfigError::InvalidFrameId(text.to_string()))
}

/// Parse an interval in milliseconds and check it against the allowed range.
pub fn parse_interval(text: &str) -> Result<u64, ConfigError> {
    let ms: u64 = text
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber(text.to_string()))?;
    check_interval(ms)
}

fn check_interval(ms: u64) -> Result<u64, ConfigError> {
    if (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&ms) {
        Ok(ms)
    } else {
        Err(ConfigError::IntervalOutOfRange(ms))
    }
}

/// Parse a field value. Accepts numbers and, for flags, `true`/`false`/`on`/`off`.
pub fn parse_value(text: &str) -> Result<f64, ConfigError> {
    let trimmed = text.trim();
    match trimmed.to_lowercase().as_str() {
        "true" | "on" => return Ok(1.0),
        "false" | "off" => return Ok(0.0),
        _ => {}
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::InvalidNumber(text.to_string()))
}

// ============================================================================
// Runtime frame state
// ============================================================================

/// Runtime state of one frame of the loaded protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    pub definition: FrameDefinition,
    pub enabled: bool,
    pub interval_ms: u64,
    pub values: HashMap<String, f64>,
}

impl FrameState {
    pub fn new(definition: FrameDefinition) -> Self {
        let values = definition.default_values();
        Self {
            definition,
            enabled: true,
            interval_ms: DEFAULT_INTERVAL_MS,
            values,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        self.definition.build(&self.values)
    }

    pub fn to_frame(&self) -> CanFrame {
        CanFrame::new(self.definition.id, self.payload())
    }
}

/// All frame states of one protocol plus the send sequence.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    protocol: String,
    states: HashMap<u32, FrameState>,
    /// Table order, restored by `reset_sequence`
    default_order: Vec<u32>,
    sequence: Vec<u32>,
}

impl FrameTable {
    pub fn for_protocol(name: &str) -> Option<Self> {
        protocols::get_protocol(name).map(|p| Self::from_definitions(&p.name, p.frames.clone()))
    }

    /// Build from definitions; a repeated frame ID keeps its first definition.
    pub fn from_definitions(protocol: &str, definitions: Vec<FrameDefinition>) -> Self {
        let mut states = HashMap::new();
        let mut order = Vec::new();
        for def in definitions {
            let id = def.id;
            if states.contains_key(&id) {
                continue;
            }
            states.insert(id, FrameState::new(def));
            order.push(id);
        }
        Self {
            protocol: protocol.to_string(),
            states,
            sequence: order.clone(),
            default_order: order,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn sequence(&self) -> &[u32] {
        &self.sequence
    }

    pub fn get(&self, frame_id: u32) -> Option<&FrameState> {
        self.states.get(&frame_id)
    }

    pub fn get_mut(&mut self, frame_id: u32) -> Option<&mut FrameState> {
        self.states.get_mut(&frame_id)
    }

    pub fn in_sequence(&self) -> impl Iterator<Item = &FrameState> {
        self.sequence.iter().filter_map(move |id| self.states.get(id))
    }

    /// Returns false if the frame is unknown or already first.
    pub fn move_up(&mut self, frame_id: u32) -> bool {
        match self.sequence.iter().position(|&id| id == frame_id) {
            Some(pos) if pos > 0 => {
                self.sequence.swap(pos, pos - 1);
                true
            }
            _ => false,
        }
    }

    /// Returns false if the frame is unknown or already last.
    pub fn move_down(&mut self, frame_id: u32) -> bool {
        match self.sequence.iter().position(|&id| id == frame_id) {
            Some(pos) if pos + 1 < self.sequence.len() => {
                self.sequence.swap(pos, pos + 1);
                true
            }
            _ => false,
        }
    }

    pub fn reset_sequence(&mut self) {
        self.sequence = self.default_order.clone();
    }

    /// Replace the sequence with `order` filtered to known IDs; missing IDs are appended
    /// in table order.
    pub fn set_sequence(&mut self, order: &[u32]) {
        let mut sequence: Vec<u32> = Vec::with_capacity(self.states.len());
        for id in order {
            if self.states.contains_key(id) && !sequence.contains(id) {
                sequence.push(*id);
            }
        }
        for id in &self.default_order {
            if !sequence.contains(id) {
                sequence.push(*id);
            }
        }
        self.sequence = sequence;
    }

    pub fn apply_interval_to_all(&mut self, interval_ms: u64) {
        for state in self.states.values_mut() {
            state.interval_ms = interval_ms;
        }
    }

    /// Set `field` in every frame that has it. Returns the number of frames touched.
    pub fn set_value_everywhere(&mut self, field: &str, value: f64) -> usize {
        let mut touched = 0;
        for state in self.states.values_mut() {
            if state.definition.field(field).is_some() {
                state.values.insert(field.to_string(), value);
                touched += 1;
            }
        }
        touched
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    table: Arc<Mutex<FrameTable>>,
    transport: Option<SharedTransport>,
    wire: WireFormat,
    transmitter: CyclicTransmitter,
    /// Opaque connection parameters carried through snapshots
    connection: Map<String, Value>,
}

impl Session {
    pub fn new(protocol: &str) -> Result<Self, ConfigError> {
        Self::with_quantum(protocol, DEFAULT_TICK_QUANTUM)
    }

    pub fn with_quantum(protocol: &str, quantum: Duration) -> Result<Self, ConfigError> {
        let table = FrameTable::for_protocol(protocol)
            .ok_or_else(|| ConfigError::UnknownProtocol(protocol.to_string()))?;
        Ok(Self {
            table: Arc::new(Mutex::new(table)),
            transport: None,
            wire: WireFormat::default(),
            transmitter: CyclicTransmitter::new(quantum),
            connection: Map::new(),
        })
    }

    fn table(&self) -> MutexGuard<'_, FrameTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn protocol(&self) -> String {
        self.table().protocol().to_string()
    }

    /// Stop transmission and replace all runtime state with the defaults of `name`.
    pub async fn load_protocol(&mut self, name: &str) -> Result<(), ConfigError> {
        let table =
            FrameTable::for_protocol(name).ok_or_else(|| ConfigError::UnknownProtocol(name.to_string()))?;
        self.transmitter.stop().await;
        let frames = table.len();
        *self.table() = table;
        tlog!("[session] Loaded protocol '{}' ({} frames)", name, frames);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn sequence(&self) -> Vec<u32> {
        self.table().sequence().to_vec()
    }

    /// Copy of one frame's state, for display
    pub fn frame_state(&self, frame_id: u32) -> Option<FrameState> {
        self.table().get(frame_id).cloned()
    }

    /// Frame states in send-sequence order
    pub fn frame_states(&self) -> Vec<FrameState> {
        self.table().in_sequence().cloned().collect()
    }

    /// The line-protocol command for a frame's current values.
    pub fn preview(&self, frame_id: u32) -> Result<String, ConfigError> {
        let table = self.table();
        let state = table.get(frame_id).ok_or(ConfigError::UnknownFrame(frame_id))?;
        let data = state.payload();
        Ok(format_command(frame_id, state.definition.dlc, &data))
    }

    // ------------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------------

    pub fn set_field_value(&self, frame_id: u32, field: &str, value: f64) -> Result<(), ConfigError> {
        let mut table = self.table();
        let state = table.get_mut(frame_id).ok_or(ConfigError::UnknownFrame(frame_id))?;
        if state.definition.field(field).is_none() {
            return Err(ConfigError::UnknownField {
                frame_id,
                field: field.to_string(),
            });
        }
        state.values.insert(field.to_string(), value);
        Ok(())
    }

    /// Set a field by name in every frame that carries it.
    pub fn set_value_everywhere(&self, field: &str, value: f64) -> Result<usize, ConfigError> {
        match self.table().set_value_everywhere(field, value) {
            0 => Err(ConfigError::UnknownFieldName(field.to_string())),
            n => Ok(n),
        }
    }

    pub fn set_enabled(&self, frame_id: u32, enabled: bool) -> Result<(), ConfigError> {
        let mut table = self.table();
        let state = table.get_mut(frame_id).ok_or(ConfigError::UnknownFrame(frame_id))?;
        state.enabled = enabled;
        Ok(())
    }

    pub fn set_interval(&self, frame_id: u32, interval_ms: u64) -> Result<(), ConfigError> {
        let interval_ms = check_interval(interval_ms)?;
        let mut table = self.table();
        let state = table.get_mut(frame_id).ok_or(ConfigError::UnknownFrame(frame_id))?;
        state.interval_ms = interval_ms;
        Ok(())
    }

    pub fn set_interval_text(&self, frame_id: u32, text: &str) -> Result<(), ConfigError> {
        self.set_interval(frame_id, parse_interval(text)?)
    }

    pub fn apply_interval_to_all(&self, interval_ms: u64) -> Result<(), ConfigError> {
        let interval_ms = check_interval(interval_ms)?;
        self.table().apply_interval_to_all(interval_ms);
        Ok(())
    }

    pub fn move_up(&self, frame_id: u32) -> Result<bool, ConfigError> {
        let mut table = self.table();
        if table.get(frame_id).is_none() {
            return Err(ConfigError::UnknownFrame(frame_id));
        }
        Ok(table.move_up(frame_id))
    }

    pub fn move_down(&self, frame_id: u32) -> Result<bool, ConfigError> {
        let mut table = self.table();
        if table.get(frame_id).is_none() {
            return Err(ConfigError::UnknownFrame(frame_id));
        }
        Ok(table.move_down(frame_id))
    }

    pub fn reset_sequence(&self) {
        self.table().reset_sequence();
    }

    /// Apply a named preset to every frame that has a matching field. Returns the number
    /// of values written.
    pub fn apply_preset(&self, name: &str) -> Result<usize, ConfigError> {
        let values = presets::preset_values(name).ok_or_else(|| ConfigError::UnknownPreset(name.to_string()))?;
        let mut table = self.table();
        let written: usize = values
            .iter()
            .map(|(field, value)| table.set_value_everywhere(field, *value))
            .sum();
        tlog!("[session] Applied preset '{}' ({} values)", name, written);
        Ok(written)
    }

    // ------------------------------------------------------------------------
    // Connection and transmission
    // ------------------------------------------------------------------------

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn wire_format(&self) -> WireFormat {
        self.wire
    }

    /// Take ownership of a transport. An existing connection is closed first.
    pub async fn connect(&mut self, transport: Box<dyn Transport>, wire: WireFormat) {
        self.disconnect().await;
        tlog!("[session] Connected to {} ({})", transport.name(), wire.as_str());
        self.transport = Some(io::shared(transport));
        self.wire = wire;
    }

    /// Stop transmission and close the transport. No-op when not connected.
    pub async fn disconnect(&mut self) {
        self.transmitter.stop().await;
        if let Some(transport) = self.transport.take() {
            let mut guard = transport.lock().unwrap_or_else(|e| e.into_inner());
            tlog!("[session] Disconnecting {}", guard.name());
            guard.close();
        }
    }

    /// Send every enabled frame once, in sequence order.
    ///
    /// The writer lock is held for the whole pass so cyclic sends cannot interleave.
    /// Per-frame transport errors are reported, not raised.
    pub fn send_once(&self) -> Result<TickReport, ConfigError> {
        let transport = self.transport.as_ref().ok_or(ConfigError::NotConnected)?;
        let frames: Vec<CanFrame> = self
            .table()
            .in_sequence()
            .filter(|s| s.enabled)
            .map(|s| s.to_frame())
            .collect();

        let mut report = TickReport::default();
        let mut guard = transport.lock().unwrap_or_else(|e| e.into_inner());
        for frame in &frames {
            match self.wire.encode(frame).and_then(|bytes| guard.write(&bytes)) {
                Ok(()) => {
                    vlog!("[session] TX 0x{:03X} [{}] {}", frame.frame_id, frame.dlc(), hex::encode_upper(&frame.data));
                    report.sent += 1;
                }
                Err(e) => {
                    tlog!("[session] Send 0x{:03X} failed: {}", frame.frame_id, e);
                    report.errors.push((frame.frame_id, e));
                }
            }
        }
        Ok(report)
    }

    /// Start cyclic transmission. `Ok(false)` if it was already running.
    pub fn start_cyclic(&mut self) -> Result<bool, ConfigError> {
        let transport = self.transport.clone().ok_or(ConfigError::NotConnected)?;
        Ok(self.transmitter.start(self.table.clone(), transport, self.wire))
    }

    pub async fn stop_cyclic(&mut self) {
        self.transmitter.stop().await;
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitter.is_running()
    }

    pub fn stats(&self) -> Arc<TransmitStats> {
        self.transmitter.stats()
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn connection_info(&self) -> &Map<String, Value> {
        &self.connection
    }

    /// Keys the snapshot owns (`protocol`, `sequence`, `messages`) are dropped.
    pub fn set_connection_info(&mut self, connection: Map<String, Value>) {
        self.connection = connection_keys(connection);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let table = self.table();
        let frames = table
            .in_sequence()
            .map(|state| {
                (
                    state.definition.id.to_string(),
                    FrameSnapshot {
                        enabled: state.enabled,
                        interval_ms: state.interval_ms,
                        values: state.values.iter().map(|(k, v)| (k.clone(), *v)).collect::<BTreeMap<_, _>>(),
                    },
                )
            })
            .collect();

        SessionSnapshot {
            protocol: table.protocol().to_string(),
            connection: self.connection.clone(),
            sequence: table.sequence().to_vec(),
            frames,
        }
    }

    /// Load a snapshot. Unknown frames and fields are ignored, missing ones keep their
    /// defaults, and out-of-range intervals are clamped. Fails only on an unknown
    /// protocol, leaving the session unchanged.
    pub async fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), ConfigError> {
        let mut table = FrameTable::for_protocol(&snapshot.protocol)
            .ok_or_else(|| ConfigError::UnknownProtocol(snapshot.protocol.clone()))?;

        let mut ignored = 0usize;
        for (key, saved) in &snapshot.frames {
            let state = match key.parse::<u32>().ok().and_then(|id| table.get_mut(id)) {
                Some(state) => state,
                None => {
                    ignored += 1;
                    continue;
                }
            };
            state.enabled = saved.enabled;
            state.interval_ms = saved.interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS);
            for (name, value) in &saved.values {
                if state.definition.field(name).is_some() {
                    state.values.insert(name.clone(), *value);
                } else {
                    ignored += 1;
                }
            }
        }
        table.set_sequence(&snapshot.sequence);

        self.transmitter.stop().await;
        *self.table() = table;
        self.connection = connection_keys(snapshot.connection.clone());

        tlog!(
            "[session] Restored '{}' ({} frames, {} unknown entries ignored)",
            snapshot.protocol,
            snapshot.frames.len(),
            ignored
        );
        Ok(())
    }
}
