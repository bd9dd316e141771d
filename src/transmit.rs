// src/transmit.rs
//
// Multi-rate cyclic transmission.
//
// `CyclicScheduler` is the pure decision logic: given the current time and the frame
// table, which frames are due, in what order. `CyclicTransmitter` runs it on a dedicated
// blocking thread at a fixed tick quantum and owns the start/stop lifecycle.
//
// A frame is due when `now - last_sent >= interval`. The last-send time is the time of
// the tick that sent it, so there is no catch-up after a late tick and no drift
// correction against an absolute schedule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::io::{CanFrame, IoError, SharedTransport, WireFormat};
use crate::sessions::FrameTable;

// ============================================================================
// Constants
// ============================================================================

pub const MIN_INTERVAL_MS: u64 = 10;
pub const MAX_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_INTERVAL_MS: u64 = 100;
/// Sleep between ticks. Small against MIN_INTERVAL_MS to keep jitter low.
pub const DEFAULT_TICK_QUANTUM: Duration = Duration::from_millis(1);

// ============================================================================
// Scheduler
// ============================================================================

/// Outcome of one tick or one-shot pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub sent: usize,
    pub errors: Vec<(u32, IoError)>,
}

impl TickReport {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }

    pub fn attempted(&self) -> usize {
        self.sent + self.errors.len()
    }
}

/// Per-frame last-send bookkeeping. Frames never sent are due immediately.
#[derive(Debug, Default)]
pub struct CyclicScheduler {
    last_sent: HashMap<u32, u64>,
}

impl CyclicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all send history; every enabled frame becomes due on the next tick.
    pub fn reset(&mut self) {
        self.last_sent.clear();
    }

    pub fn last_sent(&self, frame_id: u32) -> Option<u64> {
        self.last_sent.get(&frame_id).copied()
    }

    fn is_due(&self, frame_id: u32, interval_ms: u64, now_ms: u64) -> bool {
        match self.last_sent.get(&frame_id) {
            None => true,
            Some(&last) => now_ms.saturating_sub(last) >= interval_ms,
        }
    }

    /// Build every due frame, in send-sequence order. Disabled frames are skipped.
    pub fn collect_due(&self, now_ms: u64, table: &FrameTable) -> Vec<CanFrame> {
        table
            .in_sequence()
            .filter(|state| state.enabled)
            .filter(|state| self.is_due(state.definition.id, state.interval_ms, now_ms))
            .map(|state| state.to_frame())
            .collect()
    }

    /// Hand each frame to `send` in order and record the attempt. A failed send still
    /// counts as sent for timing purposes, so it is retried after one interval.
    pub fn dispatch<F>(&mut self, now_ms: u64, frames: &[CanFrame], mut send: F) -> TickReport
    where
        F: FnMut(&CanFrame) -> Result<(), IoError>,
    {
        let mut report = TickReport::default();
        for frame in frames {
            match send(frame) {
                Ok(()) => report.sent += 1,
                Err(e) => report.errors.push((frame.frame_id, e)),
            }
            self.last_sent.insert(frame.frame_id, now_ms);
        }
        report
    }

    pub fn tick<F>(&mut self, now_ms: u64, table: &FrameTable, send: F) -> TickReport
    where
        F: FnMut(&CanFrame) -> Result<(), IoError>,
    {
        let due = self.collect_due(now_ms, table);
        self.dispatch(now_ms, &due, send)
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters shared between the transmit thread and observers.
#[derive(Debug)]
pub struct TransmitStats {
    sent: AtomicU64,
    failed: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl Default for TransmitStats {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started: Mutex::new(None),
        }
    }
}

impl TransmitStats {
    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
    }

    pub fn record(&self, report: &TickReport) {
        self.sent.fetch_add(report.sent as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed() as u64, Ordering::Relaxed);
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Frames per second since the last reset; 0 before the first start.
    pub fn rate(&self) -> f64 {
        let elapsed = self
            .started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.sent() as f64 / elapsed
    }
}

// ============================================================================
// Transmitter
// ============================================================================

/// Write one frame through the shared transport under its lock.
pub(crate) fn write_frame(
    transport: &SharedTransport,
    wire: WireFormat,
    frame: &CanFrame,
) -> Result<(), IoError> {
    let bytes = wire.encode(frame)?;
    let mut guard = transport.lock().unwrap_or_else(|e| e.into_inner());
    guard.write(&bytes)?;
    vlog!(
        "[transmit] TX 0x{:03X} [{}] {}",
        frame.frame_id,
        frame.dlc(),
        hex_spaced(&frame.data)
    );
    Ok(())
}

fn hex_spaced(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs the scheduler on a dedicated thread. One running loop at a time.
pub struct CyclicTransmitter {
    quantum: Duration,
    cancel_flag: Arc<AtomicBool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
    stats: Arc<TransmitStats>,
}

impl CyclicTransmitter {
    pub fn new(quantum: Duration) -> Self {
        Self {
            quantum,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            task_handle: None,
            stats: Arc::new(TransmitStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<TransmitStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Start the loop. Returns false (and does nothing) if it is already running.
    /// Must be called inside a tokio runtime.
    pub fn start(
        &mut self,
        table: Arc<Mutex<FrameTable>>,
        transport: SharedTransport,
        wire: WireFormat,
    ) -> bool {
        if self.is_running() {
            return false;
        }
        // A loop that exited on its own leaves a finished handle behind
        self.task_handle = None;

        // Fresh flag per run so a stale loop can never be revived
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flag = cancel_flag.clone();
        self.stats.reset();

        let stats = self.stats.clone();
        let quantum = self.quantum;

        tlog!(
            "[transmit] Starting cyclic transmit ({}, tick {} ms)",
            wire.as_str(),
            quantum.as_millis()
        );

        self.task_handle = Some(tokio::task::spawn_blocking(move || {
            run_transmit_loop(table, transport, wire, quantum, cancel_flag, stats)
        }));
        true
    }

    /// Stop the loop and wait until it has exited. No-op when not running.
    pub async fn stop(&mut self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tlog!("[transmit] Transmit loop panicked: {:?}", e);
            }
            tlog!(
                "[transmit] Stopped ({} sent, {} failed)",
                self.stats.sent(),
                self.stats.failed()
            );
        }
    }
}

impl Drop for CyclicTransmitter {
    fn drop(&mut self) {
        // Cannot await here; the loop exits on its next tick
        self.cancel_flag.store(true, Ordering::Relaxed);
    }
}

fn run_transmit_loop(
    table: Arc<Mutex<FrameTable>>,
    transport: SharedTransport,
    wire: WireFormat,
    quantum: Duration,
    cancel_flag: Arc<AtomicBool>,
    stats: Arc<TransmitStats>,
) {
    let epoch = Instant::now();
    let mut scheduler = CyclicScheduler::new();
    // Last error per frame, so a persistently failing frame logs once, not every interval
    let mut last_errors: HashMap<u32, String> = HashMap::new();

    while !cancel_flag.load(Ordering::Relaxed) {
        let now_ms = epoch.elapsed().as_millis() as u64;

        let due = {
            let table = table.lock().unwrap_or_else(|e| e.into_inner());
            scheduler.collect_due(now_ms, &table)
        };

        if !due.is_empty() {
            let report = scheduler.dispatch(now_ms, &due, |frame| write_frame(&transport, wire, frame));
            stats.record(&report);

            for (frame_id, error) in &report.errors {
                let message = error.to_string();
                if last_errors.get(frame_id) != Some(&message) {
                    tlog!("[transmit] 0x{:03X} failed: {}", frame_id, message);
                    last_errors.insert(*frame_id, message);
                }
            }
            if !last_errors.is_empty() {
                for frame in &due {
                    let ok = !report.errors.iter().any(|(id, _)| *id == frame.frame_id);
                    if ok && last_errors.remove(&frame.frame_id).is_some() {
                        tlog!("[transmit] 0x{:03X} recovered", frame.frame_id);
                    }
                }
            }
        }

        std::thread::sleep(quantum);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::testing::{FailingTransport, RecordingTransport};
    use crate::io::{self, Transport};
    use crate::protocols::{ByteWidth, Field, FrameDefinition};

    fn frame(id: u32) -> FrameDefinition {
        FrameDefinition::new(
            id,
            "Test",
            "",
            1,
            vec![Field::new("v", "", (0.0, 255.0), (id & 0xFF) as f64, "", 0, ByteWidth::One)],
        )
    }

    fn table(ids: &[u32]) -> FrameTable {
        FrameTable::from_definitions("Test", ids.iter().map(|&id| frame(id)).collect())
    }

    /// Tick every `quantum` ms over [0, duration) and count sends per frame.
    fn simulate(table: &FrameTable, quantum: u64, duration: u64) -> HashMap<u32, usize> {
        let mut scheduler = CyclicScheduler::new();
        let mut counts = HashMap::new();
        let mut now = 0;
        while now < duration {
            scheduler.tick(now, table, |f| {
                *counts.entry(f.frame_id).or_insert(0) += 1;
                Ok(())
            });
            now += quantum;
        }
        counts
    }

    #[test]
    fn test_multi_rate_fairness() {
        let mut t = table(&[0xA, 0xB]);
        t.get_mut(0xA).unwrap().interval_ms = 50;
        t.get_mut(0xB).unwrap().interval_ms = 200;

        let counts = simulate(&t, 10, 1000);
        let a = counts[&0xA];
        let b = counts[&0xB];
        assert!((19..=21).contains(&a), "A sent {} times", a);
        assert!((4..=6).contains(&b), "B sent {} times", b);
    }

    #[test]
    fn test_never_sent_frame_is_due_on_first_tick() {
        let t = table(&[0x100]);
        let scheduler = CyclicScheduler::new();
        assert_eq!(scheduler.collect_due(0, &t).len(), 1);
    }

    #[test]
    fn test_late_tick_does_not_catch_up() {
        let mut t = table(&[0x100]);
        t.get_mut(0x100).unwrap().interval_ms = 100;
        let mut scheduler = CyclicScheduler::new();

        scheduler.tick(0, &t, |_| Ok(()));
        // Tick arrives 250 ms late: one send, and the next is measured from 350
        assert_eq!(scheduler.tick(350, &t, |_| Ok(())).sent, 1);
        assert_eq!(scheduler.tick(420, &t, |_| Ok(())).sent, 0);
        assert_eq!(scheduler.tick(450, &t, |_| Ok(())).sent, 1);
    }

    #[test]
    fn test_due_frames_follow_sequence_order() {
        let mut t = table(&[0x100, 0x101, 0x102]);
        t.move_up(0x102);
        t.move_up(0x102);
        let ids: Vec<u32> = CyclicScheduler::new()
            .collect_due(0, &t)
            .iter()
            .map(|f| f.frame_id)
            .collect();
        assert_eq!(ids, vec![0x102, 0x100, 0x101]);
    }

    #[test]
    fn test_disabled_frame_is_skipped_and_keeps_its_history() {
        let mut t = table(&[0x100, 0x101]);
        let mut scheduler = CyclicScheduler::new();
        scheduler.tick(0, &t, |_| Ok(()));

        t.get_mut(0x101).unwrap().enabled = false;
        let mut seen = Vec::new();
        for now in (10..1000).step_by(10) {
            scheduler.tick(now, &t, |f| {
                seen.push(f.frame_id);
                Ok(())
            });
        }
        assert!(!seen.contains(&0x101));
        assert_eq!(scheduler.last_sent(0x101), Some(0));

        // Stale history: re-enabling sends on the very next tick
        t.get_mut(0x101).unwrap().enabled = true;
        let report = scheduler.tick(1000, &t, |_| Ok(()));
        assert_eq!(report.sent, 2);
    }

    #[test]
    fn test_failed_frame_is_skipped_and_others_continue() {
        let t = table(&[0x100, 0x101, 0x102]);
        let mut scheduler = CyclicScheduler::new();
        let mut sent = Vec::new();

        let report = scheduler.tick(0, &t, |f| {
            if f.frame_id == 0x101 {
                return Err(IoError::write("test", "injected"));
            }
            sent.push(f.frame_id);
            Ok(())
        });

        assert_eq!(sent, vec![0x100, 0x102]);
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.errors[0].0, 0x101);

        // Not retried before its interval
        assert_eq!(scheduler.tick(50, &t, |_| Ok(())).attempted(), 0);
        assert_eq!(scheduler.tick(100, &t, |_| Ok(())).attempted(), 3);
    }

    #[test]
    fn test_interval_change_applies_on_next_tick() {
        let mut t = table(&[0x100]);
        let mut scheduler = CyclicScheduler::new();
        scheduler.tick(0, &t, |_| Ok(()));
        assert_eq!(scheduler.tick(20, &t, |_| Ok(())).sent, 0);
        t.get_mut(0x100).unwrap().interval_ms = 20;
        assert_eq!(scheduler.tick(20, &t, |_| Ok(())).sent, 1);
    }

    #[test]
    fn test_stats_accumulate() {
        let stats = TransmitStats::default();
        assert_eq!(stats.rate(), 0.0);
        stats.reset();
        stats.record(&TickReport {
            sent: 3,
            errors: vec![(0x100, IoError::disconnected("x"))],
        });
        assert_eq!(stats.sent(), 3);
        assert_eq!(stats.failed(), 1);
        assert!(stats.rate() > 0.0);
    }

    // ------------------------------------------------------------------------
    // Transmitter (real threads and clocks)
    // ------------------------------------------------------------------------

    fn shared_table(ids: &[u32], interval_ms: u64) -> Arc<Mutex<FrameTable>> {
        let mut t = table(ids);
        t.apply_interval_to_all(interval_ms);
        Arc::new(Mutex::new(t))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transmitter_sends_and_stops() {
        let recorder = RecordingTransport::new();
        let transport = io::shared(Box::new(recorder.clone()));
        let mut tx = CyclicTransmitter::new(DEFAULT_TICK_QUANTUM);

        assert!(tx.start(shared_table(&[0x100], 20), transport, WireFormat::Emulator));
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.stop().await;
        assert!(!tx.is_running());

        let count = recorder.count();
        assert!((5..=12).contains(&count), "sent {} frames", count);
        assert_eq!(recorder.lines()[0], "CAN:100:1:00\n");
        assert_eq!(tx.stats().sent(), count as u64);

        // Nothing is written after stop() returns
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.count(), count);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_while_running_is_noop() {
        let transport = io::shared(Box::new(RecordingTransport::new()));
        let table = shared_table(&[0x100], 50);
        let mut tx = CyclicTransmitter::new(DEFAULT_TICK_QUANTUM);

        assert!(tx.start(table.clone(), transport.clone(), WireFormat::Emulator));
        assert!(!tx.start(table, transport, WireFormat::Emulator));
        tx.stop().await;
        tx.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let mut tx = CyclicTransmitter::new(DEFAULT_TICK_QUANTUM);
        tx.stop().await;
        assert!(!tx.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_then_start_never_overlaps() {
        let recorder = RecordingTransport::new();
        let transport = io::shared(Box::new(recorder.clone()));
        let table = shared_table(&[0x100], 20);
        let mut tx = CyclicTransmitter::new(DEFAULT_TICK_QUANTUM);

        for _ in 0..3 {
            assert!(tx.start(table.clone(), transport.clone(), WireFormat::Emulator));
            tokio::time::sleep(Duration::from_millis(60)).await;
            tx.stop().await;
        }

        let writes = recorder.writes.lock().unwrap().clone();
        let times: Vec<Instant> = writes.iter().map(|(t, _)| *t).collect();
        assert!(times.windows(2).all(|w| w[1] > w[0]), "duplicate timestamps");

        // Only the two restarts may produce a short gap; two live loops would produce many
        let short_gaps = times
            .windows(2)
            .filter(|w| w[1].duration_since(w[0]) < Duration::from_millis(15))
            .count();
        assert!(short_gaps <= 2, "{} short gaps", short_gaps);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_frame_does_not_halt_loop() {
        let recorder = RecordingTransport::new();
        let failing = FailingTransport {
            needle: b"CAN:101".to_vec(),
            inner: recorder.clone(),
        };
        let transport = io::shared(Box::new(failing) as Box<dyn Transport>);
        let mut tx = CyclicTransmitter::new(DEFAULT_TICK_QUANTUM);

        tx.start(shared_table(&[0x100, 0x101, 0x102], 20), transport, WireFormat::Emulator);
        tokio::time::sleep(Duration::from_millis(120)).await;
        tx.stop().await;

        let lines = recorder.lines();
        assert!(lines.iter().any(|l| l.starts_with("CAN:100")));
        assert!(lines.iter().any(|l| l.starts_with("CAN:102")));
        assert!(!lines.iter().any(|l| l.starts_with("CAN:101")));
        assert!(tx.stats().failed() > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slcan_skips_extended_ids() {
        let recorder = RecordingTransport::new();
        let transport = io::shared(Box::new(recorder.clone()));
        let mut tx = CyclicTransmitter::new(DEFAULT_TICK_QUANTUM);

        tx.start(shared_table(&[0x100, 0x2000], 20), transport, WireFormat::Slcan);
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.stop().await;

        let lines = recorder.lines();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.starts_with("t100")));
    }
}
