// src/io/serial/reader.rs
//
// Inbound line reader. Runs a blocking read loop on a dedicated thread, frames the
// stream into lines, classifies each line and forwards it over a channel.

use std::io::Read;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;

use super::framer::LineFramer;
use crate::io::line::{parse_line, InboundLine};
use crate::io::IoError;

/// Back-off while the channel is full
const FULL_RETRY: Duration = Duration::from_millis(5);

pub struct LineReader {
    device: String,
    cancel_flag: Arc<AtomicBool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl LineReader {
    /// Start reading `source` until `stop()` is called, the source fails or the
    /// receiving side of `tx` is dropped or closed. A full channel never blocks `stop()`.
    /// Must be called inside a tokio runtime.
    pub fn spawn<R>(device: &str, source: R, tx: mpsc::Sender<InboundLine>) -> Self
    where
        R: Read + Send + 'static,
    {
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let flag = cancel_flag.clone();
        let name = device.to_string();

        let task_handle = tokio::task::spawn_blocking(move || {
            run_read_loop(&name, source, &flag, &tx);
        });

        Self {
            device: device.to_string(),
            cancel_flag,
            task_handle: Some(task_handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Signal the loop and wait until it has exited. Safe to call twice.
    pub async fn stop(&mut self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tlog!("[serial] Reader for {} panicked: {:?}", self.device, e);
            }
        }
    }
}

/// Blocking read loop
fn run_read_loop<R: Read>(
    device: &str,
    mut source: R,
    cancel_flag: &AtomicBool,
    tx: &mpsc::Sender<InboundLine>,
) {
    let mut framer = LineFramer::default();
    let mut buf = [0u8; 512];
    let mut lines_read: u64 = 0;

    tlog!("[serial] Reader started on {}", device);

    let reason = 'read: loop {
        if cancel_flag.load(Ordering::Relaxed) {
            break "stopped";
        }

        match source.read(&mut buf) {
            Ok(0) => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(n) => {
                for line in framer.feed(&buf[..n]) {
                    lines_read += 1;
                    if !forward(&line, tx, cancel_flag) {
                        break 'read "receiver gone";
                    }
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                // Timeout - continue
            }
            Err(e) => {
                tlog!("[serial] {}", IoError::read(device, e.to_string()));
                break "error";
            }
        }
    };

    if let Some(line) = framer.flush() {
        lines_read += 1;
        forward(&line, tx, cancel_flag);
    }

    tlog!(
        "[serial] Reader on {} ended ({}, {} lines)",
        device,
        reason,
        lines_read
    );
}

/// Parse and send one line. Returns false once the receiver is gone, or when the
/// channel is full and a stop has been requested.
fn forward(line: &str, tx: &mpsc::Sender<InboundLine>, cancel_flag: &AtomicBool) -> bool {
    let mut item = match parse_line(line) {
        Ok(inbound) => inbound,
        Err(e) => {
            vlog!("[serial] Discarding line: {}", e);
            return true;
        }
    };
    loop {
        match tx.try_send(item) {
            Ok(()) => return true,
            Err(mpsc::error::TrySendError::Closed(_)) => return false,
            Err(mpsc::error::TrySendError::Full(back)) => {
                if cancel_flag.load(Ordering::Relaxed) {
                    vlog!("[serial] Channel full at stop, dropping line");
                    return false;
                }
                item = back;
                std::thread::sleep(FULL_RETRY);
            }
        }
    }
}
