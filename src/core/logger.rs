//! Event logging and fan-out for simulation observers
//!
//! The `EventLogger` writes one JSON object per line to a file through a
//! background writer thread, so the engine never blocks on disk I/O. The
//! `EventBus` is what the resource manager actually talks to: it forwards every
//! event to the logger (when one is configured) and to every live subscriber.

use crate::core::types::SimEvent;
use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Structure for a single log line
#[derive(Debug, Serialize, Clone)]
pub struct LogEntry {
    /// Absolute timestamp of the event (seconds since Unix Epoch)
    pub timestamp: f64,
    pub event: SimEvent,
}

/// Commands for controlling the async logger thread
#[derive(Debug)]
pub enum LoggerCommand {
    /// Write a log entry to the file
    LogEntry(LogEntry),
    /// Flush all pending entries to disk and signal completion
    Flush(Sender<()>),
}

/// Event logger for recording simulation events
///
/// Provides asynchronous file I/O and uses a background thread to handle
/// writes.
pub struct EventLogger {
    /// Channel sender for async communication with logger thread
    sender: Sender<LoggerCommand>,
    /// Flag indicating if a flush operation is in progress
    flushing: Arc<AtomicBool>,
    /// Resolved path of the log file
    path: PathBuf,
}

impl Drop for EventLogger {
    fn drop(&mut self) {
        // Flush remaining entries so they are not lost when the run ends
        if let Err(e) = self.flush() {
            eprintln!("Warning: Failed to flush logs during EventLogger drop: {e:?}");
        }
    }
}

impl EventLogger {
    /// Create a new logger that writes to the specified file asynchronously
    ///
    /// # Arguments
    /// * `path` - Path to the log file. If the filename contains "{timestamp}",
    ///   it will be replaced with the current timestamp.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The directory containing the log file could not be created
    /// - The log file could not be opened for writing
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();

        if let Some(parent) = path_buf.parent()
            && parent.to_string_lossy() != ""
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        #[allow(clippy::literal_string_with_formatting_args)]
        let file_path = if path_buf.to_string_lossy().contains("{timestamp}") {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            PathBuf::from(
                path_buf
                    .to_string_lossy()
                    .replace("{timestamp}", &timestamp.to_string()),
            )
        } else {
            path_buf
        };

        let (tx, rx) = unbounded::<LoggerCommand>();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&file_path)?;

        let flushing = Arc::new(AtomicBool::new(false));
        let flushing_clone = Arc::clone(&flushing);

        thread::Builder::new()
            .name("gridlock-logger".to_string())
            .spawn(move || async_logger_thread(file, rx, flushing_clone))?;

        Ok(EventLogger {
            sender: tx,
            flushing,
            path: file_path,
        })
    }

    /// Path the logger is writing to, with any placeholder resolved
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue one event for writing
    ///
    /// Non-blocking; a closed writer only produces a warning on stderr.
    pub fn log_event(&self, event: &SimEvent) {
        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 / 1_000_000.0;

        let entry = LogEntry {
            timestamp,
            event: event.clone(),
        };

        if let Err(e) = self.sender.send(LoggerCommand::LogEntry(entry)) {
            eprintln!("Failed to send log entry: {e:?}");
        }
    }

    /// Force flush all pending log entries to disk
    ///
    /// Blocks until the writer thread confirms the flush.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The flush request could not be sent to the async thread
    /// - The flush confirmation was not received in time
    pub fn flush(&self) -> Result<()> {
        let already_flushing = self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err();

        if already_flushing {
            return Ok(());
        }

        let result = (|| {
            let (flush_tx, flush_rx) = crossbeam_channel::bounded(1);
            self.sender
                .send(LoggerCommand::Flush(flush_tx))
                .map_err(|_| anyhow::anyhow!("Logger thread is gone"))?;

            match flush_rx.recv_timeout(Duration::from_secs(10)) {
                Ok(_) => Ok(()),
                Err(_) => Err(anyhow::anyhow!("Flush operation timed out")),
            }
        })();

        self.flushing.store(false, Ordering::SeqCst);
        result
    }
}

/// Writer loop of the logger thread
///
/// # Arguments
/// * `file` - The file to write log entries to
/// * `rx` - Channel receiver for incoming logger commands
/// * `flushing` - Atomic flag indicating flush status
fn async_logger_thread(file: File, rx: Receiver<LoggerCommand>, flushing: Arc<AtomicBool>) {
    let mut writer = BufWriter::new(file);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            LoggerCommand::LogEntry(entry) => {
                if let Ok(json) = serde_json::to_string(&entry)
                    && let Err(e) = writeln!(writer, "{json}")
                {
                    eprintln!("Logger write error: {e:?}");
                }
            }
            LoggerCommand::Flush(responder) => {
                flushing.store(true, Ordering::Release);
                if let Err(e) = writer.flush() {
                    eprintln!("Logger flush error: {e:?}");
                }
                flushing.store(false, Ordering::Release);
                let _ = responder.send(());
            }
        }
    }

    if let Err(e) = writer.flush() {
        eprintln!("Logger final flush error: {e:?}");
    }
}

/// Fan-out point for simulation events
///
/// Subscribers whose receiving end is gone are dropped on the next emit.
#[derive(Default)]
pub struct EventBus {
    logger: Option<EventLogger>,
    subscribers: Vec<Sender<SimEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(logger: EventLogger) -> Self {
        EventBus {
            logger: Some(logger),
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber and hand back its receiving end
    pub fn subscribe(&mut self) -> Receiver<SimEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Attach an already existing sender as a subscriber
    pub fn attach(&mut self, subscriber: Sender<SimEvent>) {
        self.subscribers.push(subscriber);
    }

    pub fn emit(&mut self, event: SimEvent) {
        if let Some(logger) = &self.logger {
            logger.log_event(&event);
        }
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Flush the file logger, if any
    pub fn flush(&self) -> Result<()> {
        match &self.logger {
            Some(logger) => logger.flush(),
            None => Ok(()),
        }
    }
}
