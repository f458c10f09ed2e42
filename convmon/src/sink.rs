//! The record sink: a bounded queue in front of a single writer appending
//! newline-delimited JSON to the measurement log.
//!
//! Producers never block: when the queue is full the oldest queued record
//! is discarded with a warning. The terminal summary record bypasses the
//! queue entirely so it is durable before the process exits. A log file
//! that cannot be opened or written degrades that stream to stderr; the
//! monitor keeps running either way.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, warn};

use crate::record::Record;

/// Queue bound between producers and the writer.
pub const QUEUE_CAPACITY: usize = 1000;

/// Mode the log file is forced to, regardless of umask, so the analyzer can
/// read it without privileges.
const LOG_FILE_MODE: u32 = 0o666;

/// Destination for emitted records.
///
/// The session engine only talks to this trait; tests substitute a
/// capturing implementation.
pub trait RecordSink: Send + Sync {
    /// Queue a record for the background writer. Never blocks the caller.
    fn log(&self, record: Record);

    /// Write a record durably, bypassing the queue.
    fn log_sync(&self, record: Record);

    /// Stop the background writer after draining queued records.
    /// Idempotent.
    fn shutdown(&self);
}

enum LogOutput {
    File(File),
    Stderr,
}

impl LogOutput {
    fn write_line(&mut self, line: &str) {
        match self {
            Self::File(file) => {
                if let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush()) {
                    warn!(error = %e, "log write failed, record follows on stderr");
                    eprintln!("{line}");
                }
            }
            Self::Stderr => eprintln!("{line}"),
        }
    }
}

struct SinkQueue {
    records: VecDeque<Record>,
    capacity: usize,
    running: bool,
}

impl SinkQueue {
    /// Enqueue a record, discarding the oldest one when full. Returns
    /// whether a record was dropped.
    fn push(&mut self, record: Record) -> bool {
        let dropped = self.records.len() == self.capacity;
        if dropped {
            self.records.pop_front();
        }
        self.records.push_back(record);
        dropped
    }
}

struct SinkShared {
    queue: Mutex<SinkQueue>,
    available: Condvar,
    output: Mutex<LogOutput>,
}

/// The production [`RecordSink`]: one dedicated writer thread draining the
/// bounded queue in FIFO order.
pub struct LogSink {
    shared: Arc<SinkShared>,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LogSink {
    /// Open (or create) the log file at `path` and start the writer thread.
    /// An unopenable file downgrades the sink to stderr output.
    pub fn open(path: &Path) -> Self {
        let output = match open_log_file(path) {
            Ok(file) => LogOutput::File(file),
            Err(e) => {
                warn!(path = %path.display(), error = %e,
                    "cannot open log file, writing records to stderr");
                LogOutput::Stderr
            }
        };
        Self::with_output(output, QUEUE_CAPACITY)
    }

    fn with_output(output: LogOutput, capacity: usize) -> Self {
        let shared = Arc::new(SinkShared {
            queue: Mutex::new(SinkQueue { records: VecDeque::new(), capacity, running: true }),
            available: Condvar::new(),
            output: Mutex::new(output),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("record-sink".to_owned())
            .spawn(move || drain(worker))
            .ok();
        if handle.is_none() {
            warn!("failed to spawn record sink thread, records will be lost");
        }

        Self { shared, writer: Mutex::new(handle) }
    }
}

impl RecordSink for LogSink {
    fn log(&self, record: Record) {
        let dropped = {
            let mut queue = lock(&self.shared.queue);
            if !queue.running {
                return;
            }
            queue.push(record)
        };
        if dropped {
            warn!("log queue full, dropped one record");
        }
        self.shared.available.notify_one();
    }

    fn log_sync(&self, record: Record) {
        let line = record.to_json_line();
        lock(&self.shared.output).write_line(&line);
    }

    fn shutdown(&self) {
        {
            let mut queue = lock(&self.shared.queue);
            if !queue.running {
                return;
            }
            queue.running = false;
        }
        self.shared.available.notify_all();

        if let Some(handle) = lock(&self.writer).take() {
            if handle.join().is_err() {
                warn!("record sink thread panicked");
            } else {
                debug!("record sink drained and stopped");
            }
        }
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Writer thread body: pop records in order, write each with the queue
/// unlocked, and drain whatever is left once the sink stops.
fn drain(shared: Arc<SinkShared>) {
    let mut queue = lock(&shared.queue);
    loop {
        if let Some(record) = queue.records.pop_front() {
            drop(queue);
            let line = record.to_json_line();
            lock(&shared.output).write_line(&line);
            queue = lock(&shared.queue);
            continue;
        }
        if !queue.running {
            break;
        }
        queue = shared
            .available
            .wait(queue)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    if let Err(e) = file.set_permissions(Permissions::from_mode(LOG_FILE_MODE)) {
        debug!(path = %path.display(), error = %e, "could not chmod log file");
    }
    Ok(file)
}

/// A sink must keep accepting records even if some producer panicked while
/// holding a lock.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use std::fs;

    fn numbered(i: usize) -> Record {
        let mut record = Record::new("route_event");
        record.set("route_event_number", i as u64);
        record
    }

    #[test]
    fn records_are_written_in_fifo_order_and_drained_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let sink = LogSink::open(&path);

        for i in 0..50 {
            sink.log(numbered(i));
        }
        sink.shutdown();

        let contents = fs::read_to_string(&path).unwrap();
        let numbers: Vec<u64> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["route_event_number"].as_u64().unwrap()
            })
            .collect();
        assert_eq!(numbers, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn sync_log_lands_after_a_drained_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let sink = LogSink::open(&path);

        sink.log(numbered(1));
        sink.log(numbered(2));
        sink.shutdown();

        let mut finale = Record::new("monitoring_completed");
        finale.set("completed_sessions_count", 0u64);
        sink.log_sync(finale);

        let contents = fs::read_to_string(&path).unwrap();
        let types: Vec<String> = contents
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["event_type"].as_str().unwrap().to_owned()
            })
            .collect();
        assert_eq!(types, ["route_event", "route_event", "monitoring_completed"]);
    }

    #[test]
    fn full_queue_drops_the_oldest_record() {
        let mut queue = SinkQueue { records: VecDeque::new(), capacity: 3, running: true };
        assert!(!queue.push(numbered(0)));
        assert!(!queue.push(numbered(1)));
        assert!(!queue.push(numbered(2)));
        assert!(queue.push(numbered(3)));

        let remaining: Vec<u64> = queue
            .records
            .iter()
            .map(|r| r.get("route_event_number").unwrap().as_u64().unwrap())
            .collect();
        assert_eq!(remaining, [1, 2, 3]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&dir.path().join("records.json"));
        sink.log(numbered(0));
        sink.shutdown();
        sink.shutdown();
    }

    #[test]
    fn unopenable_path_degrades_to_stderr() {
        let sink = LogSink::open(Path::new("/nonexistent-convmon-dir/records.json"));
        sink.log(numbered(0));
        sink.log_sync(numbered(1));
        sink.shutdown();
        assert!(!Path::new("/nonexistent-convmon-dir/records.json").exists());
    }
}
