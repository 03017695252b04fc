use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::transport::LogSink;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventLogSettings {
    pub enabled: bool,
    pub batch_size: usize,
    pub max_entries: usize,
    /// Flush after every appended event instead of waiting for a full batch.
    pub send_immediate: bool,
    /// HTTP sink endpoint. Without one, events are buffered but never sent.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EventLogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: 50,
            max_entries: 1000,
            send_immediate: false,
            endpoint: None,
            timeout_ms: 5000,
        }
    }
}

/// One stabilizer reading, as exported to the log sink.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// Pipeline clock milliseconds (wall clock by default).
    pub timestamp: u64,
    pub height: f32,
    pub confidence: f32,
    pub center_x: f32,
    pub smoothed: f32,
    pub slope: f32,
    pub detected: bool,
}

struct LogQueue {
    /// Entries tagged with a sequence number so a delivery can remove exactly
    /// what it sent, even if eviction ran while it was in flight.
    entries: VecDeque<(u64, LogEvent)>,
    next_seq: u64,
    batch_size: usize,
    max_entries: usize,
    send_immediate: bool,
}

impl LogQueue {
    fn push(&mut self, event: LogEvent) -> bool {
        self.entries.push_back((self.next_seq, event));
        self.next_seq += 1;
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.send_immediate || self.entries.len() >= self.batch_size
    }

    fn head_batch(&self) -> Option<(u64, Vec<LogEvent>)> {
        let batch: Vec<(u64, LogEvent)> = self
            .entries
            .iter()
            .take(self.batch_size)
            .copied()
            .collect();
        let last_seq = batch.last()?.0;
        Some((last_seq, batch.into_iter().map(|(_, e)| e).collect()))
    }

    fn acknowledge(&mut self, last_seq: u64) -> usize {
        let mut removed = 0;
        while matches!(self.entries.front(), Some((seq, _)) if *seq <= last_seq) {
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }
}

struct Shared {
    queue: Mutex<LogQueue>,
    sink: Option<Arc<dyn LogSink>>,
    in_flight: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, LogQueue> {
        // A panicked flush must not take the log down with it.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cloneable handle to a bounded FIFO of [`LogEvent`]s.
///
/// Appending never blocks on I/O: when a flush is due, delivery runs on a
/// background thread. A failed delivery leaves the batch queued for the next
/// natural flush.
#[derive(Clone)]
pub struct EventLogger {
    shared: Arc<Shared>,
}

impl EventLogger {
    pub fn new(settings: &EventLogSettings, sink: Option<Arc<dyn LogSink>>) -> Self {
        let batch_size = settings.batch_size.max(1);
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(LogQueue {
                    entries: VecDeque::new(),
                    next_seq: 0,
                    batch_size,
                    max_entries: settings.max_entries.max(batch_size),
                    send_immediate: settings.send_immediate,
                }),
                sink,
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Append an event, evicting the oldest beyond capacity. Returns the
    /// background delivery thread when this append triggered a flush.
    pub fn record(&self, event: LogEvent) -> Option<JoinHandle<()>> {
        let due = self.shared.queue().push(event);
        if due {
            self.flush_in_background()
        } else {
            None
        }
    }

    /// Start a delivery on a background thread unless one is already running
    /// or there is no sink.
    pub fn flush_in_background(&self) -> Option<JoinHandle<()>> {
        self.shared.sink.as_ref()?;
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            return None;
        }
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("event-log-flush".to_string())
            .spawn(move || {
                if let Err(e) = deliver_head(&shared) {
                    log::warn!("event log delivery failed, keeping batch queued: {}", e);
                }
                shared.in_flight.store(false, Ordering::Release);
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("event log flush thread failed to start: {}", e);
                self.shared.in_flight.store(false, Ordering::Release);
                None
            }
        }
    }

    /// Deliver one batch on the calling thread. Returns the number of events
    /// removed from the queue; zero when idle, sink-less, or another delivery
    /// is in flight.
    pub fn flush_now(&self) -> Result<usize> {
        if self.shared.sink.is_none() || self.shared.in_flight.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let result = deliver_head(&self.shared);
        self.shared.in_flight.store(false, Ordering::Release);
        result
    }

    pub fn len(&self) -> usize {
        self.shared.queue().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued events, oldest first.
    pub fn snapshot(&self) -> Vec<LogEvent> {
        self.shared.queue().entries.iter().map(|(_, e)| *e).collect()
    }

    pub fn clear(&self) {
        self.shared.queue().entries.clear();
    }
}

fn deliver_head(shared: &Shared) -> Result<usize> {
    let Some(sink) = shared.sink.as_ref() else {
        return Ok(0);
    };
    let Some((last_seq, batch)) = shared.queue().head_batch() else {
        return Ok(0);
    };
    sink.deliver(&batch)?;
    let removed = shared.queue().acknowledge(last_seq);
    log::debug!("event log delivered {} events", removed);
    Ok(removed)
}
