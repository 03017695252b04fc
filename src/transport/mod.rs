//! Delivery of exported event batches.

mod http;

pub use http::{HttpLogSink, LogBatch};

use anyhow::Result;

use crate::event_log::LogEvent;

/// Destination for event log batches. One call per flush.
pub trait LogSink: Send + Sync {
    fn deliver(&self, events: &[LogEvent]) -> Result<()>;
}
