//! Bounded event log of stabilizer output with batched export.

mod queue;

pub use queue::{EventLogSettings, EventLogger, LogEvent};
