use anyhow::{anyhow, Result};
use serde::Serialize;
use std::time::Duration;

use super::LogSink;
use crate::event_log::LogEvent;

/// JSON body posted per flush.
#[derive(Debug, Serialize)]
pub struct LogBatch<'a> {
    pub events: &'a [LogEvent],
}

/// Posts batches as `{"events": [...]}` to an HTTP endpoint.
///
/// Any non-success status or transport error is reported to the caller; the
/// logger keeps the batch queued.
pub struct HttpLogSink {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpLogSink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(anyhow!(
                "log sink endpoint must be an http(s) URL, got '{}'",
                endpoint
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            endpoint: endpoint.to_string(),
            agent,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl LogSink for HttpLogSink {
    fn deliver(&self, events: &[LogEvent]) -> Result<()> {
        let response = self
            .agent
            .post(&self.endpoint)
            .send_json(LogBatch { events })
            .map_err(|e| anyhow!("post to {} failed: {}", self.endpoint, e))?;
        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(anyhow!("log sink {} answered {}", self.endpoint, status));
        }
        Ok(())
    }
}
