//! Periodic record of cycle results
//!
//! Appends one JSON line per accepted `data` event to a local file, at most
//! one record every [`DEFAULT_RECORD_SPACING`].

use crate::config::{ConfigProvider, Purpose};
use crate::error::Result;
use crate::events::{ControlEvent, DataEvent};
use crate::log_structured_error;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Minimum spacing between two persisted records
pub const DEFAULT_RECORD_SPACING: Duration = Duration::from_secs(5);

/// One persisted cycle result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub timestamp: String,
    pub inner_avg: f64,
    pub outer_avg: f64,
    pub water_avg: f64,
    pub expected_t: f64,
    pub is_boiler_on: bool,
}

impl Record {
    pub fn from_data(data: &DataEvent, digits: u32) -> Result<Self> {
        Ok(Self {
            timestamp: data.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            inner_avg: round(data.tokens.average(Purpose::Inner)?, digits),
            outer_avg: round(data.tokens.average(Purpose::Outer)?, digits),
            water_avg: round(data.tokens.average(Purpose::Water)?, digits),
            expected_t: round(data.expected_t, digits),
            is_boiler_on: data.should_start_boiling,
        })
    }
}

/// Round to `digits` decimal places
pub fn round(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits.min(15) as i32);
    (value * factor).round() / factor
}

/// JSON-lines record file
pub struct RecordLog {
    path: PathBuf,
    provider: Arc<dyn ConfigProvider>,
    spacing: Duration,
    last: Option<DateTime<Utc>>,
}

impl RecordLog {
    pub fn new<P: Into<PathBuf>>(path: P, provider: Arc<dyn ConfigProvider>) -> Self {
        Self {
            path: path.into(),
            provider,
            spacing: DEFAULT_RECORD_SPACING,
            last: None,
        }
    }

    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record unless the previous one is too recent
    ///
    /// Returns whether a record was written.
    pub async fn append(&mut self, data: &DataEvent) -> Result<bool> {
        if let Some(last) = self.last {
            let too_soon = (data.timestamp - last)
                .to_std()
                .map(|elapsed| elapsed < self.spacing)
                .unwrap_or(true);
            if too_soon {
                return Ok(false);
            }
        }

        let digits = self.provider.snapshot().await.round_digits;
        let record = Record::from_data(data, digits)?;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        self.last = Some(data.timestamp);
        debug!(path = %self.path.display(), "Record written");
        Ok(true)
    }

    /// Record events until cancelled or the bus closes
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<ControlEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ControlEvent::Data(data)) => {
                    if let Err(e) = self.append(&data).await {
                        log_structured_error!(e, "records", "append");
                    }
                }
                Ok(ControlEvent::Error(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Record log lagged behind control events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
