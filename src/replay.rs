//! Flow-file replay
//!
//! A flow file holds one message per line:
//! `<timestamp><delimiter><topic><delimiter><payload>`. The payload is the
//! rest of the line and may contain the delimiter. Lines with fewer than
//! three columns are skipped.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use tokio::time::Instant;

use crate::broker::{BrokerClient, OutgoingMessage, QoS};
use crate::{Error, Result};

/// Default column separator
pub const DEFAULT_DELIMITER: &str = " ";

/// One recorded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    /// Time since the first entry of the file
    pub offset: Duration,
    /// Destination topic
    pub topic: String,
    /// Payload, sent verbatim
    pub payload: String,
}

/// Replay parameters
#[derive(Debug, Clone, Copy)]
pub struct ReplayOptions {
    /// Reproduce the recorded spacing between messages
    pub time_representative: bool,
    /// QoS of replayed publications
    pub qos: QoS,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            time_representative: true,
            qos: QoS::AtLeastOnce,
        }
    }
}

/// Parse a flow file
///
/// # Errors
///
/// Returns `Replay` naming the line whose timestamp cannot be read
pub fn parse_flow(text: &str, delimiter: &str) -> Result<Vec<FlowEntry>> {
    if delimiter.is_empty() {
        return Err(Error::Replay("delimiter must not be empty".to_string()));
    }

    let mut first: Option<f64> = None;
    let mut entries = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let mut columns = line.trim().splitn(3, delimiter);
        let (Some(stamp), Some(topic), Some(payload)) =
            (columns.next(), columns.next(), columns.next())
        else {
            continue;
        };

        let line_no = number + 1;
        let seconds = parse_timestamp(stamp).ok_or_else(|| {
            Error::Replay(format!("line {line_no}: invalid timestamp \"{stamp}\""))
        })?;
        let origin = *first.get_or_insert(seconds);
        let offset = Duration::try_from_secs_f64((seconds - origin).max(0.0))
            .map_err(|_| Error::Replay(format!("line {line_no}: timestamp out of range")))?;

        entries.push(FlowEntry {
            offset,
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    tracing::debug!(entries = entries.len(), "flow parsed");
    Ok(entries)
}

/// Read and parse a flow file
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_flow(path: &Path, delimiter: &str) -> Result<Vec<FlowEntry>> {
    if !path.exists() {
        return Err(Error::Replay(format!(
            "file {} does not exist",
            path.display()
        )));
    }
    let text = std::fs::read_to_string(path)?;
    parse_flow(&text, delimiter)
}

/// Timestamp as fractional seconds since the Unix epoch
fn parse_timestamp(stamp: &str) -> Option<f64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
        return Some(epoch_seconds(dt.timestamp(), dt.timestamp_subsec_micros()));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d_%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(stamp, format) {
            let utc = dt.and_utc();
            return Some(epoch_seconds(utc.timestamp(), utc.timestamp_subsec_micros()));
        }
    }
    stamp.parse::<f64>().ok().filter(|s| s.is_finite())
}

#[allow(clippy::cast_precision_loss)]
fn epoch_seconds(secs: i64, micros: u32) -> f64 {
    secs as f64 + f64::from(micros) / 1_000_000.0
}

/// Publish every entry in order
///
/// Returns the number of messages published.
///
/// # Errors
///
/// Returns the first broker failure
pub async fn replay<B: BrokerClient + ?Sized>(
    entries: &[FlowEntry],
    broker: &B,
    options: ReplayOptions,
) -> Result<usize> {
    let start = Instant::now();

    for entry in entries {
        if options.time_representative {
            tokio::time::sleep_until(start + entry.offset).await;
        }

        tracing::info!("{:.3} {} {}", entry.offset.as_secs_f64(), entry.topic, entry.payload);
        broker
            .publish(OutgoingMessage {
                topic: entry.topic.clone(),
                payload: entry.payload.as_bytes().to_vec(),
                qos: options.qos,
                retain: false,
            })
            .await?;
    }

    Ok(entries.len())
}
