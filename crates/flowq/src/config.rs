use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::error::{QueueError, QueueResult};

/// Upper bound on expired records surfaced by a single poll call. Any
/// remainder stays at the head of the queue for the next poll.
pub const MAX_EXPIRED_RECORDS_PER_ITERATION: usize = 100_000;

/// Number of records persisted per swap file, and the granularity at which
/// the staging buffer is flushed to disk.
pub const SWAP_RECORD_BATCH_SIZE: usize = 10_000;

/// Default number of records held in memory before staging begins.
pub const DEFAULT_SWAP_THRESHOLD: usize = 20_000;

/// Default object-count backpressure threshold (0 = unbounded).
const DEFAULT_BACKPRESSURE_OBJECT_THRESHOLD: u64 = 0;

/// Default data-size backpressure expression (0 = unbounded).
const DEFAULT_BACKPRESSURE_DATA_SIZE: &str = "0 MB";

/// Default expiration expression (0 = never expire).
const DEFAULT_EXPIRATION_PERIOD: &str = "0 mins";

/// Logical identifier for a flow file.
///
/// Flow file IDs are assigned by the host engine and are unique and
/// monotonically increasing within a repository generation. The queue uses
/// them as the final FIFO tiebreak in its ordering and reports the maximum
/// recovered ID after a restart so the host can reseed its generator.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FlowFileId(pub u64);

impl FlowFileId {
    /// Creates a new flow file ID from a raw u64 value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the flow file ID as a u64.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for FlowFileId {
    #[inline]
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<FlowFileId> for u64 {
    #[inline]
    fn from(value: FlowFileId) -> Self {
        value.0
    }
}

impl Display for FlowFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Policy applied when a swap file fails validation while being swapped
/// back in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptSwapPolicy {
    /// Drop the location from the replay list and keep the queue live.
    /// The loss is logged and reported.
    #[default]
    Discard,
    /// Rotate the location to the back of the replay list so the rest of
    /// the backlog stays reachable; the file is retried later.
    Retain,
}

/// Construction-time configuration for a flow file queue.
///
/// Backpressure thresholds and the expiration period can be changed after
/// construction through the queue's setters; the identifier and swap
/// threshold are fixed for the queue's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Stable identifier of the queue, used in swap file layout, logging
    /// and provenance events.
    pub identifier: String,

    /// Maximum number of visible objects before the queue reports full.
    /// Zero disables the count dimension.
    pub backpressure_object_threshold: u64,

    /// Maximum visible data size before the queue reports full, as an
    /// expression such as `"1 GB"`. `"0 MB"` disables the size dimension.
    pub backpressure_data_size: String,

    /// How long a record may sit in the queue before it expires, as an
    /// expression such as `"5 mins"`. `"0 mins"` disables expiration.
    pub expiration_period: String,

    /// Number of records kept in the in-memory heap before new arrivals
    /// are staged for swap-out.
    pub swap_threshold: usize,

    /// What to do with a swap file that fails validation on swap-in.
    pub corrupt_swap_policy: CorruptSwapPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            backpressure_object_threshold: DEFAULT_BACKPRESSURE_OBJECT_THRESHOLD,
            backpressure_data_size: DEFAULT_BACKPRESSURE_DATA_SIZE.to_string(),
            expiration_period: DEFAULT_EXPIRATION_PERIOD.to_string(),
            swap_threshold: DEFAULT_SWAP_THRESHOLD,
            corrupt_swap_policy: CorruptSwapPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Convenience constructor for a queue with default thresholds.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration, returning the parsed byte and
    /// millisecond values for the expression fields.
    pub(crate) fn validated(&self) -> QueueResult<(u64, u64)> {
        if self.identifier.is_empty() {
            return Err(QueueError::invalid_config("queue identifier is empty"));
        }
        if self.swap_threshold == 0 {
            return Err(QueueError::invalid_config("swap threshold must be positive"));
        }
        let max_bytes = parse_data_size(&self.backpressure_data_size)?;
        let expiration_ms = parse_duration_millis(&self.expiration_period)?;
        Ok((max_bytes, expiration_ms))
    }
}

impl Display for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueConfig(identifier={}, backpressure_object_threshold={}, backpressure_data_size={}, expiration_period={}, swap_threshold={}, corrupt_swap_policy={:?})",
            self.identifier,
            self.backpressure_object_threshold,
            self.backpressure_data_size,
            self.expiration_period,
            self.swap_threshold,
            self.corrupt_swap_policy
        )
    }
}

/// Parses a data-size expression such as `"1 GB"` or `"512 KB"` into bytes.
///
/// Units are binary (1 KB = 1024 B) and case-insensitive; fractional values
/// are accepted. A bare number is taken as bytes.
pub fn parse_data_size(expression: &str) -> QueueResult<u64> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(QueueError::invalid_config("data size expression is empty"));
    }

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| QueueError::invalid_config(format!("invalid data size: {expression}")))?;
    if value < 0.0 {
        return Err(QueueError::invalid_config(format!(
            "data size must not be negative: {expression}"
        )));
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        other => {
            return Err(QueueError::invalid_config(format!(
                "unknown data size unit: {other}"
            )));
        }
    };

    Ok((value * multiplier as f64) as u64)
}

/// Parses a duration expression such as `"5 mins"` or `"30 sec"` into
/// milliseconds. Negative durations are rejected.
pub fn parse_duration_millis(expression: &str) -> QueueResult<u64> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(QueueError::invalid_config("duration expression is empty"));
    }

    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| QueueError::invalid_config(format!("invalid duration: {expression}")))?;
    if value < 0.0 {
        return Err(QueueError::invalid_config(format!(
            "duration must not be negative: {expression}"
        )));
    }

    let millis_per_unit: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" | "milli" | "millis" => 1.0,
        "s" | "sec" | "secs" | "second" | "seconds" => 1_000.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60_000.0,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600_000.0,
        "d" | "day" | "days" => 86_400_000.0,
        other => {
            return Err(QueueError::invalid_config(format!(
                "unknown duration unit: {other}"
            )));
        }
    };

    Ok((value * millis_per_unit) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let cfg = QueueConfig::new("queue-1");
        assert_eq!(cfg.backpressure_object_threshold, 0);
        assert_eq!(cfg.swap_threshold, DEFAULT_SWAP_THRESHOLD);
        let (max_bytes, expiration_ms) = cfg.validated().expect("valid defaults");
        assert_eq!(max_bytes, 0);
        assert_eq!(expiration_ms, 0);
    }

    #[test]
    fn empty_identifier_rejected() {
        let cfg = QueueConfig::default();
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn data_size_expressions() {
        assert_eq!(parse_data_size("0 MB").unwrap(), 0);
        assert_eq!(parse_data_size("1 GB").unwrap(), 1 << 30);
        assert_eq!(parse_data_size("512kb").unwrap(), 512 << 10);
        assert_eq!(parse_data_size("1.5 KB").unwrap(), 1536);
        assert_eq!(parse_data_size("77").unwrap(), 77);
        assert!(parse_data_size("10 lightyears").is_err());
        assert!(parse_data_size("-1 MB").is_err());
    }

    #[test]
    fn duration_expressions() {
        assert_eq!(parse_duration_millis("0 mins").unwrap(), 0);
        assert_eq!(parse_duration_millis("5 mins").unwrap(), 300_000);
        assert_eq!(parse_duration_millis("100 ms").unwrap(), 100);
        assert_eq!(parse_duration_millis("2h").unwrap(), 7_200_000);
        assert!(parse_duration_millis("-5 mins").is_err());
        assert!(parse_duration_millis("5 fortnights").is_err());
    }

    #[test]
    fn serde_round_trip() {
        let cfg = QueueConfig::new("queue-7");
        let json = serde_json::to_string(&cfg).expect("serialize");
        let decoded: QueueConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(cfg, decoded);
    }
}
