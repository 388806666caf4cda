//! Core types for the HRV relay
//!
//! This module defines the data that flows between the two device roles:
//! computed HRV results on the wearable, the datagram that carries them to the
//! phone, the entry persisted into the health-record store, and the record
//! shapes read back out of that store for the application layer.

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RelayError;

/// Wall-clock format carried alongside the epoch timestamp in each datagram
pub const FORMATTED_TIME_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// HRV computed from one closed measurement window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvResult {
    /// Root mean square of successive differences (ms)
    pub rmssd_ms: f64,
    /// Average heart rate derived from the mean interval (bpm)
    pub avg_heart_rate_bpm: u32,
    /// Number of beat intervals the result was computed from
    pub sample_count: usize,
}

/// Wire representation of an HRV result sent from the wearable to the phone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrvDatagram {
    pub rmssd: f64,
    pub avg_heart_rate: u32,
    /// Capture time, epoch milliseconds
    pub timestamp: i64,
    /// Capture time as `yyyy-MM-dd HH:mm:ss` in the capturing device's zone
    pub formatted_time: String,
}

impl HrvDatagram {
    /// Stamp a result with its capture time
    pub fn from_result<Tz: TimeZone>(result: &HrvResult, captured_at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self {
            rmssd: result.rmssd_ms,
            avg_heart_rate: result.avg_heart_rate_bpm,
            timestamp: captured_at.timestamp_millis(),
            formatted_time: captured_at.format(FORMATTED_TIME_PATTERN).to_string(),
        }
    }

    /// Stamp a result with the current local time
    pub fn captured_now(result: &HrvResult) -> Self {
        Self::from_result(result, &Local::now())
    }
}

/// Fields of an `/hrv_data` datagram the host needs to persist it.
///
/// Unknown and missing extra fields are ignored, so a sender that only
/// carries `rmssd` and `timestamp` is still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct HrvReceipt {
    pub rmssd: f64,
    /// Capture time, epoch milliseconds
    pub timestamp: i64,
}

impl From<&HrvDatagram> for HrvReceipt {
    fn from(datagram: &HrvDatagram) -> Self {
        Self {
            rmssd: datagram.rmssd,
            timestamp: datagram.timestamp,
        }
    }
}

/// Provenance tag attached to entries written by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    ManualEntry,
}

/// HRV entry as persisted into the health-record store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HrvEntry {
    pub time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_offset")]
    pub zone_offset: FixedOffset,
    pub rmssd_ms: f64,
    pub provenance: Provenance,
}

impl HrvEntry {
    /// Build the entry the host persists for a received datagram.
    pub fn from_datagram(datagram: &HrvDatagram) -> Result<Self, RelayError> {
        Self::from_receipt(&HrvReceipt::from(datagram))
    }

    /// Build the entry for a received `rmssd`/`timestamp` pair.
    ///
    /// The zone offset is the host's local offset at receipt time.
    pub fn from_receipt(receipt: &HrvReceipt) -> Result<Self, RelayError> {
        Self::from_receipt_with_offset(receipt, *Local::now().offset())
    }

    fn from_receipt_with_offset(
        receipt: &HrvReceipt,
        zone_offset: FixedOffset,
    ) -> Result<Self, RelayError> {
        if !receipt.rmssd.is_finite() || receipt.rmssd < 0.0 {
            return Err(RelayError::Decode(format!(
                "rmssd must be a non-negative number, got {}",
                receipt.rmssd
            )));
        }

        let time = DateTime::<Utc>::from_timestamp_millis(receipt.timestamp).ok_or_else(|| {
            RelayError::Decode(format!("timestamp out of range: {}", receipt.timestamp))
        })?;

        Ok(Self {
            time,
            zone_offset,
            rmssd_ms: receipt.rmssd,
            provenance: Provenance::ManualEntry,
        })
    }
}

fn serialize_offset<S: serde::Serializer>(offset: &FixedOffset, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(offset)
}

/// HRV point returned to the application layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvSample {
    pub rmssd: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl From<&HrvEntry> for HrvSample {
    fn from(entry: &HrvEntry) -> Self {
        Self {
            rmssd: entry.rmssd_ms,
            timestamp: entry.time.timestamp_millis(),
        }
    }
}

/// Resting heart rate reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingHeartRateRecord {
    pub time: DateTime<Utc>,
    pub bpm: u32,
}

/// Step count accumulated over an interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepsRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub count: u64,
}

/// Single heart-rate sample within a series record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub time: DateTime<Utc>,
    pub bpm: f64,
}

/// Heart-rate series covering an interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub samples: Vec<HeartRateSample>,
}

/// Sleep session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSessionRecord {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl SleepSessionRecord {
    /// Whole minutes between start and end
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Query range over the health-record store, start inclusive and end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, RelayError> {
        if start > end {
            return Err(RelayError::InvalidArguments(format!(
                "startTime {start} is after endTime {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Build a range from optional epoch-millisecond bounds.
    ///
    /// Both bounds are required; a missing bound is a caller error.
    pub fn from_millis(start: Option<i64>, end: Option<i64>) -> Result<Self, RelayError> {
        let (start, end) = match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(RelayError::InvalidArguments(
                    "startTime and endTime are required".to_string(),
                ))
            }
        };

        let to_instant = |millis: i64| {
            DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                RelayError::InvalidArguments(format!("timestamp out of range: {millis}"))
            })
        };

        Self::new(to_instant(start)?, to_instant(end)?)
    }

    /// Range of the given non-negative length ending at `end`
    pub fn trailing(end: DateTime<Utc>, length: chrono::Duration) -> Result<Self, RelayError> {
        if length < chrono::Duration::zero() {
            return Err(RelayError::InvalidArguments(format!(
                "negative range length: {length}"
            )));
        }
        let start = end.checked_sub_signed(length).ok_or_else(|| {
            RelayError::InvalidArguments(format!("range start out of bounds: {end} - {length}"))
        })?;
        Ok(Self { start, end })
    }

    /// Whether an instant falls inside the range
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }

    /// Whether an interval record overlaps the range
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && end > self.start
    }
}

/// Trailing-window aggregate returned to the application layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub steps: u64,
    pub avg_heart_rate: f64,
    pub sleep_minutes: i64,
}
