//! Measurement window
//!
//! Converts sensor readings into beat intervals and accumulates the valid ones
//! while the window is open. Intervals come either straight from the sensor
//! (measured inter-beat spacing) or, as a lower-fidelity fallback, from the
//! reciprocal of the instantaneous rate.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::hrv::HrvCalculator;
use crate::types::HrvResult;

/// Shortest accepted beat interval (200 bpm)
pub const MIN_INTERVAL_MS: f64 = 300.0;

/// Longest accepted beat interval (30 bpm)
pub const MAX_INTERVAL_MS: f64 = 2000.0;

/// One heart-rate data point delivered by the sensor source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Instantaneous heart rate (bpm)
    pub bpm: f64,
    /// Inter-beat interval reported by the sensor, when it provides one (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ibi_ms: Option<f64>,
}

impl SensorReading {
    pub fn from_bpm(bpm: f64) -> Self {
        Self { bpm, ibi_ms: None }
    }

    pub fn with_interval(bpm: f64, ibi_ms: f64) -> Self {
        Self {
            bpm,
            ibi_ms: Some(ibi_ms),
        }
    }

    /// Convert to a beat interval, preferring the measured spacing
    pub fn to_interval(&self) -> Option<BeatInterval> {
        match self.ibi_ms {
            Some(ms) => Some(BeatInterval {
                ms,
                source: IntervalSource::Measured,
            }),
            None if self.bpm > 0.0 => Some(BeatInterval {
                ms: 60_000.0 / self.bpm,
                source: IntervalSource::DerivedFromBpm,
            }),
            None => None,
        }
    }
}

/// Where a beat interval came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalSource {
    /// Inter-beat spacing reported by the sensor
    Measured,
    /// Approximated as `60000 / bpm`
    DerivedFromBpm,
}

/// A beat interval in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatInterval {
    pub ms: f64,
    pub source: IntervalSource,
}

impl BeatInterval {
    /// Inclusive physiological range check
    pub fn is_valid(&self) -> bool {
        (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&self.ms)
    }
}

/// Outcome of offering one reading to the window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    Accepted(BeatInterval),
    Rejected(BeatInterval),
    /// Neither an interval nor a positive rate was present
    NoSignal,
    /// The window is not open
    Closed,
}

/// Ordered beat intervals collected during one measurement window
#[derive(Debug, Default)]
pub struct MeasurementWindow {
    intervals: Vec<f64>,
    open: bool,
    measured: usize,
    derived: usize,
    rejected: usize,
}

impl MeasurementWindow {
    /// Create an open, empty window
    pub fn open() -> Self {
        Self {
            open: true,
            ..Default::default()
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[f64] {
        &self.intervals
    }

    /// Number of readings rejected for falling outside the valid range
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Append a reading in delivery order if it yields a valid interval
    pub fn push(&mut self, reading: SensorReading) -> SampleOutcome {
        if !self.open {
            return SampleOutcome::Closed;
        }

        let Some(interval) = reading.to_interval() else {
            return SampleOutcome::NoSignal;
        };

        match interval.source {
            IntervalSource::Measured => {
                log::debug!("Measured interval {:.0}ms (bpm={})", interval.ms, reading.bpm)
            }
            IntervalSource::DerivedFromBpm => log::debug!(
                "No interval from sensor, derived {:.0}ms from bpm={}",
                interval.ms,
                reading.bpm
            ),
        }

        if !interval.is_valid() {
            self.rejected += 1;
            log::debug!("Interval {:.0}ms outside valid range, skipped", interval.ms);
            return SampleOutcome::Rejected(interval);
        }

        match interval.source {
            IntervalSource::Measured => self.measured += 1,
            IntervalSource::DerivedFromBpm => self.derived += 1,
        }
        self.intervals.push(interval.ms);
        SampleOutcome::Accepted(interval)
    }

    /// Close the window and compute its result; the window is consumed
    pub fn close(mut self) -> Option<HrvResult> {
        self.open = false;

        log::info!(
            "Window closed: {} intervals ({} measured, {} derived, {} rejected)",
            self.intervals.len(),
            self.measured,
            self.derived,
            self.rejected
        );

        let result = HrvCalculator::compute(&self.intervals);
        if result.is_none() {
            log::info!(
                "Insufficient data: {} samples, skipping this cycle",
                self.intervals.len()
            );
        }
        result
    }
}

/// Compute HRV over recorded intervals, dropping any outside the valid range
pub fn compute_recorded(intervals_ms: &[f64]) -> Result<HrvResult, RelayError> {
    let mut window = MeasurementWindow::open();
    for &ms in intervals_ms {
        window.push(SensorReading::with_interval(60_000.0 / ms, ms));
    }
    let kept = window.len();
    window.close().ok_or(RelayError::InsufficientSamples(kept))
}
