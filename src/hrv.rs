//! HRV computation
//!
//! Time-domain statistics over an ordered sequence of beat intervals:
//! - RMSSD (root mean square of successive differences)
//! - Average heart rate from the mean interval
//!
//! Input order is the temporal order of beats and must be preserved by the caller.

use crate::types::HrvResult;

/// A window must hold strictly more than this many intervals to produce a result
pub const MIN_SAMPLES_EXCLUSIVE: usize = 2;

/// HRV calculator for closed measurement windows
pub struct HrvCalculator;

impl HrvCalculator {
    /// Compute an HRV result, or `None` when the window holds too few intervals
    pub fn compute(intervals_ms: &[f64]) -> Option<HrvResult> {
        if intervals_ms.len() <= MIN_SAMPLES_EXCLUSIVE {
            return None;
        }

        Some(HrvResult {
            rmssd_ms: rmssd(intervals_ms)?,
            avg_heart_rate_bpm: average_heart_rate(intervals_ms)?,
            sample_count: intervals_ms.len(),
        })
    }
}

/// RMSSD over successive differences: `sqrt(sum(d_k^2) / (n - 1))`
///
/// Returns `None` for fewer than two intervals.
pub fn rmssd(intervals_ms: &[f64]) -> Option<f64> {
    if intervals_ms.len() < 2 {
        return None;
    }

    let sum_squared: f64 = intervals_ms
        .windows(2)
        .map(|pair| {
            let diff = pair[1] - pair[0];
            diff * diff
        })
        .sum();

    Some((sum_squared / (intervals_ms.len() - 1) as f64).sqrt())
}

/// Average heart rate as `round(60000 / mean_interval)`.
///
/// This is the reciprocal of the mean interval, not the mean of instantaneous
/// rates. Returns `None` for an empty sequence.
pub fn average_heart_rate(intervals_ms: &[f64]) -> Option<u32> {
    let mean = mean_interval(intervals_ms)?;
    if mean <= 0.0 {
        return None;
    }
    Some((60_000.0 / mean).round() as u32)
}

/// Arithmetic mean of the intervals
pub fn mean_interval(intervals_ms: &[f64]) -> Option<f64> {
    if intervals_ms.is_empty() {
        return None;
    }
    let sum: f64 = intervals_ms.iter().sum();
    Some(sum / intervals_ms.len() as f64)
}
