//! On-demand query relay
//!
//! Read-only accessors over the health-record store for the application
//! layer. Range bounds are validated before the store is touched.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::store::HealthRecordStore;
use crate::types::{HealthSnapshot, HrvSample, RestingHeartRateRecord, TimeRange};

/// Query front-end over a health-record store
#[derive(Clone)]
pub struct HealthQueries {
    store: Arc<dyn HealthRecordStore>,
    snapshot_window: Option<Duration>,
}

impl HealthQueries {
    pub fn new(store: Arc<dyn HealthRecordStore>, config: &RelayConfig) -> Self {
        let snapshot_window = match config.query.snapshot_window() {
            Ok(window) => Some(window),
            Err(e) => {
                log::warn!("Snapshots disabled: {}", e);
                None
            }
        };
        Self {
            store,
            snapshot_window,
        }
    }

    fn range(start: Option<i64>, end: Option<i64>) -> Result<TimeRange, RelayError> {
        TimeRange::from_millis(start, end).map_err(|e| {
            log::warn!("Rejected query: {}", e);
            e
        })
    }

    /// Resting heart-rate records in `[start, end)`, epoch milliseconds
    pub async fn resting_heart_rate(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<RestingHeartRateRecord>, RelayError> {
        let range = Self::range(start, end)?;
        self.store
            .read_resting_heart_rate(&range)
            .await
            .map_err(|e| {
                log::warn!("Resting heart rate read failed: {}", e);
                e
            })
    }

    /// HRV series in `[start, end)`, epoch milliseconds
    pub async fn heart_rate_variability(
        &self,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<HrvSample>, RelayError> {
        let range = Self::range(start, end)?;
        let entries = self.store.read_hrv(&range).await.map_err(|e| {
            log::warn!("HRV read failed: {}", e);
            e
        })?;
        Ok(entries.iter().map(HrvSample::from).collect())
    }

    /// Sum of step counts over records overlapping the range
    pub async fn steps_total(&self, range: &TimeRange) -> Result<u64, RelayError> {
        let records = self.store.read_steps(range).await?;
        Ok(records.iter().map(|r| r.count).sum())
    }

    /// Mean over every heart-rate sample in range; 0.0 when there are none
    pub async fn average_heart_rate(&self, range: &TimeRange) -> Result<f64, RelayError> {
        let records = self.store.read_heart_rate(range).await?;
        let bpm: Vec<f64> = records
            .iter()
            .flat_map(|r| r.samples.iter().map(|s| s.bpm))
            .collect();

        if bpm.is_empty() {
            return Ok(0.0);
        }
        Ok(bpm.iter().sum::<f64>() / bpm.len() as f64)
    }

    /// Total whole minutes of sleep sessions overlapping the range
    pub async fn sleep_minutes(&self, range: &TimeRange) -> Result<i64, RelayError> {
        let sessions = self.store.read_sleep_sessions(range).await?;
        Ok(sessions.iter().map(|s| s.duration_minutes()).sum())
    }

    /// Aggregate over the trailing snapshot window ending at `now`.
    ///
    /// A metric whose read fails is logged and reported as zero. An unusable
    /// window yields an all-zero snapshot without touching the store.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let range = match self.snapshot_window.map(|w| TimeRange::trailing(now, w)) {
            Some(Ok(range)) => range,
            Some(Err(e)) => {
                log::warn!("Snapshot window unavailable: {}", e);
                return HealthSnapshot::default();
            }
            None => return HealthSnapshot::default(),
        };

        let steps = self.steps_total(&range).await.unwrap_or_else(|e| {
            log::warn!("Snapshot steps unavailable: {}", e);
            0
        });
        let avg_heart_rate = self.average_heart_rate(&range).await.unwrap_or_else(|e| {
            log::warn!("Snapshot heart rate unavailable: {}", e);
            0.0
        });
        let sleep_minutes = self.sleep_minutes(&range).await.unwrap_or_else(|e| {
            log::warn!("Snapshot sleep unavailable: {}", e);
            0
        });

        HealthSnapshot {
            steps,
            avg_heart_rate,
            sleep_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryHealthStore;
    use crate::types::{
        HeartRateRecord, HeartRateSample, HrvEntry, Provenance, SleepSessionRecord, StepsRecord,
    };
    use chrono::{FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn queries(store: &Arc<InMemoryHealthStore>) -> HealthQueries {
        HealthQueries::new(store.clone(), &RelayConfig::default())
    }

    #[tokio::test]
    async fn test_missing_bound_never_touches_store() {
        let store = Arc::new(InMemoryHealthStore::new());
        let q = queries(&store);

        let err = q.resting_heart_rate(Some(0), None).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
        let err = q.heart_rate_variability(None, Some(0)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
        let err = q.heart_rate_variability(Some(10), Some(0)).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");

        assert_eq!(store.accesses(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_distinct() {
        let store = Arc::new(InMemoryHealthStore::new());
        store.set_deny_reads(true);

        let err = queries(&store)
            .resting_heart_rate(Some(0), Some(1_000))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "READ_FAILED");
    }

    #[tokio::test]
    async fn test_hrv_series_as_samples() {
        let store = Arc::new(InMemoryHealthStore::new());
        store
            .insert_hrv(vec![HrvEntry {
                time: at(9),
                zone_offset: FixedOffset::east_opt(9 * 3600).unwrap(),
                rmssd_ms: 37.5,
                provenance: Provenance::ManualEntry,
            }])
            .await
            .unwrap();

        let samples = queries(&store)
            .heart_rate_variability(
                Some(at(0).timestamp_millis()),
                Some(at(12).timestamp_millis()),
            )
            .await
            .unwrap();
        assert_eq!(
            samples,
            vec![HrvSample {
                rmssd: 37.5,
                timestamp: at(9).timestamp_millis(),
            }]
        );
    }

    #[tokio::test]
    async fn test_resting_heart_rate_in_range() {
        let store = Arc::new(InMemoryHealthStore::new());
        store
            .add_resting_heart_rate(RestingHeartRateRecord { time: at(6), bpm: 58 })
            .await;
        store
            .add_resting_heart_rate(RestingHeartRateRecord { time: at(20), bpm: 61 })
            .await;

        let records = queries(&store)
            .resting_heart_rate(Some(at(0).timestamp_millis()), Some(at(12).timestamp_millis()))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].bpm, 58);
    }

    #[tokio::test]
    async fn test_snapshot_aggregates() {
        let store = Arc::new(InMemoryHealthStore::new());
        store
            .add_steps(StepsRecord {
                start_time: at(8),
                end_time: at(9),
                count: 1_200,
            })
            .await;
        store
            .add_steps(StepsRecord {
                start_time: at(14),
                end_time: at(15),
                count: 800,
            })
            .await;
        store
            .add_heart_rate(HeartRateRecord {
                start_time: at(10),
                end_time: at(11),
                samples: vec![
                    HeartRateSample { time: at(10), bpm: 60.0 },
                    HeartRateSample { time: at(10), bpm: 70.0 },
                ],
            })
            .await;
        store
            .add_heart_rate(HeartRateRecord {
                start_time: at(12),
                end_time: at(13),
                samples: vec![HeartRateSample { time: at(12), bpm: 80.0 }],
            })
            .await;
        store
            .add_sleep_session(SleepSessionRecord {
                start_time: at(1),
                end_time: at(1) + Duration::minutes(390),
            })
            .await;

        let snapshot = queries(&store).snapshot(at(23)).await;
        assert_eq!(
            snapshot,
            HealthSnapshot {
                steps: 2_000,
                avg_heart_rate: 70.0,
                sleep_minutes: 390,
            }
        );
    }

    #[tokio::test]
    async fn test_snapshot_empty_store() {
        let store = Arc::new(InMemoryHealthStore::new());
        let snapshot = queries(&store).snapshot(at(23)).await;
        assert_eq!(snapshot.steps, 0);
        assert_eq!(snapshot.avg_heart_rate, 0.0);
        assert_eq!(snapshot.sleep_minutes, 0);
    }

    #[tokio::test]
    async fn test_snapshot_degrades_on_read_failure() {
        let store = Arc::new(InMemoryHealthStore::new());
        store
            .add_steps(StepsRecord {
                start_time: at(8),
                end_time: at(9),
                count: 500,
            })
            .await;
        store.set_deny_reads(true);

        let snapshot = queries(&store).snapshot(at(23)).await;
        assert_eq!(snapshot.steps, 0);
        assert_eq!(store.accesses(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_excludes_older_than_window() {
        let store = Arc::new(InMemoryHealthStore::new());
        store
            .add_steps(StepsRecord {
                start_time: at(0) - Duration::hours(30),
                end_time: at(0) - Duration::hours(29),
                count: 9_999,
            })
            .await;

        assert_eq!(queries(&store).snapshot(at(12)).await.steps, 0);
    }

    #[tokio::test]
    async fn test_snapshot_with_out_of_range_window_is_zero() {
        let store = Arc::new(InMemoryHealthStore::new());
        store
            .add_steps(StepsRecord {
                start_time: at(8),
                end_time: at(9),
                count: 500,
            })
            .await;

        for hours in [3_000_000_000, -24, 0, i64::MAX] {
            let mut config = RelayConfig::default();
            config.query.snapshot_hours = hours;
            let snapshot = HealthQueries::new(store.clone(), &config)
                .snapshot(at(23))
                .await;
            assert_eq!(snapshot, HealthSnapshot::default());
        }
        assert_eq!(store.accesses(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_near_minimum_instant_is_zero() {
        let store = Arc::new(InMemoryHealthStore::new());
        let snapshot = queries(&store).snapshot(DateTime::<Utc>::MIN_UTC).await;
        assert_eq!(snapshot, HealthSnapshot::default());
        assert_eq!(store.accesses(), 0);
    }
}
