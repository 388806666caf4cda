//! Health-record store
//!
//! The platform record store is external; the relay reads time-ranged records
//! from it and inserts HRV entries into it. Each call is atomic at the store's
//! own granularity and callers take no cross-call locks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::RelayError;
use crate::types::{
    HeartRateRecord, HrvEntry, RestingHeartRateRecord, SleepSessionRecord, StepsRecord,
    TimeRange,
};

/// Time-ranged record store
#[async_trait]
pub trait HealthRecordStore: Send + Sync {
    async fn read_steps(&self, range: &TimeRange) -> Result<Vec<StepsRecord>, RelayError>;

    async fn read_heart_rate(&self, range: &TimeRange)
        -> Result<Vec<HeartRateRecord>, RelayError>;

    async fn read_sleep_sessions(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<SleepSessionRecord>, RelayError>;

    async fn read_resting_heart_rate(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<RestingHeartRateRecord>, RelayError>;

    async fn read_hrv(&self, range: &TimeRange) -> Result<Vec<HrvEntry>, RelayError>;

    async fn insert_hrv(&self, entries: Vec<HrvEntry>) -> Result<(), RelayError>;
}

#[derive(Default)]
struct Records {
    steps: Vec<StepsRecord>,
    heart_rate: Vec<HeartRateRecord>,
    sleep: Vec<SleepSessionRecord>,
    resting_heart_rate: Vec<RestingHeartRateRecord>,
    hrv: Vec<HrvEntry>,
}

/// In-memory store with switchable permissions, for tests and simulation
#[derive(Default)]
pub struct InMemoryHealthStore {
    records: RwLock<Records>,
    deny_reads: AtomicBool,
    deny_writes: AtomicBool,
    accesses: AtomicUsize,
}

impl InMemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_deny_reads(&self, deny: bool) {
        self.deny_reads.store(deny, Ordering::SeqCst);
    }

    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    /// Number of read or write calls made against the store
    pub fn accesses(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub async fn add_steps(&self, record: StepsRecord) {
        self.records.write().await.steps.push(record);
    }

    pub async fn add_heart_rate(&self, record: HeartRateRecord) {
        self.records.write().await.heart_rate.push(record);
    }

    pub async fn add_sleep_session(&self, record: SleepSessionRecord) {
        self.records.write().await.sleep.push(record);
    }

    pub async fn add_resting_heart_rate(&self, record: RestingHeartRateRecord) {
        self.records.write().await.resting_heart_rate.push(record);
    }

    /// All persisted HRV entries in insertion order
    pub async fn hrv_entries(&self) -> Vec<HrvEntry> {
        self.records.read().await.hrv.clone()
    }

    fn check_read(&self) -> Result<(), RelayError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.deny_reads.load(Ordering::SeqCst) {
            return Err(RelayError::PermissionDenied("read access not granted".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HealthRecordStore for InMemoryHealthStore {
    async fn read_steps(&self, range: &TimeRange) -> Result<Vec<StepsRecord>, RelayError> {
        self.check_read()?;
        let records = self.records.read().await;
        Ok(records
            .steps
            .iter()
            .filter(|r| range.overlaps(r.start_time, r.end_time))
            .cloned()
            .collect())
    }

    async fn read_heart_rate(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<HeartRateRecord>, RelayError> {
        self.check_read()?;
        let records = self.records.read().await;
        Ok(records
            .heart_rate
            .iter()
            .filter(|r| range.overlaps(r.start_time, r.end_time))
            .cloned()
            .collect())
    }

    async fn read_sleep_sessions(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<SleepSessionRecord>, RelayError> {
        self.check_read()?;
        let records = self.records.read().await;
        Ok(records
            .sleep
            .iter()
            .filter(|r| range.overlaps(r.start_time, r.end_time))
            .cloned()
            .collect())
    }

    async fn read_resting_heart_rate(
        &self,
        range: &TimeRange,
    ) -> Result<Vec<RestingHeartRateRecord>, RelayError> {
        self.check_read()?;
        let records = self.records.read().await;
        Ok(records
            .resting_heart_rate
            .iter()
            .filter(|r| range.contains(r.time))
            .cloned()
            .collect())
    }

    async fn read_hrv(&self, range: &TimeRange) -> Result<Vec<HrvEntry>, RelayError> {
        self.check_read()?;
        let records = self.records.read().await;
        Ok(records
            .hrv
            .iter()
            .filter(|e| range.contains(e.time))
            .cloned()
            .collect())
    }

    async fn insert_hrv(&self, entries: Vec<HrvEntry>) -> Result<(), RelayError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(RelayError::PermissionDenied(
                "write access to HRV not granted".to_string(),
            ));
        }
        self.records.write().await.hrv.extend(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Provenance;
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn hrv_entry(time: DateTime<Utc>, rmssd: f64) -> HrvEntry {
        HrvEntry {
            time,
            zone_offset: FixedOffset::east_opt(0).unwrap(),
            rmssd_ms: rmssd,
            provenance: Provenance::ManualEntry,
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_hrv_in_range() {
        let store = InMemoryHealthStore::new();
        store
            .insert_hrv(vec![hrv_entry(at(8), 40.0), hrv_entry(at(12), 55.0)])
            .await
            .unwrap();

        let range = TimeRange::new(at(7), at(10)).unwrap();
        let entries = store.read_hrv(&range).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rmssd_ms, 40.0);
    }

    #[tokio::test]
    async fn test_interval_records_overlap() {
        let store = InMemoryHealthStore::new();
        store
            .add_sleep_session(SleepSessionRecord {
                start_time: at(0) - Duration::hours(2),
                end_time: at(6),
            })
            .await;

        let range = TimeRange::new(at(1), at(12)).unwrap();
        assert_eq!(store.read_sleep_sessions(&range).await.unwrap().len(), 1);

        let later = TimeRange::new(at(7), at(12)).unwrap();
        assert!(store.read_sleep_sessions(&later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_denied_write_keeps_store_unchanged() {
        let store = InMemoryHealthStore::new();
        store.set_deny_writes(true);

        let err = store.insert_hrv(vec![hrv_entry(at(8), 40.0)]).await.unwrap_err();
        assert!(matches!(err, RelayError::PermissionDenied(_)));
        assert!(store.hrv_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_access_counter() {
        let store = InMemoryHealthStore::new();
        let range = TimeRange::new(at(0), at(1)).unwrap();
        assert_eq!(store.accesses(), 0);
        store.read_steps(&range).await.unwrap();
        store.set_deny_reads(true);
        assert!(store.read_steps(&range).await.is_err());
        assert_eq!(store.accesses(), 2);
    }
}
