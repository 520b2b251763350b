//! Collaborator interfaces the engine reads from and writes to, plus an
//! in-memory implementation used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{Alert, HabitCheckIn, Resident, VitalSample};

/// Range queries by resident and timestamp lower bound.
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn vitals_since(&self, resident_id: &str, since: DateTime<Utc>) -> Result<Vec<VitalSample>>;

    async fn check_ins_since(
        &self,
        resident_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HabitCheckIn>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> Result<()>;

    async fn alerts_since(
        &self,
        resident_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Alert>>;
}

/// Tracks when each alert key was last emitted.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// True when `alert_key` was emitted at or after `since`.
    async fn seen_since(&self, alert_key: &str, since: DateTime<Utc>) -> Result<bool>;

    async fn record(&self, alert_key: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait ResidentDirectory: Send + Sync {
    async fn resident(&self, resident_id: &str) -> Result<Option<Resident>>;

    /// Full roster, or only residents tagged with `cohort`.
    async fn roster(&self, cohort: Option<&str>) -> Result<Vec<Resident>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    vitals: RwLock<Vec<VitalSample>>,
    check_ins: RwLock<Vec<HabitCheckIn>>,
    alerts: RwLock<Vec<Alert>>,
    dedup: RwLock<HashMap<String, DateTime<Utc>>>,
    residents: RwLock<Vec<Resident>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_vitals(&self, samples: impl IntoIterator<Item = VitalSample>) {
        self.vitals.write().await.extend(samples);
    }

    pub async fn add_check_ins(&self, check_ins: impl IntoIterator<Item = HabitCheckIn>) {
        self.check_ins.write().await.extend(check_ins);
    }

    pub async fn add_residents(&self, residents: impl IntoIterator<Item = Resident>) {
        self.residents.write().await.extend(residents);
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn vitals_since(&self, resident_id: &str, since: DateTime<Utc>) -> Result<Vec<VitalSample>> {
        let mut samples: Vec<VitalSample> = self
            .vitals
            .read()
            .await
            .iter()
            .filter(|s| s.resident_id == resident_id && s.timestamp >= since)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    async fn check_ins_since(
        &self,
        resident_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HabitCheckIn>> {
        let mut check_ins: Vec<HabitCheckIn> = self
            .check_ins
            .read()
            .await
            .iter()
            .filter(|c| c.resident_id == resident_id && c.timestamp >= since)
            .cloned()
            .collect();
        check_ins.sort_by_key(|c| c.timestamp);
        Ok(check_ins)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }

    async fn alerts_since(
        &self,
        resident_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .iter()
            .filter(|a| a.timestamp >= since)
            .filter(|a| resident_id.map_or(true, |id| a.resident_id == id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn seen_since(&self, alert_key: &str, since: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .dedup
            .read()
            .await
            .get(alert_key)
            .is_some_and(|last| *last >= since))
    }

    async fn record(&self, alert_key: &str, at: DateTime<Utc>) -> Result<()> {
        let mut dedup = self.dedup.write().await;
        let entry = dedup.entry(alert_key.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }
}

#[async_trait]
impl ResidentDirectory for MemoryStore {
    async fn resident(&self, resident_id: &str) -> Result<Option<Resident>> {
        Ok(self
            .residents
            .read()
            .await
            .iter()
            .find(|r| r.resident_id == resident_id)
            .cloned())
    }

    async fn roster(&self, cohort: Option<&str>) -> Result<Vec<Resident>> {
        Ok(self
            .residents
            .read()
            .await
            .iter()
            .filter(|r| cohort.map_or(true, |c| r.cohort.as_deref() == Some(c)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[tokio::test]
    async fn vitals_are_filtered_by_resident_and_time() {
        let store = MemoryStore::new();
        let start = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap();
        let sample = |resident: &str, minutes: i64| VitalSample {
            resident_id: resident.to_string(),
            timestamp: start + Duration::minutes(minutes),
            heart_rate: Some(70.0),
            blood_pressure: None,
            temperature: None,
            oxygen_saturation: None,
        };
        store
            .add_vitals(vec![sample("R-1", 30), sample("R-1", 0), sample("R-2", 10), sample("R-1", 90)])
            .await;

        let found = store
            .vitals_since("R-1", start + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].timestamp < found[1].timestamp);
    }

    #[tokio::test]
    async fn dedup_keeps_latest_emission() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2026, 2, 2, 8, 0, 0).unwrap();
        store.record("R-1#vital_signs#warning", at).await.unwrap();
        store
            .record("R-1#vital_signs#warning", at - Duration::minutes(30))
            .await
            .unwrap();

        assert!(store
            .seen_since("R-1#vital_signs#warning", at - Duration::minutes(1))
            .await
            .unwrap());
        assert!(!store
            .seen_since("R-1#vital_signs#critical", at - Duration::minutes(1))
            .await
            .unwrap());
    }
}
