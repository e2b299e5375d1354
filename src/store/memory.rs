//! In-memory store mirroring the PostgreSQL semantics.
//!
//! Used by the integration tests and for running the engine without a
//! database. Behavior (ordering, conflict handling, cooldown claims) tracks
//! `PgStore` exactly so tests against this store are meaningful.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{
    AlertStatus, Farm, FarmSensorSummary, NotificationAttempt, SensorAlert, SensorReading,
    SensorType,
};
use crate::store::{
    AlertQuery, AlertStore, CreateAlertOutcome, FarmDirectory, ReadingQuery, ReadingStore,
    StoreError,
};

// ---

#[derive(Debug, Default)]
struct Inner {
    readings: Vec<SensorReading>,
    alerts: Vec<SensorAlert>,
    attempts: Vec<NotificationAttempt>,
    farms: HashMap<Uuid, Farm>,
    summaries: HashMap<(Uuid, SensorType), FarmSensorSummary>,
    unavailable: bool,
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Simulate a storage outage: while set, every operation fails with
    /// `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        // ---
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        // ---
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        if inner.unavailable {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(inner)
    }
}

// ---

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn record(&self, reading: &SensorReading) -> Result<(), StoreError> {
        // ---
        self.lock()?.readings.push(reading.clone());
        Ok(())
    }

    async fn query(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>, StoreError> {
        // ---
        let inner = self.lock()?;
        let mut matches: Vec<SensorReading> = inner
            .readings
            .iter()
            .filter(|r| r.farm_id == query.farm_id)
            .filter(|r| query.sensor_type.map_or(true, |s| r.sensor_type == s))
            .filter(|r| query.since.map_or(true, |t| r.recorded_at >= t))
            .filter(|r| query.until.map_or(true, |t| r.recorded_at <= t))
            .cloned()
            .collect();

        matches.sort_by_key(|r| (r.recorded_at, r.reading_id));
        matches.truncate(query.limit.max(0) as usize);
        Ok(matches)
    }

    async fn refresh_summary(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<(), StoreError> {
        // ---
        let mut inner = self.lock()?;
        let rows: Vec<SensorReading> = inner
            .readings
            .iter()
            .filter(|r| r.farm_id == farm_id && r.sensor_type == sensor_type)
            .cloned()
            .collect();

        let Some(last) = rows
            .iter()
            .max_by_key(|r| (r.recorded_at, r.reading_id))
            .cloned()
        else {
            return Ok(());
        };

        let count = rows.len() as i64;
        let sum: f64 = rows.iter().map(|r| r.value).sum();
        let min = rows.iter().map(|r| r.value).fold(f64::INFINITY, f64::min);
        let max = rows
            .iter()
            .map(|r| r.value)
            .fold(f64::NEG_INFINITY, f64::max);

        inner.summaries.insert(
            (farm_id, sensor_type),
            FarmSensorSummary {
                farm_id,
                sensor_type,
                avg_value: sum / count as f64,
                min_value: min,
                max_value: max,
                reading_count: count,
                last_value: last.value,
                last_status: last.status,
                last_recorded_at: last.recorded_at,
            },
        );
        Ok(())
    }

    async fn summaries(&self, farm_id: Uuid) -> Result<Vec<FarmSensorSummary>, StoreError> {
        // ---
        let inner = self.lock()?;
        let mut rows: Vec<FarmSensorSummary> = inner
            .summaries
            .values()
            .filter(|s| s.farm_id == farm_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.sensor_type.as_str());
        Ok(rows)
    }
}

// ---

#[async_trait]
impl AlertStore for MemoryStore {
    async fn find_active(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let inner = self.lock()?;
        Ok(inner
            .alerts
            .iter()
            .find(|a| {
                a.farm_id == farm_id && a.sensor_type == sensor_type && a.status.is_active()
            })
            .cloned())
    }

    async fn create_alert(&self, alert: &SensorAlert) -> Result<CreateAlertOutcome, StoreError> {
        // ---
        let mut inner = self.lock()?;
        let conflicting = inner.alerts.iter().any(|a| {
            a.farm_id == alert.farm_id
                && a.sensor_type == alert.sensor_type
                && a.status.is_active()
        });
        if conflicting {
            return Ok(CreateAlertOutcome::Conflict);
        }
        inner.alerts.push(alert.clone());
        Ok(CreateAlertOutcome::Created)
    }

    async fn escalate_alert(
        &self,
        alert_id: Uuid,
        last_reading_at: DateTime<Utc>,
        triggering_value: f64,
    ) -> Result<(), StoreError> {
        // ---
        let mut inner = self.lock()?;
        if let Some(alert) = inner
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && a.status.is_active())
        {
            alert.last_reading_at = last_reading_at;
            alert.triggering_value = triggering_value;
        }
        Ok(())
    }

    async fn claim_notification(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, StoreError> {
        // ---
        let mut inner = self.lock()?;
        let Some(alert) = inner
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && a.status.is_active())
        else {
            return Ok(false);
        };

        let claimable = match alert.last_notified_at {
            None => true,
            Some(anchor) => anchor <= now - cooldown,
        };
        if claimable {
            alert.last_notified_at = Some(now);
        }
        Ok(claimable)
    }

    async fn resolve_active(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let mut inner = self.lock()?;
        if let Some(alert) = inner.alerts.iter_mut().find(|a| {
            a.farm_id == farm_id && a.sensor_type == sensor_type && a.status.is_active()
        }) {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(resolved_at);
            return Ok(Some(alert.clone()));
        }
        Ok(None)
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let inner = self.lock()?;
        Ok(inner
            .alerts
            .iter()
            .find(|a| a.alert_id == alert_id)
            .cloned())
    }

    async fn acknowledge_alert(&self, alert_id: Uuid) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let mut inner = self.lock()?;
        if let Some(alert) = inner
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && a.status.is_active())
        {
            alert.status = AlertStatus::Acknowledged;
            return Ok(Some(alert.clone()));
        }
        Ok(None)
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let mut inner = self.lock()?;
        if let Some(alert) = inner
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && a.status.is_active())
        {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(resolved_at);
            return Ok(Some(alert.clone()));
        }
        Ok(None)
    }

    async fn mark_notification_failed(
        &self,
        alert_id: Uuid,
        failed: bool,
    ) -> Result<(), StoreError> {
        // ---
        let mut inner = self.lock()?;
        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            alert.notification_failed = failed;
        }
        Ok(())
    }

    async fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<SensorAlert>, StoreError> {
        // ---
        let inner = self.lock()?;
        let mut matches: Vec<SensorAlert> = inner
            .alerts
            .iter()
            .filter(|a| query.farm_id.map_or(true, |f| a.farm_id == f))
            .filter(|a| query.status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();

        matches.sort_by(|a, b| {
            b.opened_at
                .cmp(&a.opened_at)
                .then(a.alert_id.cmp(&b.alert_id))
        });
        matches.truncate(query.limit.max(0) as usize);
        Ok(matches)
    }

    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<(), StoreError> {
        // ---
        self.lock()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for(&self, alert_id: Uuid) -> Result<Vec<NotificationAttempt>, StoreError> {
        // ---
        let inner = self.lock()?;
        Ok(inner
            .attempts
            .iter()
            .filter(|a| a.alert_id == alert_id)
            .cloned()
            .collect())
    }
}

// ---

#[async_trait]
impl FarmDirectory for MemoryStore {
    async fn get_farm(&self, farm_id: Uuid) -> Result<Option<Farm>, StoreError> {
        // ---
        let inner = self.lock()?;
        Ok(inner.farms.get(&farm_id).cloned())
    }

    async fn upsert_farm(&self, farm: &Farm) -> Result<(), StoreError> {
        // ---
        self.lock()?.farms.insert(farm.farm_id, farm.clone());
        Ok(())
    }
}
