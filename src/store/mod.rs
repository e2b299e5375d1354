//! Persistence seam for readings, alerts, and the farm directory.
//!
//! The engine talks to storage through these traits so the alerting logic can
//! run against PostgreSQL in production and an in-memory store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{
    AlertStatus, Farm, FarmSensorSummary, NotificationAttempt, SensorAlert, SensorReading,
    SensorType,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Default row cap for list queries.
pub const DEFAULT_QUERY_LIMIT: i64 = 1000;

/// Failures reported by the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored data: {0}")]
    Invalid(String),
}

/// Filter for the reading log. `farm_id` is required; everything else narrows.
#[derive(Debug, Clone)]
pub struct ReadingQuery {
    pub farm_id: Uuid,
    pub sensor_type: Option<SensorType>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl ReadingQuery {
    pub fn for_farm(farm_id: Uuid) -> ReadingQuery {
        // ---
        ReadingQuery {
            farm_id,
            sensor_type: None,
            since: None,
            until: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

/// Filter for the alert table. Results are ordered by `opened_at` descending.
#[derive(Debug, Clone)]
pub struct AlertQuery {
    pub farm_id: Option<Uuid>,
    pub status: Option<AlertStatus>,
    pub limit: i64,
}

impl Default for AlertQuery {
    fn default() -> Self {
        // ---
        AlertQuery {
            farm_id: None,
            status: None,
            limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

/// Result of inserting a new alert against the single-active-per-key index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateAlertOutcome {
    /// The row was inserted; this process owns the new alert.
    Created,
    /// Another writer already holds an active alert for the key.
    Conflict,
}

// ---

/// Append-only reading log plus the per-(farm, sensor) rolling aggregates.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one classified reading. Never rejects based on classification
    /// and never deduplicates.
    async fn record(&self, reading: &SensorReading) -> Result<(), StoreError>;

    /// Readings matching the filter, chronologically ascending.
    async fn query(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>, StoreError>;

    /// Recompute the rolling aggregate for one (farm, sensor) pair.
    async fn refresh_summary(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<(), StoreError>;

    /// All aggregates for a farm, one per sensor type seen.
    async fn summaries(&self, farm_id: Uuid) -> Result<Vec<FarmSensorSummary>, StoreError>;
}

/// Alert lifecycle state and the notification audit trail.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// The OPEN or ACKNOWLEDGED alert for a key, if one exists.
    async fn find_active(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Option<SensorAlert>, StoreError>;

    /// Insert a new alert. Reports `Conflict` instead of failing when the
    /// single-active-per-key constraint already holds for another row.
    async fn create_alert(&self, alert: &SensorAlert) -> Result<CreateAlertOutcome, StoreError>;

    /// Escalation update: bump `last_reading_at` and `triggering_value` on an
    /// active alert. Status is left untouched.
    async fn escalate_alert(
        &self,
        alert_id: Uuid,
        last_reading_at: DateTime<Utc>,
        triggering_value: f64,
    ) -> Result<(), StoreError>;

    /// Atomically claim the right to notify for an alert: succeeds only when
    /// the cooldown has elapsed since `last_notified_at` (or none was ever
    /// claimed), advancing the anchor to `now` in the same step. Concurrent
    /// claimants see at most one success per window.
    async fn claim_notification(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, StoreError>;

    /// Resolve whichever alert is active for a key. Returns the resolved
    /// alert, or `None` when the key had no active alert.
    async fn resolve_active(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SensorAlert>, StoreError>;

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<SensorAlert>, StoreError>;

    /// OPEN -> ACKNOWLEDGED (idempotent for an already acknowledged alert).
    /// Returns `None` when the alert is absent or RESOLVED.
    async fn acknowledge_alert(&self, alert_id: Uuid) -> Result<Option<SensorAlert>, StoreError>;

    /// OPEN/ACKNOWLEDGED -> RESOLVED. Returns `None` when the alert is
    /// absent or already RESOLVED.
    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SensorAlert>, StoreError>;

    /// Flip the delivery-exhausted flag on an alert record.
    async fn mark_notification_failed(
        &self,
        alert_id: Uuid,
        failed: bool,
    ) -> Result<(), StoreError>;

    /// Alerts matching the filter, ordered by `opened_at` descending.
    async fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<SensorAlert>, StoreError>;

    /// Append one row to the notification audit trail.
    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<(), StoreError>;

    /// Audit trail for one alert, in attempt order.
    async fn attempts_for(&self, alert_id: Uuid) -> Result<Vec<NotificationAttempt>, StoreError>;
}

/// Read-mostly mirror of the collaborating application's farm records.
#[async_trait]
pub trait FarmDirectory: Send + Sync {
    async fn get_farm(&self, farm_id: Uuid) -> Result<Option<Farm>, StoreError>;

    /// Sync entry point for the mirror (and test seeding).
    async fn upsert_farm(&self, farm: &Farm) -> Result<(), StoreError>;
}
