//! PostgreSQL-backed store.
//!
//! Queries are runtime-checked and bound positionally. Enum fields travel as
//! TEXT labels; rows are mapped by hand so a corrupted label surfaces as
//! `StoreError::Invalid` instead of a silent default.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Farm, FarmSensorSummary, NotificationAttempt, SensorAlert, SensorReading, SensorType,
};
use crate::store::{
    AlertQuery, AlertStore, CreateAlertOutcome, FarmDirectory, ReadingQuery, ReadingStore,
    StoreError,
};

// ---

/// Store implementation over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> PgStore {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---

fn parse_col<T>(row: &PgRow, col: &str) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    // ---
    let raw: String = row.try_get(col)?;
    raw.parse()
        .map_err(|e| StoreError::Invalid(format!("column {col}: {e}")))
}

fn reading_from_row(row: &PgRow) -> Result<SensorReading, StoreError> {
    // ---
    Ok(SensorReading {
        reading_id: row.try_get("reading_id")?,
        farm_id: row.try_get("farm_id")?,
        sensor_type: parse_col(row, "sensor_type")?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        recorded_at: row.try_get("recorded_at")?,
        status: parse_col(row, "status")?,
        notes: row.try_get("notes")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<SensorAlert, StoreError> {
    // ---
    Ok(SensorAlert {
        alert_id: row.try_get("alert_id")?,
        farm_id: row.try_get("farm_id")?,
        sensor_type: parse_col(row, "sensor_type")?,
        opened_at: row.try_get("opened_at")?,
        last_reading_at: row.try_get("last_reading_at")?,
        severity: parse_col(row, "severity")?,
        status: parse_col(row, "status")?,
        triggering_value: row.try_get("triggering_value")?,
        resolved_at: row.try_get("resolved_at")?,
        last_notified_at: row.try_get("last_notified_at")?,
        notification_failed: row.try_get("notification_failed")?,
    })
}

fn attempt_from_row(row: &PgRow) -> Result<NotificationAttempt, StoreError> {
    // ---
    Ok(NotificationAttempt {
        alert_id: row.try_get("alert_id")?,
        channel: parse_col(row, "channel")?,
        attempted_at: row.try_get("attempted_at")?,
        outcome: parse_col(row, "outcome")?,
        error_detail: row.try_get("error_detail")?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<FarmSensorSummary, StoreError> {
    // ---
    Ok(FarmSensorSummary {
        farm_id: row.try_get("farm_id")?,
        sensor_type: parse_col(row, "sensor_type")?,
        avg_value: row.try_get("avg_value")?,
        min_value: row.try_get("min_value")?,
        max_value: row.try_get("max_value")?,
        reading_count: row.try_get("reading_count")?,
        last_value: row.try_get("last_value")?,
        last_status: parse_col(row, "last_status")?,
        last_recorded_at: row.try_get("last_recorded_at")?,
    })
}

fn farm_from_row(row: &PgRow) -> Result<Farm, StoreError> {
    // ---
    Ok(Farm {
        farm_id: row.try_get("farm_id")?,
        name: row.try_get("name")?,
        owner_phone: row.try_get("owner_phone")?,
        owner_email: row.try_get("owner_email")?,
    })
}

const ALERT_COLUMNS: &str = "alert_id, farm_id, sensor_type, opened_at, last_reading_at, \
     severity, status, triggering_value, resolved_at, last_notified_at, notification_failed";

// ---

#[async_trait]
impl ReadingStore for PgStore {
    async fn record(&self, reading: &SensorReading) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO sensor_readings (
                reading_id, farm_id, sensor_type, value, unit,
                recorded_at, status, notes
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(reading.reading_id)
        .bind(reading.farm_id)
        .bind(reading.sensor_type.as_str())
        .bind(reading.value)
        .bind(&reading.unit)
        .bind(reading.recorded_at)
        .bind(reading.status.as_str())
        .bind(&reading.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(&self, query: &ReadingQuery) -> Result<Vec<SensorReading>, StoreError> {
        // ---
        let rows = sqlx::query(
            r#"
            SELECT reading_id, farm_id, sensor_type, value, unit,
                   recorded_at, status, notes
            FROM sensor_readings
            WHERE farm_id = $1
              AND ($2::text IS NULL OR sensor_type = $2)
              AND ($3::timestamptz IS NULL OR recorded_at >= $3)
              AND ($4::timestamptz IS NULL OR recorded_at <= $4)
            ORDER BY recorded_at ASC, reading_id ASC
            LIMIT $5
            "#,
        )
        .bind(query.farm_id)
        .bind(query.sensor_type.map(|s| s.as_str()))
        .bind(query.since)
        .bind(query.until)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reading_from_row).collect()
    }

    async fn refresh_summary(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO farm_sensor_summary (
                farm_id, sensor_type, avg_value, min_value, max_value,
                reading_count, last_value, last_status, last_recorded_at
            )
            SELECT r.farm_id, r.sensor_type,
                   AVG(r.value), MIN(r.value), MAX(r.value), COUNT(*),
                   last.value, last.status, last.recorded_at
            FROM sensor_readings r
            JOIN LATERAL (
                SELECT value, status, recorded_at
                FROM sensor_readings
                WHERE farm_id = $1 AND sensor_type = $2
                ORDER BY recorded_at DESC, reading_id DESC
                LIMIT 1
            ) last ON TRUE
            WHERE r.farm_id = $1 AND r.sensor_type = $2
            GROUP BY r.farm_id, r.sensor_type, last.value, last.status, last.recorded_at
            ON CONFLICT (farm_id, sensor_type) DO UPDATE SET
                avg_value = EXCLUDED.avg_value,
                min_value = EXCLUDED.min_value,
                max_value = EXCLUDED.max_value,
                reading_count = EXCLUDED.reading_count,
                last_value = EXCLUDED.last_value,
                last_status = EXCLUDED.last_status,
                last_recorded_at = EXCLUDED.last_recorded_at
            "#,
        )
        .bind(farm_id)
        .bind(sensor_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn summaries(&self, farm_id: Uuid) -> Result<Vec<FarmSensorSummary>, StoreError> {
        // ---
        let rows = sqlx::query(
            r#"
            SELECT farm_id, sensor_type, avg_value, min_value, max_value,
                   reading_count, last_value, last_status, last_recorded_at
            FROM farm_sensor_summary
            WHERE farm_id = $1
            ORDER BY sensor_type ASC
            "#,
        )
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }
}

// ---

#[async_trait]
impl AlertStore for PgStore {
    async fn find_active(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
    ) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let row = sqlx::query(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM sensor_alerts
            WHERE farm_id = $1 AND sensor_type = $2
              AND status IN ('OPEN', 'ACKNOWLEDGED')
            "#
        ))
        .bind(farm_id)
        .bind(sensor_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn create_alert(&self, alert: &SensorAlert) -> Result<CreateAlertOutcome, StoreError> {
        // ---
        // The conflict target matches the partial unique index predicate, so
        // the insert silently loses to a concurrent writer instead of erroring.
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_alerts (
                alert_id, farm_id, sensor_type, opened_at, last_reading_at,
                severity, status, triggering_value, resolved_at,
                last_notified_at, notification_failed
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (farm_id, sensor_type)
                WHERE status IN ('OPEN', 'ACKNOWLEDGED')
                DO NOTHING
            "#,
        )
        .bind(alert.alert_id)
        .bind(alert.farm_id)
        .bind(alert.sensor_type.as_str())
        .bind(alert.opened_at)
        .bind(alert.last_reading_at)
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(alert.triggering_value)
        .bind(alert.resolved_at)
        .bind(alert.last_notified_at)
        .bind(alert.notification_failed)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(CreateAlertOutcome::Created)
        } else {
            Ok(CreateAlertOutcome::Conflict)
        }
    }

    async fn escalate_alert(
        &self,
        alert_id: Uuid,
        last_reading_at: DateTime<Utc>,
        triggering_value: f64,
    ) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            UPDATE sensor_alerts
            SET last_reading_at = $2, triggering_value = $3
            WHERE alert_id = $1 AND status IN ('OPEN', 'ACKNOWLEDGED')
            "#,
        )
        .bind(alert_id)
        .bind(last_reading_at)
        .bind(triggering_value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_notification(
        &self,
        alert_id: Uuid,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, StoreError> {
        // ---
        let threshold = now - cooldown;
        let result = sqlx::query(
            r#"
            UPDATE sensor_alerts
            SET last_notified_at = $2
            WHERE alert_id = $1
              AND status IN ('OPEN', 'ACKNOWLEDGED')
              AND (last_notified_at IS NULL OR last_notified_at <= $3)
            "#,
        )
        .bind(alert_id)
        .bind(now)
        .bind(threshold)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn resolve_active(
        &self,
        farm_id: Uuid,
        sensor_type: SensorType,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let row = sqlx::query(&format!(
            r#"
            UPDATE sensor_alerts
            SET status = 'RESOLVED', resolved_at = $3
            WHERE farm_id = $1 AND sensor_type = $2
              AND status IN ('OPEN', 'ACKNOWLEDGED')
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(farm_id)
        .bind(sensor_type.as_str())
        .bind(resolved_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let row = sqlx::query(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM sensor_alerts
            WHERE alert_id = $1
            "#
        ))
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn acknowledge_alert(&self, alert_id: Uuid) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let row = sqlx::query(&format!(
            r#"
            UPDATE sensor_alerts
            SET status = 'ACKNOWLEDGED'
            WHERE alert_id = $1 AND status IN ('OPEN', 'ACKNOWLEDGED')
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<SensorAlert>, StoreError> {
        // ---
        let row = sqlx::query(&format!(
            r#"
            UPDATE sensor_alerts
            SET status = 'RESOLVED', resolved_at = $2
            WHERE alert_id = $1 AND status IN ('OPEN', 'ACKNOWLEDGED')
            RETURNING {ALERT_COLUMNS}
            "#
        ))
        .bind(alert_id)
        .bind(resolved_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(alert_from_row).transpose()
    }

    async fn mark_notification_failed(
        &self,
        alert_id: Uuid,
        failed: bool,
    ) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            UPDATE sensor_alerts
            SET notification_failed = $2
            WHERE alert_id = $1
            "#,
        )
        .bind(alert_id)
        .bind(failed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<SensorAlert>, StoreError> {
        // ---
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ALERT_COLUMNS}
            FROM sensor_alerts
            WHERE ($1::uuid IS NULL OR farm_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY opened_at DESC, alert_id ASC
            LIMIT $3
            "#
        ))
        .bind(query.farm_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }

    async fn record_attempt(&self, attempt: &NotificationAttempt) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO notification_attempts (
                alert_id, channel, attempted_at, outcome, error_detail
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(attempt.alert_id)
        .bind(attempt.channel.as_str())
        .bind(attempt.attempted_at)
        .bind(attempt.outcome.as_str())
        .bind(&attempt.error_detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attempts_for(&self, alert_id: Uuid) -> Result<Vec<NotificationAttempt>, StoreError> {
        // ---
        let rows = sqlx::query(
            r#"
            SELECT alert_id, channel, attempted_at, outcome, error_detail
            FROM notification_attempts
            WHERE alert_id = $1
            ORDER BY attempted_at ASC, id ASC
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attempt_from_row).collect()
    }
}

// ---

#[async_trait]
impl FarmDirectory for PgStore {
    async fn get_farm(&self, farm_id: Uuid) -> Result<Option<Farm>, StoreError> {
        // ---
        let row = sqlx::query(
            r#"
            SELECT farm_id, name, owner_phone, owner_email
            FROM farms
            WHERE farm_id = $1
            "#,
        )
        .bind(farm_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(farm_from_row).transpose()
    }

    async fn upsert_farm(&self, farm: &Farm) -> Result<(), StoreError> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO farms (farm_id, name, owner_phone, owner_email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (farm_id) DO UPDATE SET
                name = EXCLUDED.name,
                owner_phone = EXCLUDED.owner_phone,
                owner_email = EXCLUDED.owner_email
            "#,
        )
        .bind(farm.farm_id)
        .bind(&farm.name)
        .bind(&farm.owner_phone)
        .bind(&farm.owner_email)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
