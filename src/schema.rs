//! Database schema management for `farmwatch`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the append-only `sensor_readings` log, the `sensor_alerts` table
/// with its single-active-per-key partial unique index, the
/// `notification_attempts` audit table, the `farms` directory mirror and the
/// `farm_sensor_summary` aggregate. Safe to call on every startup; no-op if
/// objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Append-only reading log served by `/api/readings`
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            reading_id  UUID PRIMARY KEY,
            farm_id     UUID             NOT NULL,
            sensor_type TEXT             NOT NULL,
            value       DOUBLE PRECISION NOT NULL,
            unit        TEXT             NOT NULL,
            recorded_at TIMESTAMPTZ      NOT NULL,
            status      TEXT             NOT NULL,
            notes       TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Alert lifecycle state per (farm_id, sensor_type)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_alerts (
            alert_id            UUID PRIMARY KEY,
            farm_id             UUID             NOT NULL,
            sensor_type         TEXT             NOT NULL,
            opened_at           TIMESTAMPTZ      NOT NULL,
            last_reading_at     TIMESTAMPTZ      NOT NULL,
            severity            TEXT             NOT NULL,
            status              TEXT             NOT NULL,
            triggering_value    DOUBLE PRECISION NOT NULL,
            resolved_at         TIMESTAMPTZ,
            last_notified_at    TIMESTAMPTZ,
            notification_failed BOOLEAN          NOT NULL DEFAULT FALSE
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // At most one OPEN/ACKNOWLEDGED alert per key; `create_alert` relies on
    // this index as its ON CONFLICT arbiter.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uniq_sensor_alerts_active_key
            ON sensor_alerts (farm_id, sensor_type)
            WHERE status IN ('OPEN', 'ACKNOWLEDGED');
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Append-only notification audit trail
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_attempts (
            id           BIGSERIAL PRIMARY KEY,
            alert_id     UUID        NOT NULL,
            channel      TEXT        NOT NULL,
            attempted_at TIMESTAMPTZ NOT NULL,
            outcome      TEXT        NOT NULL,
            error_detail TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Read-only mirror of the collaborating application's farm records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS farms (
            farm_id     UUID PRIMARY KEY,
            name        TEXT NOT NULL,
            owner_phone TEXT,
            owner_email TEXT
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Summary table for per-sensor aggregations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS farm_sensor_summary (
            farm_id          UUID             NOT NULL,
            sensor_type      TEXT             NOT NULL,
            avg_value        DOUBLE PRECISION NOT NULL,
            min_value        DOUBLE PRECISION NOT NULL,
            max_value        DOUBLE PRECISION NOT NULL,
            reading_count    BIGINT           NOT NULL,
            last_value       DOUBLE PRECISION NOT NULL,
            last_status      TEXT             NOT NULL,
            last_recorded_at TIMESTAMPTZ      NOT NULL,
            PRIMARY KEY (farm_id, sensor_type)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_farm_sensor_time
            ON sensor_readings (farm_id, sensor_type, recorded_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_alerts_farm_opened
            ON sensor_alerts (farm_id, opened_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notification_attempts_alert
            ON notification_attempts (alert_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
