//! Reading ingestion endpoint.
//!
//! `POST /api/readings` runs the synchronous part of the pipeline (classify,
//! farm check, append to the reading log, alert decision) and answers with
//! the classification. Notification delivery is handed to the dispatcher as
//! a spawned task after the alert row is durably written; its outcome never
//! influences the response.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{ReadingStatus, SensorReading, SensorType};
use crate::{AppState, Error, Result};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/readings", post(handler))
}

/// Submission body for one sensor reading.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReading {
    farm_id: Uuid,
    /// Kept as a raw label so an unrecognized type maps to the engine's 400
    /// instead of a generic deserialization rejection.
    sensor_type: String,
    value: f64,
    unit: String,
    notes: Option<String>,
}

/// Synchronous answer to a submission; `alertId` is present only while the
/// reading's key has an active alert.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingAccepted {
    status: ReadingStatus,
    is_critical: bool,
    reading_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert_id: Option<Uuid>,
}

async fn handler(
    State(state): State<AppState>,
    Json(body): Json<SubmitReading>,
) -> Result<Json<ReadingAccepted>> {
    // ---
    let sensor_type: SensorType = body
        .sensor_type
        .parse()
        .map_err(|_| Error::UnknownSensorType(body.sensor_type.clone()))?;

    // Validation first: a rejected submission leaves no trace.
    let classification = state.thresholds.classify(sensor_type, body.value)?;

    let farm = state
        .farms
        .get_farm(body.farm_id)
        .await?
        .ok_or(Error::UnknownFarm(body.farm_id))?;

    let reading = SensorReading {
        reading_id: Uuid::new_v4(),
        farm_id: body.farm_id,
        sensor_type,
        value: body.value,
        unit: body.unit,
        recorded_at: Utc::now(),
        status: classification.status,
        notes: body.notes,
    };

    // The reading lands before the alert decision, so a failed alert write
    // can never silently drop it.
    state.readings.record(&reading).await?;
    debug!(
        "Recorded {} reading {} for farm {} ({})",
        sensor_type, reading.reading_id, reading.farm_id, reading.status
    );

    if let Err(e) = state
        .readings
        .refresh_summary(reading.farm_id, sensor_type)
        .await
    {
        warn!("Summary refresh failed for farm {}: {e}", reading.farm_id);
    }

    let decision = state.manager.on_reading(&reading).await?;

    if let Some((alert, event)) = decision.notification() {
        state.dispatcher.notify(&farm, alert, event).await;
    }

    Ok(Json(ReadingAccepted {
        status: classification.status,
        is_critical: classification.is_critical,
        reading_id: reading.reading_id,
        alert_id: decision.active_alert_id(),
    }))
}
