//! Reading log query endpoint.
//!
//! `GET /api/readings` serves the append-only log for one farm,
//! chronologically ascending, with optional sensor-type and time-window
//! filters. Row cap defaults to the store's query limit.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{SensorReading, SensorType};
use crate::store::{ReadingQuery, DEFAULT_QUERY_LIMIT};
use crate::{AppState, Error, Result};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/readings", get(handler))
}

/// Query parameters for the reading log.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadingsParams {
    farm_id: Uuid,
    sensor_type: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

async fn handler(
    State(state): State<AppState>,
    Query(params): Query<ReadingsParams>,
) -> Result<Json<Vec<SensorReading>>> {
    // ---
    debug!("GET /api/readings {:?}", params);

    let sensor_type = params
        .sensor_type
        .map(|s| {
            s.parse::<SensorType>()
                .map_err(|_| Error::UnknownSensorType(s))
        })
        .transpose()?;

    let limit = match params.limit {
        Some(n) if n <= 0 => {
            return Err(Error::InvalidParameter(format!(
                "limit must be positive, got {n}"
            )))
        }
        Some(n) => n.min(DEFAULT_QUERY_LIMIT),
        None => DEFAULT_QUERY_LIMIT,
    };

    let readings = state
        .readings
        .query(&ReadingQuery {
            farm_id: params.farm_id,
            sensor_type,
            since: params.since,
            until: params.until,
            limit,
        })
        .await?;

    Ok(Json(readings))
}
