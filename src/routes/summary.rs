//! Per-farm sensor summary endpoint for the admin UI.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::models::FarmSensorSummary;
use crate::{AppState, Error, Result};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/api/farms/{farm_id}/summary", get(handler))
}

/// Handle `GET /api/farms/{farm_id}/summary`.
///
/// Returns one rolling aggregate per sensor type the farm has reported,
/// refreshed on every ingestion. An empty farm yields an empty list.
async fn handler(
    State(state): State<AppState>,
    Path(farm_id): Path<Uuid>,
) -> Result<Json<Vec<FarmSensorSummary>>> {
    // ---
    if state.farms.get_farm(farm_id).await?.is_none() {
        return Err(Error::UnknownFarm(farm_id));
    }

    let summaries = state.readings.summaries(farm_id).await?;
    Ok(Json(summaries))
}
