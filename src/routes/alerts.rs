//! Alert query and operator-action endpoints.
//!
//! `GET /api/alerts` lists alerts newest-opened first, filterable by farm
//! and lifecycle status. The operator actions are the external seam of the
//! alert state machine: acknowledge marks an OPEN alert as seen, resolve
//! closes it and frees its (farm, sensor) key. The attempts endpoint exposes
//! the append-only notification audit trail for one alert.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{AlertStatus, NotificationAttempt, SensorAlert};
use crate::store::{AlertQuery, DEFAULT_QUERY_LIMIT};
use crate::{AppState, Error, Result};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/alerts", get(list))
        .route("/api/alerts/{alert_id}/acknowledge", post(acknowledge))
        .route("/api/alerts/{alert_id}/resolve", post(resolve))
        .route("/api/alerts/{alert_id}/attempts", get(attempts))
}

/// Query parameters for the alert list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertsParams {
    farm_id: Option<Uuid>,
    status: Option<String>,
    limit: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<AlertsParams>,
) -> Result<Json<Vec<SensorAlert>>> {
    // ---
    debug!("GET /api/alerts {:?}", params);

    let status = params
        .status
        .map(|s| {
            s.parse::<AlertStatus>()
                .map_err(|_| Error::InvalidParameter(format!("unknown alert status: {s}")))
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

    let alerts = state
        .alerts
        .query_alerts(&AlertQuery {
            farm_id: params.farm_id,
            status,
            limit,
        })
        .await?;

    Ok(Json(alerts))
}

async fn acknowledge(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<SensorAlert>> {
    // ---
    let alert = state
        .alerts
        .acknowledge_alert(alert_id)
        .await?
        .ok_or(Error::UnknownAlert(alert_id))?;

    info!("Alert {} acknowledged by operator", alert_id);
    Ok(Json(alert))
}

async fn resolve(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<SensorAlert>> {
    // ---
    let alert = state
        .alerts
        .resolve_alert(alert_id, Utc::now())
        .await?
        .ok_or(Error::UnknownAlert(alert_id))?;

    info!("Alert {} resolved by operator", alert_id);
    Ok(Json(alert))
}

async fn attempts(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Vec<NotificationAttempt>>> {
    // ---
    if state.alerts.get_alert(alert_id).await?.is_none() {
        return Err(Error::UnknownAlert(alert_id));
    }

    let attempts = state.alerts.attempts_for(alert_id).await?;
    Ok(Json(attempts))
}
