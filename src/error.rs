//! API error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

use crate::store::StoreError;
use crate::thresholds::ClassifyError;

// ---

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to API callers.
///
/// Validation variants reject a request before any side effect; not-found
/// variants come from collaborator lookups; `Storage` means the persistence
/// collaborator is unavailable and the caller should resubmit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown sensor type: {0}")]
    UnknownSensorType(String),

    #[error("value {0} is not a finite number")]
    InvalidValue(f64),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unknown farm: {0}")]
    UnknownFarm(Uuid),

    #[error("unknown alert: {0}")]
    UnknownAlert(Uuid),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<ClassifyError> for Error {
    fn from(err: ClassifyError) -> Self {
        // ---
        match err {
            ClassifyError::UnknownSensorType(sensor) => {
                Error::UnknownSensorType(sensor.to_string())
            }
            ClassifyError::InvalidValue(value) => Error::InvalidValue(value),
        }
    }
}

impl Error {
    fn status_code(&self) -> StatusCode {
        // ---
        match self {
            Error::UnknownSensorType(_) | Error::InvalidValue(_) | Error::InvalidParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::UnknownFarm(_) | Error::UnknownAlert(_) => StatusCode::NOT_FOUND,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // ---
        let status = self.status_code();

        // Storage details go to the log, not to the caller.
        let message = match &self {
            Error::Storage(e) => {
                error!("storage failure: {e}");
                "storage unavailable".to_string()
            }
            other => {
                debug!("request rejected: {other}");
                other.to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
