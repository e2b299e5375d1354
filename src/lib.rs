//! Sensor threshold monitoring and alerting engine for farm telemetry.
//!
//! The engine accepts sensor readings from the collaborating record-keeping
//! application, classifies each one against a configurable threshold table,
//! appends it to the reading log, drives the per-(farm, sensor) alert state
//! machine, and dispatches notifications asynchronously with retry and
//! channel fallback.
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): `routes` is
//! the single HTTP gateway, `store` the single persistence seam, and this
//! crate root owns the shared [`AppState`] so the siblings only need to know
//! their parent.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

pub mod alerts;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod store;
pub mod thresholds;

pub use config::Config;
pub use error::{Error, Result};

use alerts::AlertManager;
use dispatch::{Dispatcher, EmailChannel, NotifyChannel, RetryPolicy, SmsChannel};
use store::{AlertStore, FarmDirectory, ReadingStore};
use thresholds::ThresholdTable;

// ---

/// Shared application state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub readings: Arc<dyn ReadingStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub farms: Arc<dyn FarmDirectory>,
    pub thresholds: Arc<ThresholdTable>,
    pub manager: Arc<AlertManager>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Wire the engine from one backing store and the loaded configuration.
    ///
    /// The store serves as reading log, alert store, and farm directory at
    /// once (both `PgStore` and `MemoryStore` implement all three seams).
    pub fn from_config<S>(store: Arc<S>, thresholds: ThresholdTable, cfg: &Config) -> AppState
    where
        S: ReadingStore + AlertStore + FarmDirectory + 'static,
    {
        // ---
        let readings: Arc<dyn ReadingStore> = store.clone();
        let alerts: Arc<dyn AlertStore> = store.clone();
        let farms: Arc<dyn FarmDirectory> = store;

        let manager = Arc::new(AlertManager::new(
            Arc::clone(&alerts),
            Duration::seconds(i64::from(cfg.alert_cooldown_secs)),
            cfg.auto_resolve,
        ));

        // SMS first, EMAIL as fallback; unset gateway URLs disable a channel.
        let channels: Vec<Arc<dyn NotifyChannel>> = vec![
            Arc::new(SmsChannel::new(cfg.sms_gateway_url.clone())),
            Arc::new(EmailChannel::new(cfg.email_gateway_url.clone())),
        ];
        let retry = RetryPolicy {
            max_attempts: cfg.notify_max_attempts,
            ..RetryPolicy::default()
        };
        let dispatcher = Arc::new(Dispatcher::new(
            channels,
            Arc::clone(&alerts),
            retry,
            StdDuration::from_secs(u64::from(cfg.notify_timeout_secs)),
            cfg.admin_phone.clone(),
            cfg.admin_email.clone(),
        ));

        AppState {
            readings,
            alerts,
            farms,
            thresholds: Arc::new(thresholds),
            manager,
            dispatcher,
        }
    }
}
