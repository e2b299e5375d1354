//! HTTP route gateway (EMBP): the only module that knows the full endpoint
//! map. Siblings each export a subrouter; `main.rs` and the tests only ever
//! see the merged [`Router`].

use axum::Router;

use crate::AppState;

mod alerts;
mod get_readings;
mod health;
mod post_reading;
mod summary;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(post_reading::router())
        .merge(get_readings::router())
        .merge(alerts::router())
        .merge(summary::router())
        .merge(health::router())
        .with_state(state)
}
