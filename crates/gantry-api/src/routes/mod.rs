//! API routes.

pub mod client;
pub mod events;
pub mod health;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/client", client::router())
        .merge(events::router())
        .merge(health::router())
        .with_state(state)
}
