//! Trigger intake and operator actions on events and jobs.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use gantry_core::event::{Event, Job, Trigger};
use gantry_core::{EventId, JobId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;

/// Header carrying `sha256=<hex>` of the request body.
pub const SIGNATURE_HEADER: &str = "x-gantry-signature-256";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", post(receive_trigger))
        .route("/events/{id}/cancel", post(cancel_event))
        .route("/jobs/{id}/activate", post(activate_job))
}

async fn receive_trigger(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Option<Event>>), ApiError> {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, signature) {
            warn!("Rejected trigger with invalid signature");
            return Err(ApiError::Unauthorized("invalid signature".to_string()));
        }
    }

    let trigger: Trigger = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid trigger: {}", e)))?;

    match state.ingestor.materialize(&trigger).await? {
        Some(event) => {
            info!(event_id = %event.id, cause = %event.cause, "Accepted trigger");
            Ok((StatusCode::CREATED, Json(Some(event))))
        }
        None => Ok((StatusCode::OK, Json(None))),
    }
}

async fn cancel_event(
    State(state): State<AppState>,
    Path(id): Path<EventId>,
) -> Result<StatusCode, ApiError> {
    state.dispatcher.cancel_event(id).await?;
    info!(event_id = %id, "Canceled event");
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.dispatcher.activate_job(id).await?))
}

/// Check a `sha256=<hex>` HMAC of `body` keyed by `secret`.
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(sig_hex) = signature.and_then(|s| s.strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

