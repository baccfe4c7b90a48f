//! Receiver endpoints
//!
//! `POST /receive` only records the event; routing happens on the worker.

use super::dto::{EventStatusResponse, ReceiveAccepted, SuccessEventStatusResponse, SuccessReceiveResponse};
use super::signature::{verify_signature, SIGNATURE_HEADER};
use crate::event::{Enqueued, Event, ReceiveTask};
use crate::state::AppState;
use crate::utils::{AppError, BaseResponse, ErrorResponse};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Receive a CloudEvents structured-mode event
///
/// The envelope is validated and the event recorded; handlers run later.
#[utoipa::path(
    post,
    path = "/receive",
    tag = "Receiver",
    request_body(content = Object, description = "CloudEvents 1.0 structured JSON", content_type = "application/json"),
    params(
        ("X-Signature-256" = Option<String>, Header, description = "sha256=<hex> HMAC of the body, required when a receiver secret is configured")
    ),
    responses(
        (status = 202, description = "Event recorded", body = SuccessReceiveResponse),
        (status = 400, description = "Body is not a valid event envelope", body = ErrorResponse),
        (status = 401, description = "Missing or invalid signature", body = ErrorResponse)
    )
)]
pub async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<BaseResponse<ReceiveAccepted>>), AppError> {
    if let Some(secret) = state.receiver_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                warn!("Missing {} header", SIGNATURE_HEADER);
                AppError::unauthorized("Missing signature header")
            })?;
        verify_signature(secret, signature, &body)?;
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::MalformedEvent(format!("body is not JSON: {}", e)))?;
    let event = Event::from_payload(payload)?;

    debug!(event_id = %event.id(), event_type = %event.event_type(), source = %event.source(), "Event envelope accepted");

    let enqueued = state.queue.push(ReceiveTask::new(&event)).await?;
    let duplicate = matches!(enqueued, Enqueued::Duplicate(_));

    info!(
        event_id = %event.id(),
        task_id = %enqueued.task_id(),
        duplicate,
        "Event received"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(BaseResponse::accepted(ReceiveAccepted {
            event_id: event.id().to_string(),
            task_id: enqueued.task_id(),
            duplicate,
        })),
    ))
}

/// Bookkeeping status of a received event
#[utoipa::path(
    get,
    path = "/receive/{event_id}",
    tag = "Receiver",
    params(
        ("event_id" = String, Path, description = "CloudEvents id of the event")
    ),
    responses(
        (status = 200, description = "Event found", body = SuccessEventStatusResponse),
        (status = 404, description = "Event was never received", body = ErrorResponse)
    )
)]
pub async fn get_event_status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<BaseResponse<EventStatusResponse>>, AppError> {
    let task = state
        .queue
        .status(&event_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Event '{}' was not received", event_id)))?;

    Ok(Json(BaseResponse::success(EventStatusResponse::from(task))))
}
