use axum::{extract::State, Json};
use tracing::warn;

use super::dto::{HealthState, HealthStatus, QueueDepth};
use crate::state::AppState;

/// Liveness with version, uptime and queue depth
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Server is up", body = HealthStatus)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let counts = async {
        let pending = state.queue.pending_count().await?;
        let processing = state.queue.processing_count().await?;
        Ok::<_, crate::utils::AppError>((pending, processing))
    };

    let (status, queue) = match counts.await {
        Ok((pending, processing)) => (
            HealthState::Healthy,
            QueueDepth {
                pending: Some(pending),
                processing: Some(processing),
                error: None,
            },
        ),
        Err(e) => {
            warn!(error = %e, "Queue depth unavailable");
            (
                HealthState::Degraded,
                QueueDepth {
                    error: Some(e.to_string()),
                    ..QueueDepth::default()
                },
            )
        }
    };

    Json(HealthStatus {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        queue,
    })
}
