//! Event router for catalog transactions.
//!
//! Events arrive over HTTP ([`domain::receiver`]), are recorded in the
//! [`event`] queue and dispatched by the [`worker`] through the [`router`].
//! Routes pair a JSONPath [`matcher::Predicate`] with a [`handler`] that
//! moves files through the [`runner`]s.

pub mod config;
pub mod domain;
pub mod event;
pub mod global;
pub mod handler;
pub mod matcher;
pub mod models;
pub mod router;
pub mod runner;
pub mod shutdown;
pub mod state;
pub mod utils;
pub mod worker;

pub use state::AppState;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        domain::receiver::handler::receive_event,
        domain::receiver::handler::get_event_status,
        domain::health::handler::health_check,
    ),
    components(
        schemas(
            domain::receiver::dto::ReceiveAccepted,
            domain::receiver::dto::EventStatusResponse,
            domain::receiver::dto::SuccessReceiveResponse,
            domain::receiver::dto::SuccessEventStatusResponse,
            domain::health::dto::HealthStatus,
            domain::health::dto::HealthState,
            domain::health::dto::QueueDepth,
            event::TaskStatus,
            utils::response::ErrorResponse,
        )
    ),
    tags(
        (name = "Receiver", description = "CloudEvents intake and delivery status"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(domain::health::health_check))
        .route("/receive", post(domain::receiver::receive_event))
        .route("/receive/:event_id", get(domain::receiver::get_event_status))
        .layer(middleware::from_fn(global::middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
