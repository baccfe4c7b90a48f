use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use super::response::ErrorResponse;

/// Failures of the routing and file pipeline core.
///
/// None of these are retried or swallowed by the router or the pipeline;
/// they propagate unchanged to whoever invoked `dispatch`/`handle`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The payload cannot be adapted to the transaction data model.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A file could not be retrieved into the download area.
    #[error("failed to download '{path}': {reason}")]
    DownloadFailure { path: String, reason: String },

    /// A downloaded file could not be read or transformed.
    #[error("failed to transform '{path}': {reason}")]
    TransformFailure { path: String, reason: String },

    /// Bundling or submission failed; nothing was persisted.
    #[error("upload failed: {0}")]
    UploadFailure(String),

    /// A route predicate could not be loaded or parsed.
    #[error("invalid route predicate in {source_name} at offset {offset}: {reason}")]
    RoutingConfiguration {
        source_name: String,
        offset: usize,
        reason: String,
    },

    /// A scoped scratch directory could not be created.
    #[error("scratch space unavailable: {0}")]
    ScratchSpace(String),
}

/// Result type for core operations
pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        DispatchError::MalformedEvent(msg.into())
    }

    pub fn download(path: impl Into<String>, reason: impl ToString) -> Self {
        DispatchError::DownloadFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transform(path: impl Into<String>, reason: impl ToString) -> Self {
        DispatchError::TransformFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(reason: impl ToString) -> Self {
        DispatchError::UploadFailure(reason.to_string())
    }

    pub fn routing(source_name: impl Into<String>, offset: usize, reason: impl Into<String>) -> Self {
        DispatchError::RoutingConfiguration {
            source_name: source_name.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Whether running the same event again could succeed.
    ///
    /// A malformed payload or a broken route stays broken, so the queue
    /// dead-letters those immediately.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DispatchError::MalformedEvent(_) | DispatchError::RoutingConfiguration { .. }
        )
    }
}

/// HTTP-facing error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InternalError(String),
    #[error("{0}")]
    JsonParseFailed(String),
    #[error("{0}")]
    MalformedEvent(String),
}

impl AppError {
    /// Error message returned to the client
    pub fn message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Unauthorized(msg) => msg.clone(),
            AppError::InternalError(msg) => msg.clone(),
            AppError::JsonParseFailed(msg) => format!("Invalid request body: {}", msg),
            AppError::MalformedEvent(msg) => format!("Malformed event: {}", msg),
        }
    }

    /// Error code returned to the client
    pub fn error_code(&self) -> String {
        match self {
            AppError::BadRequest(_) => "COMMON400",
            AppError::NotFound(_) => "EVENT404",
            AppError::Unauthorized(_) => "EVENT401",
            AppError::InternalError(_) => "COMMON500",
            AppError::JsonParseFailed(_) => "COMMON400",
            AppError::MalformedEvent(_) => "EVENT400",
        }
        .to_string()
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::JsonParseFailed(_) => StatusCode::BAD_REQUEST,
            AppError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        AppError::InternalError(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.message();

        match &self {
            AppError::InternalError(_) => {
                error!("Internal Server Error: {}", message);
            }
            _ => {
                error!("Error [{}]: {}", error_code, message);
            }
        }

        let error_response = ErrorResponse::new(error_code, message);

        (status, Json(error_response)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::JsonParseFailed(rejection.to_string())
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MalformedEvent(msg) => AppError::MalformedEvent(msg),
            other => AppError::InternalError(other.to_string()),
        }
    }
}
