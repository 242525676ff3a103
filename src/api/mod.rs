//! Thin axum layer over [`Engine`](crate::engine::Engine).

pub mod chat;
pub mod documents;
pub mod search;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::Error;
use crate::state::AppState;

/// Largest accepted request body; ingested documents arrive inline.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(documents::health))
        .route("/api/ingest", post(documents::ingest))
        .route("/api/documents", get(documents::list_documents))
        .route(
            "/api/documents/{id}",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/api/documents/chunk/{chunk_id}", get(documents::get_chunk))
        .route("/api/search", post(search::search))
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/stream", post(chat::chat_stream))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// An engine error rendered as `{"error": message}` with a matching status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::MalformedUpstreamEvent(_) => StatusCode::BAD_GATEWAY,
            Error::Configuration(_)
            | Error::DimensionMismatch { .. }
            | Error::Index(_)
            | Error::Store(_)
            | Error::Io(_)
            | Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.0.to_string();
        if status.is_server_error() {
            tracing::error!("{status}: {message}");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
