use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::api::ApiError;
use crate::models::{Chunk, Document, DocumentSummary, IngestRequest, IngestResponse};
use crate::state::AppState;

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "chunks": state.engine.chunk_count(),
        "vector_backend": state.config.vector.backend,
        "reranker": state.engine.reranker_enabled(),
    }))
}

/// POST /api/ingest - Segment, embed and index already-extracted text.
pub async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let resp = state.engine.ingest(req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// GET /api/documents
pub async fn list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    Ok(Json(state.engine.list_documents()?))
}

/// GET /api/documents/{id}
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    Ok(Json(state.engine.get_document(&id)?))
}

/// GET /api/documents/chunk/{chunk_id}
pub async fn get_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Json<Chunk>, ApiError> {
    Ok(Json(state.engine.get_chunk(&chunk_id)?))
}

/// DELETE /api/documents/{id} - Remove the document, its chunks and its vectors.
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.engine.delete_document(&id).await?;
    Ok(Json(json!({ "ok": true, "doc_id": id })))
}
