use axum::extract::State;
use axum::Json;

use crate::api::ApiError;
use crate::models::{SearchRequest, SearchResponse};
use crate::state::AppState;

/// POST /api/search - Hybrid retrieval:
///   1. Vector and lexical search in parallel (either may be down)
///   2. RRF fusion of both rankings
///   3. Optional cross-encoder reranking, truncated to TOPK_RERANK
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let filter = req.metadata_filter();
    let results = state.engine.retrieve(&req.query, filter.as_ref()).await?;

    Ok(Json(SearchResponse {
        query: req.query.trim().to_string(),
        results,
    }))
}
