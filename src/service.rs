//! Search API: immutable search context plus the axum router around it.

use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::encoder::{decode_rgb, embed_image, ImageEncoder};
use crate::index::{FlatIndex, IndexError, Match};
use crate::vector_table::{VectorTable, VectorTableError};

/// Number of matches returned when the request does not ask for a count.
pub const DEFAULT_TOP_K: usize = 5;
/// Upper bound on the per-request match count.
pub const DEFAULT_MAX_TOP_K: usize = 20;
/// Default ceiling on uploaded request bodies.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Multipart field carrying the query image.
pub const UPLOAD_FIELD: &str = "file";

const NOT_READY_MESSAGE: &str = "search index is not loaded";

/// Result-count limits applied to search requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Count used when the request leaves `top_k` unset.
    pub default_top_k: usize,
    /// Largest count a request may ask for.
    pub max_top_k: usize,
}

impl SearchLimits {
    /// Normalized limits: both at least 1 and `default <= max`.
    pub fn new(default_top_k: usize, max_top_k: usize) -> Self {
        let max_top_k = max_top_k.max(1);
        Self {
            default_top_k: default_top_k.clamp(1, max_top_k),
            max_top_k,
        }
    }

    /// Resolves the count for one request.
    pub fn resolve(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k)
    }
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K, DEFAULT_MAX_TOP_K)
    }
}

/// Failures surfaced by [`SearchContext::search_image`].
#[derive(Debug, Error)]
pub enum SearchError {
    /// No index was loaded at startup.
    #[error("search index is not loaded")]
    NotReady,
    /// The upload is not a decodable image.
    #[error("could not decode query image: {0:#}")]
    Decode(anyhow::Error),
    /// The encoder failed on a decoded image.
    #[error("could not embed query image: {0:#}")]
    Embed(anyhow::Error),
    /// The query embedding does not fit the index.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Everything a request handler needs, built once at startup and never mutated.
pub struct SearchContext {
    encoder: Arc<dyn ImageEncoder>,
    index: Option<FlatIndex>,
    limits: SearchLimits,
}

impl SearchContext {
    /// Context over an explicit (possibly absent) index.
    pub fn new(
        encoder: Arc<dyn ImageEncoder>,
        index: Option<FlatIndex>,
        limits: SearchLimits,
    ) -> Self {
        Self {
            encoder,
            index,
            limits,
        }
    }

    /// Loads the vector table at `path` and builds the index.
    ///
    /// A missing or invalid table leaves the context not ready instead of
    /// failing; the reason is logged.
    pub fn from_path(encoder: Arc<dyn ImageEncoder>, path: &Path, limits: SearchLimits) -> Self {
        let index = match VectorTable::load(path, encoder.dimension()) {
            Ok(table) => {
                tracing::info!(
                    path = %path.display(),
                    rows = table.len(),
                    "loaded vector table"
                );
                Some(FlatIndex::from_table(table))
            }
            Err(VectorTableError::Missing(_)) => {
                tracing::warn!(
                    path = %path.display(),
                    "vector table not found; serving without an index"
                );
                None
            }
            Err(err) => {
                tracing::error!(path = %path.display(), "vector table rejected: {err}");
                None
            }
        };
        Self::new(encoder, index, limits)
    }

    /// True once an index with at least one row is loaded.
    pub fn is_ready(&self) -> bool {
        self.index.as_ref().is_some_and(|index| !index.is_empty())
    }

    /// Request limits in effect.
    pub fn limits(&self) -> SearchLimits {
        self.limits
    }

    /// Embeds `bytes` exactly as the vectorizer does and returns the `k` nearest products.
    pub fn search_image(&self, bytes: &[u8], k: usize) -> Result<Vec<Match>, SearchError> {
        let index = self
            .index
            .as_ref()
            .filter(|index| !index.is_empty())
            .ok_or(SearchError::NotReady)?;
        let image = decode_rgb(bytes).map_err(SearchError::Decode)?;
        let embedding = embed_image(self.encoder.as_ref(), &image).map_err(SearchError::Embed)?;
        Ok(index.search(embedding.as_slice(), k)?)
    }
}

/// Body of `GET /healthz`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthBody {
    /// Always true while the process serves requests.
    pub ok: bool,
}

/// Body of `GET /ready`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadyBody {
    /// Whether the index is loaded.
    pub ready: bool,
}

/// Body of `POST /api/search`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchBody {
    /// Product ids, nearest first.
    pub matches: Vec<String>,
    /// Present when the search could not run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchBody {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            matches: Vec::new(),
            error: Some(message.into()),
        }
    }
}

/// Query string accepted by `POST /api/search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    /// Requested match count, clamped to the configured limits.
    #[serde(default)]
    pub top_k: Option<usize>,
}

type AppState = Arc<SearchContext>;

/// Builds the HTTP router over a shared context.
pub fn router(context: Arc<SearchContext>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ready", get(ready))
        .route("/api/search", post(search_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn healthz() -> Json<HealthBody> {
    Json(HealthBody { ok: true })
}

async fn ready(State(context): State<AppState>) -> Json<ReadyBody> {
    Json(ReadyBody {
        ready: context.is_ready(),
    })
}

async fn search_handler(
    State(context): State<AppState>,
    query: Result<Query<SearchParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> (StatusCode, Json<SearchBody>) {
    if !context.is_ready() {
        return (StatusCode::OK, Json(SearchBody::failed(NOT_READY_MESSAGE)));
    }
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SearchBody::failed(rejection.body_text())),
            )
        }
    };
    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(SearchBody::failed(rejection.body_text())),
            )
        }
    };
    let bytes = match read_upload(multipart).await {
        Ok(bytes) => bytes,
        Err(message) => return (StatusCode::BAD_REQUEST, Json(SearchBody::failed(message))),
    };
    let top_k = context.limits().resolve(params.top_k);

    let worker = Arc::clone(&context);
    let outcome = tokio::task::spawn_blocking(move || worker.search_image(&bytes, top_k)).await;
    match outcome {
        Ok(Ok(matches)) => {
            tracing::debug!(top_k, hits = matches.len(), "search served");
            let matches = matches.into_iter().map(|m| m.id).collect();
            (StatusCode::OK, Json(SearchBody { matches, error: None }))
        }
        Ok(Err(SearchError::NotReady)) => {
            (StatusCode::OK, Json(SearchBody::failed(NOT_READY_MESSAGE)))
        }
        Ok(Err(err @ SearchError::Decode(_))) => {
            tracing::debug!("rejected upload: {err}");
            (StatusCode::BAD_REQUEST, Json(SearchBody::failed(err.to_string())))
        }
        Ok(Err(err)) => {
            tracing::error!("search failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SearchBody::failed(err.to_string())),
            )
        }
        Err(join_err) => {
            tracing::error!("search task join error: {join_err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SearchBody::failed("search task failed")),
            )
        }
    }
}

async fn read_upload(mut multipart: Multipart) -> Result<Vec<u8>, String> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| format!("invalid multipart body: {err}"))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|err| format!("failed to read upload: {err}"))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(format!("multipart field `{UPLOAD_FIELD}` is required"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EMBEDDING_DIM;
    use crate::encoder::testing::{png_bytes, MeanColorEncoder};

    #[test]
    fn limits_clamp_requests() {
        let limits = SearchLimits::new(5, 20);
        assert_eq!(limits.resolve(None), 5);
        assert_eq!(limits.resolve(Some(0)), 1);
        assert_eq!(limits.resolve(Some(50)), 20);
        assert_eq!(
            SearchLimits::new(30, 0),
            SearchLimits {
                default_top_k: 1,
                max_top_k: 1
            }
        );
    }

    #[test]
    fn context_without_index_is_not_ready() {
        let encoder = Arc::new(MeanColorEncoder {
            dimension: EMBEDDING_DIM,
        });
        let context = SearchContext::new(encoder, None, SearchLimits::default());
        assert!(!context.is_ready());
        let err = context.search_image(&png_bytes([1, 2, 3]), 5).unwrap_err();
        assert!(matches!(err, SearchError::NotReady));
    }

    #[test]
    fn corrupt_table_degrades_to_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        std::fs::write(&path, r#"{"ids": ["a"], "vectors": ["#).unwrap();
        let encoder = Arc::new(MeanColorEncoder {
            dimension: EMBEDDING_DIM,
        });
        let context = SearchContext::from_path(encoder, &path, SearchLimits::default());
        assert!(!context.is_ready());
    }
}
