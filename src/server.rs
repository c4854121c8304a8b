//! HTTP query layer over the docs index.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, version, and indexed chunk count |
//! | `POST` | `/search` | Top-k chunks for `{question, k?}` |
//! | `POST` | `/chat` | LLM answer grounded in retrieved chunks |
//! | `POST` | `/reindex` | Run an indexing pass (`{force?}`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `llm_disabled` (400), `internal` (500).
//!
//! # Concurrency
//!
//! The index sits behind a `tokio::sync::RwLock`. Searches and chat take the
//! read lock. Chat first rewrites a follow-up into a standalone question
//! from the conversation history and retrieves with that. `/reindex` scans
//! and embeds under the read lock and takes the write lock only to apply
//! the update, so queries never observe a half-applied update. Concurrent
//! reindex requests run one at a time.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use docs_qa_core::index::NoProgress;
use docs_qa_core::models::ScoredChunk;

use crate::chat::ChatClient;
use crate::config::Config;
use crate::pipeline::{commit_update, prepare_update, DocsIndex, PassReport};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub index: Arc<RwLock<DocsIndex>>,
    /// `None` when `llm.provider = "disabled"`.
    pub chat: Option<Arc<Mutex<ChatClient>>>,
    /// Serializes `/reindex` calls.
    reindex: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: Config, index: DocsIndex, chat: Option<ChatClient>) -> Self {
        Self {
            config: Arc::new(config),
            index: Arc::new(RwLock::new(index)),
            chat: chat.map(|c| Arc::new(Mutex::new(c))),
            reindex: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_search))
        .route("/chat", post(handle_chat))
        .route("/reindex", post(handle_reindex))
        .layer(cors)
        .with_state(state)
}

/// Bind to `[server].bind` and serve until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = router(state);

    tracing::info!(bind = %bind_addr, "starting HTTP server");
    println!("docs-qa listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn llm_disabled() -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "llm_disabled".to_string(),
        message: "chat requires [llm] provider to be configured".to_string(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let chunks = state.index.read().await.chunk_count().await.map_err(internal)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        chunks,
    }))
}

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    question: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Serialize)]
struct SearchResult {
    text: String,
    source: String,
    citation: String,
    score: f32,
    kind: String,
    header: Option<String>,
    language: Option<String>,
}

impl From<ScoredChunk> for SearchResult {
    fn from(hit: ScoredChunk) -> Self {
        let citation = hit.chunk.citation();
        Self {
            kind: hit.chunk.kind.as_str().to_string(),
            text: hit.chunk.text,
            source: hit.chunk.source_id,
            citation,
            score: hit.score,
            header: hit.chunk.header,
            language: hit.chunk.language,
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn retrieve(
    state: &AppState,
    question: &str,
    k: usize,
) -> Result<Vec<ScoredChunk>, AppError> {
    if question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if k == 0 {
        return Err(bad_request("k must be >= 1"));
    }
    let index = state.index.read().await;
    index.query(question, k).await.map_err(internal)
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let k = req.k.unwrap_or(state.config.retrieval.top_k);
    let hits = retrieve(&state, &req.question, k).await?;
    Ok(Json(SearchResponse {
        results: hits.into_iter().map(SearchResult::from).collect(),
    }))
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    question: String,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let chat = state.chat.clone().ok_or_else(llm_disabled)?;
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    // Held across retrieval so turns from one conversation do not interleave.
    let mut chat = chat.lock().await;
    let question = chat
        .standalone_question(&req.question)
        .await
        .map_err(internal)?;
    let hits = retrieve(&state, &question, state.config.retrieval.top_k).await?;
    let answer = chat.answer(&question, &hits).await.map_err(internal)?;

    Ok(Json(ChatResponse {
        answer: answer.answer,
        sources: answer.sources,
    }))
}

#[derive(Deserialize, Default)]
struct ReindexRequest {
    #[serde(default)]
    force: bool,
}

/// The body is optional; an empty request runs a normal incremental pass.
///
/// Scanning and embedding run under the read lock so queries keep being
/// served; only the commit takes the write lock.
async fn handle_reindex(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PassReport>, AppError> {
    let req: ReindexRequest = if body.is_empty() {
        ReindexRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };

    let _reindexing = state.reindex.lock().await;
    let pending = {
        let index = state.index.read().await;
        prepare_update(&*index, &state.config, req.force, &NoProgress)
            .await
            .map_err(internal)?
    };
    let mut index = state.index.write().await;
    let report = commit_update(&mut *index, pending, &state.config, &NoProgress)
        .await
        .map_err(internal)?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::pipeline::build_or_update_index;
    use async_trait::async_trait;
    use docs_qa_core::embedding::EmbeddingProvider;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct LetterEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            26
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for b in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                        v[(b - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    async fn state(dir: &tempfile::TempDir) -> AppState {
        state_with(dir, Arc::new(LetterEmbedder::default())).await
    }

    async fn state_with(dir: &tempfile::TempDir, embedder: Arc<LetterEmbedder>) -> AppState {
        let docs = dir.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("a.md"), "# Alpha\n\nAll about alpha.\n").unwrap();
        fs::write(docs.join("b.md"), "# Beta\n\nBeta builds bridges.\n").unwrap();

        let mut config = parse_config("").unwrap();
        config.docs.root = docs;
        config.index.path = dir.path().join("index");
        config.index.checksums_path = dir.path().join("checksums.json");

        let (index, _) = build_or_update_index(&config, embedder, false, &NoProgress)
            .await
            .unwrap();
        AppState::new(config, index, None)
    }

    #[tokio::test]
    async fn health_reports_chunk_count() {
        let dir = tempfile::tempdir().unwrap();
        let Json(health) = handle_health(State(state(&dir).await)).await.ok().unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.chunks, 2);
    }

    #[tokio::test]
    async fn search_returns_results() {
        let dir = tempfile::tempdir().unwrap();
        let req = SearchRequest {
            question: "alpha".to_string(),
            k: Some(1),
        };
        let Json(resp) = handle_search(State(state(&dir).await), Json(req))
            .await
            .ok()
            .unwrap();
        assert_eq!(resp.results.len(), 1);
        assert_eq!(resp.results[0].source, "a.md");
        assert_eq!(resp.results[0].kind, "text");
    }

    #[tokio::test]
    async fn empty_question_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let req = SearchRequest {
            question: "  ".to_string(),
            k: None,
        };
        let err = handle_search(State(state(&dir).await), Json(req))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }

    #[tokio::test]
    async fn chat_without_llm_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let req = ChatRequest {
            question: "alpha?".to_string(),
        };
        let err = handle_chat(State(state(&dir).await), Json(req))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, "llm_disabled");
    }

    #[tokio::test]
    async fn reindex_picks_up_new_document() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        fs::write(dir.path().join("docs/c.md"), "# Gamma\n\nGamma rays.\n").unwrap();

        let Json(report) = handle_reindex(State(state.clone()), Bytes::new()).await.ok().unwrap();
        assert!(report.changes.changed);
        assert_eq!(report.changes.added, vec!["c.md"]);
        assert_eq!(state.index.read().await.chunk_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reindex_embeds_while_readers_hold_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(LetterEmbedder::default());
        let state = state_with(&dir, embedder.clone()).await;
        let calls = embedder.calls.load(Ordering::SeqCst);
        fs::write(dir.path().join("docs/a.md"), "# Alpha\n\nAlpha, revised.\n").unwrap();

        let reader = state.index.read().await;
        let task = tokio::spawn(handle_reindex(State(state.clone()), Bytes::new()));

        tokio::time::timeout(Duration::from_secs(10), async {
            while embedder.calls.load(Ordering::SeqCst) == calls {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished(), "commit must wait for readers");

        drop(reader);
        let Json(report) = task.await.unwrap().ok().unwrap();
        assert_eq!(report.changes.modified, vec!["a.md"]);
        assert_eq!(report.index.unwrap().documents_reindexed, 1);
    }
}
