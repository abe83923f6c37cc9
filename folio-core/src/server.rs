//! HTTP query surface built on axum.
//!
//! Serving is read-only: the store is opened and consistency-checked
//! once at startup, and ingest must not run against the same store
//! directory while the server is up.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::FolioConfig;
use crate::error::{AskError, FolioError, OllamaError, Result};
use crate::ollama::{ModelService, ensure_reachable};
use crate::orchestrator::{AskRequest, Orchestrator};
use crate::prompt::Citation;
use crate::store::CorpusStore;

/// Shared state for request handlers.
pub struct ServerState {
    store: CorpusStore,
    orchestrator: Orchestrator,
    service: Arc<dyn ModelService>,
}

pub type SharedState = Arc<ServerState>;

impl ServerState {
    pub fn new(store: CorpusStore, orchestrator: Orchestrator, service: Arc<dyn ModelService>) -> Self {
        Self {
            store,
            orchestrator,
            service,
        }
    }
}

/// Wire shape of a successful `/ask` response.
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<Citation>,
}

/// Build the application router: `POST /ask` and `GET /health`, with
/// permissive CORS for browser frontends.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/ask", post(ask_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ask_handler(
    State(state): State<SharedState>,
    Json(request): Json<AskRequest>,
) -> Response {
    match state.orchestrator.ask(&state.store, &request).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(AskResponse {
                answer: outcome.answer,
                sources: outcome.sources,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Ask request failed");
            (status_for(&e), Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "model_service": state.service.is_alive().await,
        "chunks": state.store.len(),
        "vector_dim": state.store.manifest().vector_dim,
    }))
}

fn status_for(err: &FolioError) -> StatusCode {
    match err {
        FolioError::Ollama(OllamaError::Unreachable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        FolioError::Ollama(_)
        | FolioError::Ask(AskError::Model { .. })
        | FolioError::Ask(AskError::AllCandidatesFailed { .. }) => StatusCode::BAD_GATEWAY,
        FolioError::Ask(AskError::NoModels) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Open the store, then serve the query API on the configured address
/// until cancelled.
pub async fn run(config: FolioConfig, service: Arc<dyn ModelService>) -> Result<()> {
    ensure_reachable(service.as_ref(), &config.ollama.base_url).await?;
    let store = CorpusStore::open(&config.ingest.store_dir)?;
    info!(
        chunks = store.len(),
        dim = store.manifest().vector_dim,
        "Store opened for serving"
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let orchestrator = Orchestrator::new(service.clone(), config);
    let state = Arc::new(ServerState::new(store, orchestrator, service));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Query server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::extract::{MockPageExtractor, Page};
    use crate::ollama::MockModelService;
    use crate::store::IngestPipeline;
    use axum::body::Body;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn build_state(service: Arc<MockModelService>) -> (TempDir, TempDir, SharedState) {
        let data = TempDir::new().unwrap();
        let store_dir = TempDir::new().unwrap();
        let pdf = data.path().join("facts.pdf");
        std::fs::write(&pdf, b"").unwrap();
        let extractor = MockPageExtractor::new()
            .with_document(&pdf, vec![Page::new(1, "The capital of France is Paris.")]);
        let config = IngestConfig {
            data_dir: data.path().to_path_buf(),
            store_dir: store_dir.path().to_path_buf(),
            ..IngestConfig::default()
        };
        IngestPipeline::new(
            Arc::new(extractor),
            Arc::new(MockModelService::new()),
            config,
        )
        .full_build()
        .await
        .unwrap();

        let store = CorpusStore::open(store_dir.path()).unwrap();
        let orchestrator = Orchestrator::new(service.clone(), FolioConfig::default());
        let state = Arc::new(ServerState::new(store, orchestrator, service));
        (data, store_dir, state)
    }

    fn post_ask(body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_data, _store, state) = build_state(Arc::new(MockModelService::new())).await;
        let app = router(state);

        let req = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(app, req)
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["model_service"], true);
        assert_eq!(json["chunks"], 1);
    }

    #[tokio::test]
    async fn test_ask_endpoint_returns_answer_and_sources() {
        let service = Arc::new(MockModelService::new().with_reply("llama3.1:8b", "Paris."));
        let (_data, _store, state) = build_state(service).await;
        let app = router(state);

        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(
            app,
            post_ask(json!({ "question": "What is the capital of France?" })),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), 200);

        let json = body_json(resp).await;
        assert_eq!(json["answer"], "Paris.");
        assert_eq!(json["sources"][0]["n"], 1);
        assert_eq!(json["sources"][0]["doc"], "facts.pdf");
        assert_eq!(json["sources"][0]["page"], 1);
    }

    #[tokio::test]
    async fn test_ask_endpoint_honors_mode_override() {
        let service = Arc::new(
            MockModelService::new()
                .with_reply("m1", "one")
                .with_reply("m2", "two")
                .with_reply("judge9", "settled"),
        );
        let (_data, _store, state) = build_state(service).await;
        let app = router(state);

        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(
            app,
            post_ask(json!({
                "question": "What is the capital of France?",
                "mode": "consensus",
                "models": ["m1", "m2"],
                "judge_model": "judge9",
            })),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), 200);

        let json = body_json(resp).await;
        assert_eq!(json["answer"], "settled");
        // Candidate answers stay internal; the wire shape is answer+sources.
        assert!(json.get("candidates").is_none());
    }

    #[tokio::test]
    async fn test_ask_endpoint_maps_model_failure() {
        let service = Arc::new(MockModelService::new().with_failing_model("llama3.1:8b"));
        let (_data, _store, state) = build_state(service).await;
        let app = router(state);

        let resp = ServiceExt::<axum::http::Request<Body>>::oneshot(
            app,
            post_ask(json!({ "question": "anything" })),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(resp).await;
        assert!(json["error"].as_str().unwrap().contains("llama3.1:8b"));
    }
}
