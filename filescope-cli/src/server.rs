//! HTTP front-end over the scraper.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::middleware::{self, Next};
use axum::{Json, Router};
use filescope::{Scrape, ScrapeRequest, Scraper};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::logging::LoggingMiddleware;

#[derive(Clone)]
pub struct AppState {
    pub scraper: Arc<Scraper>,
}

fn default_true() -> bool {
    true
}

/// Body of `POST /characterize`.
#[derive(Debug, Deserialize)]
pub struct CharacterizeBody {
    pub path: PathBuf,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default = "default_true")]
    pub check_wellformed: bool,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl CharacterizeBody {
    fn into_request(self) -> ScrapeRequest {
        let mut request = ScrapeRequest::new(self.path).check_wellformed(self.check_wellformed);
        if let Some(mimetype) = self.mimetype {
            request = request.mimetype(mimetype);
        }
        if let Some(version) = self.version {
            request = request.version(version);
        }
        self.params
            .into_iter()
            .fold(request, |request, (key, value)| request.param(key, value))
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// A checker broke the result contract.
    ContractViolation(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::ContractViolation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct CheckerSummary {
    id: &'static str,
    mimetypes: Vec<&'static str>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn checkers(State(state): State<AppState>) -> Json<Vec<CheckerSummary>> {
    let summaries = state
        .scraper
        .registry()
        .checkers()
        .map(|checker| {
            let mut mimetypes: Vec<_> =
                checker.capabilities().iter().map(|r| r.mimetype).collect();
            mimetypes.dedup();
            CheckerSummary {
                id: checker.id(),
                mimetypes,
            }
        })
        .collect();
    Json(summaries)
}

async fn characterize(
    State(state): State<AppState>,
    Json(body): Json<CharacterizeBody>,
) -> Result<Json<Scrape>, ApiError> {
    let request = body.into_request();
    let scraper = Arc::clone(&state.scraper);
    let scrape = tokio::task::spawn_blocking(move || scraper.characterize(&request))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::ContractViolation(e.to_string()))?;
    Ok(Json(scrape))
}

pub fn create_router(scraper: Arc<Scraper>, verbose: u8) -> Router {
    let logging = LoggingMiddleware::new(verbose);
    Router::new()
        .route("/health", get(health))
        .route("/checkers", get(checkers))
        .route("/characterize", post(characterize))
        .layer(middleware::from_fn(move |request: Request, next: Next| {
            let logging = logging.clone();
            async move { logging.handle(request, next).await }
        }))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { scraper })
}

/// Bind and serve until the process is stopped.
pub async fn serve(scraper: Arc<Scraper>, host: &str, port: u16, verbose: u8) -> anyhow::Result<()> {
    let app = create_router(scraper, verbose);
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    if verbose > 0 {
        eprintln!("filescope server listening on http://{host}:{port}");
    }
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header;
    use filescope::{Registry, ToolConfig};
    use tower::util::ServiceExt;

    fn app() -> Router {
        let registry = Arc::new(Registry::new(&ToolConfig::default()));
        create_router(Arc::new(Scraper::new(registry)), 0)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_checkers_lists_registry() {
        let response = app()
            .oneshot(axum::http::Request::builder().uri("/checkers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"PngChecker"));
        assert!(ids.contains(&"MagicChecker"));
    }

    #[tokio::test]
    async fn test_characterize_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.json");
        std::fs::write(&path, "{\"a\": 1}").unwrap();

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/characterize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "path": path }).to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["mimetype"], "application/json");
        assert_eq!(body["well_formed"], true);
        assert_eq!(body["streams"][0]["index"], 0);
    }

    #[tokio::test]
    async fn test_characterize_missing_file_is_still_ok() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/characterize")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "path": "/nonexistent/x.pdf", "check_wellformed": false }).to_string(),
            ))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["well_formed"], false);
        assert_eq!(body["checkers"][0], "FileExists");
    }

    #[test]
    fn test_body_defaults() {
        let body: CharacterizeBody = serde_json::from_str(r#"{"path": "a"}"#).unwrap();
        assert!(body.check_wellformed);
        assert!(body.params.is_empty());
        let request = body.into_request();
        assert_eq!(request.path(), std::path::Path::new("a"));
    }
}
