use crate::movies::MovieRecord;
use crate::search::{ErrorKind, SearchError, SearchOutcome, SearchPipeline};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct SharedState {
    pub pipeline: Arc<SearchPipeline>,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/search", post(search))
        .route("/api/movies-by-ids", post(movies_by_ids))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

async fn start_app(pipeline: SearchPipeline, bind: &str) -> anyhow::Result<()> {
    let state = SharedState {
        pipeline: Arc::new(pipeline),
    };

    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("listening on {bind}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(pipeline: SearchPipeline, bind: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(pipeline, bind))
}

#[derive(Debug)]
pub struct HttpError(SearchError);

impl HttpError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Unauthenticated
            | ErrorKind::Unavailable
            | ErrorKind::MalformedResponse => StatusCode::BAD_GATEWAY,
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();

        match &self.0 {
            SearchError::InvalidInput(_) => log::debug!("{self:?}"),
            SearchError::Timeout { details, .. } => log::warn!("search timed out: {details}"),
            _ => log::error!("{self:?}"),
        }

        (
            status,
            Json(json!({"error": self.0.to_string(), "kind": self.0.kind()})),
        )
            .into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<SearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

fn bad_body(rejection: JsonRejection) -> HttpError {
    HttpError(SearchError::InvalidInput(rejection.body_text()))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    /// Absent, blank and whitespace-only queries are rejected
    #[serde(default)]
    pub query: Option<String>,

    /// Lowers the configured result cap for this request
    #[serde(default)]
    pub limit: Option<usize>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchOutcome>, HttpError> {
    let Json(payload) = payload.map_err(bad_body)?;
    log::debug!("payload: {payload:?}");

    let query = payload.query.unwrap_or_default();
    let outcome = state.pipeline.search(&query, payload.limit).await?;

    Ok(Json(outcome))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoviesByIdsRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

async fn movies_by_ids(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<MoviesByIdsRequest>, JsonRejection>,
) -> Result<Json<Vec<MovieRecord>>, HttpError> {
    let Json(payload) = payload.map_err(bad_body)?;
    let movies = state.pipeline.movies_by_ids(&payload.ids).await?;
    Ok(Json(movies))
}

async fn health(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    let metadata = state.pipeline.metadata_source();

    match state.pipeline.check_health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "metadata": metadata})),
        ),
        Err(err) => {
            log::error!("health check failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "unhealthy",
                    "metadata": metadata,
                    "error": err.to_string(),
                })),
            )
        }
    }
}
