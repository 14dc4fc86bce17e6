use axum::{
    body::{Bytes, Full},
    extract::{ConnectInfo, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, Response, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use hyper::Server;
use serde_json::json;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as CorsAny, CorsLayer};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::constants::{
    CONFIG_PARAM, ERR_SERVER, HEALTH_ROUTE, METRICS_ROUTE, MISSING_PARAMETERS, VERSION_PARAM,
};
use crate::error::{IntakeError, Result};
use crate::pipeline::{
    ConfigLookupError, ConfigResponder, IngestBody, IngestRequest, IngestionPipeline,
};
use crate::rate_limiter::{source_identity, AdmissionLimiter};
use crate::schema::SchemaValidator;
use crate::storage::build_store;

#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestionPipeline>,
    pub config: Arc<ConfigResponder>,
}

impl AppState {
    pub fn new(ingest: IngestionPipeline, config: ConfigResponder) -> Self {
        Self {
            ingest: Arc::new(ingest),
            config: Arc::new(config),
        }
    }

    /// Wire every collaborator from process configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let limiter = Arc::new(AdmissionLimiter::new(config.admission_limits()));
        let validator = Arc::new(SchemaValidator::telemetry_v1()?);
        let store = build_store(config)?;
        let pipeline = IngestionPipeline::new(limiter, validator, store)
            .with_collection(config.collection.clone())
            .with_store_timeout(config.store_timeout());
        Ok(Self::new(pipeline, ConfigResponder::new(config.server_key.clone())))
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "telemetry_intake",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// POST /api/metrics?v=...
async fn ingest_metrics(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let source = source_identity(forwarded_for, connect_info.map(|ConnectInfo(addr)| addr));
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());

    let request = IngestRequest {
        body: IngestBody::from_http(content_type, body.to_vec()),
        version: params.get(VERSION_PARAM).cloned(),
        source,
    };

    match state.ingest.ingest(request).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "status": "ok" }))).into_response(),
        Err(e) => (e.status(), Json(e.body())).into_response(),
    }
}

/// GET /api/metrics?v=...&f=...
async fn config_lookup(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let version = params.get(VERSION_PARAM).map(String::as_str);
    let token = params.get(CONFIG_PARAM).map(String::as_str);
    match state.config.respond(version, token) {
        Ok(blob) => blob.into_response(),
        Err(ConfigLookupError::MissingParameters) => {
            (StatusCode::BAD_REQUEST, MISSING_PARAMETERS).into_response()
        }
        Err(e) => {
            error!(error = %e, "Config response failed");
            (StatusCode::INTERNAL_SERVER_ERROR, ERR_SERVER).into_response()
        }
    }
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response<Full<Bytes>> {
    error!("Request handler panicked");
    let body = json!({ "error": ERR_SERVER }).to_string();
    let mut response = Response::new(Full::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Create the HTTP server with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(CorsAny)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(CorsAny);

    Router::new()
        .route(HEALTH_ROUTE, get(health))
        .route(METRICS_ROUTE, get(config_lookup).post(ingest_metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::custom(panic_response))
                .layer(cors),
        )
}

/// Periodically drop lapsed limiter buckets so idle identities do not accumulate.
pub fn spawn_limiter_sweeper(limiter: Arc<AdmissionLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.limits().window);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep();
            if removed > 0 {
                debug!(removed, remaining = limiter.tracked_identities(), "Swept rate buckets");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let sweeper = spawn_limiter_sweeper(state.ingest.limiter().clone());
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "Server listening");
    let served = Server::try_bind(&addr)
        .map_err(|e| IntakeError::Server(format!("failed to bind {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served.map_err(|e| IntakeError::Server(e.to_string()))
}
