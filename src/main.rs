mod analysis;
mod config;
mod ebay;
mod gallery;
mod http;
mod llm;
mod metrics;
mod models;
mod photos;
mod pipeline;
mod security;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use config::{AppConfig, SERVICE_NAME, SERVICE_VERSION};
use ebay::export::csv_preview;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    AnalyzeGalleryResponse, ApiError, ExportFormat, ExportJsonResponse, ExportQuery,
    ExportTextResponse, GalleryResponse, PreviewResponse,
};
use pipeline::{PREVIEW_GROUPS, Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthState, require_upload_password};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{any::Any, net::SocketAddr, sync::Arc};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const CSV_PREVIEW_CHARS: usize = 800;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    if let Err(err) = run().await {
        error!(target: "chatbay.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let config = Arc::new(AppConfig::from_env());
    let http = http::build_client(&config.http);
    let pipeline = Pipeline::new(config.clone(), http);
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let app = router(AppState::new(config.clone(), pipeline, prometheus_handle));

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(
        target: "chatbay.api",
        version = SERVICE_VERSION,
        auth = config.upload_password.is_some(),
        concurrent = config.vision.concurrent,
        "listening on {addr}"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    pipeline: Pipeline,
    openapi: Arc<Value>,
    prometheus_handle: PrometheusHandle,
}

impl AppState {
    fn new(config: Arc<AppConfig>, pipeline: Pipeline, prometheus_handle: PrometheusHandle) -> Self {
        let openapi = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or_else(|err| {
                warn!(target: "chatbay.api", error = %err, "openapi document failed to parse");
                json!({ "openapi": "3.0.3" })
            });
        Self {
            config,
            pipeline,
            openapi: Arc::new(openapi),
            prometheus_handle,
        }
    }
}

fn router(state: AppState) -> Router {
    let auth = AuthState::new(state.config.upload_password.clone());
    let protected = Router::new()
        .route("/gallery", get(gallery))
        .route("/analyze_gallery", get(analyze_gallery))
        .route("/preview_csv", get(preview_csv).post(preview_csv))
        .route("/export_csv", get(export_csv).post(export_csv))
        .route("/export_csv_text", get(export_csv_text))
        .route_layer(middleware::from_fn_with_state(auth, require_upload_password));

    let cors = cors_layer(&state.config.frontend_origins);
    let body_limit = state.config.request_max_bytes;
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(DefaultBodyLimit::max(body_limit))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_headers(AnyOrigin)
        .allow_methods(AnyOrigin);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if allowed.is_empty() {
        base.allow_origin(AnyOrigin)
    } else {
        base.allow_origin(AllowOrigin::list(allowed))
    }
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(target: "chatbay.api", panic = message, "handler panicked");
    let body = ApiError::new("internal_error").with_detail("unexpected server failure");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "chatbay analyzer is running; see /openapi.json",
    }))
}

/// Liveness probe. No auth.
async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    crate::metrics::inc_requests("/status");
    Json(state.config.status_json())
}

async fn openapi_json(State(state): State<AppState>) -> Json<Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.config.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct GalleryQuery {
    #[serde(default)]
    gallery: Option<String>,
}

async fn gallery(
    State(state): State<AppState>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<GalleryResponse>, AppError> {
    crate::metrics::inc_requests("/gallery");
    let params = state.pipeline.resolve_params(&ExportQuery {
        gallery: query.gallery,
        ..ExportQuery::default()
    })?;
    let groups = state.pipeline.fetch_groups(&params.gallery_url).await?;
    Ok(Json(GalleryResponse {
        total_groups: groups.len(),
        groups,
    }))
}

async fn analyze_gallery(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<AnalyzeGalleryResponse>, AppError> {
    crate::metrics::inc_requests("/analyze_gallery");
    let params = state.pipeline.resolve_params(&query)?;
    let records = state.pipeline.analyze_gallery(&params).await?;
    Ok(Json(records))
}

async fn preview_csv(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
    body: Bytes,
) -> Result<Json<PreviewResponse>, AppError> {
    crate::metrics::inc_requests("/preview_csv");
    let query = with_body(query, &body)?;
    let params = state.pipeline.resolve_params(&query)?;
    let run = state
        .pipeline
        .build_export(&params, Some(PREVIEW_GROUPS))
        .await?;
    Ok(Json(PreviewResponse {
        preview_count: run.rows.len(),
        condition: params.condition,
        photos_per_item: params.photos_per_item,
        rows: run.rows,
    }))
}

async fn export_csv(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/export_csv");
    let query = with_body(query, &body)?;
    let format = export_format(query.format.as_deref(), state.config.enforce_params)?;
    let params = state.pipeline.resolve_params(&query)?;
    let run = state.pipeline.build_export(&params, None).await?;

    match format {
        ExportFormat::Json => Ok(Json(ExportJsonResponse {
            ok: true,
            run_id: run.run_id.to_string(),
            filename: run.filename,
            schema: run.schema.name.clone(),
            rows: run.rows.len(),
            csv_preview: csv_preview(&run.csv, CSV_PREVIEW_CHARS),
            csv_base64: BASE64.encode(run.csv.as_bytes()),
            stages: run.stages,
        })
        .into_response()),
        ExportFormat::File => {
            let disposition = format!("attachment; filename=\"{}\"", run.filename);
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                run.csv,
            )
                .into_response())
        }
    }
}

async fn export_csv_text(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ExportTextResponse>, AppError> {
    crate::metrics::inc_requests("/export_csv_text");
    let params = state.pipeline.resolve_params(&query)?;
    let run = state.pipeline.build_export(&params, None).await?;
    Ok(Json(ExportTextResponse {
        filename: run.filename,
        rows: run.rows.len(),
        csv_text: run.csv,
    }))
}

/// Merges a JSON body, when present, under the query-string values.
fn with_body(query: ExportQuery, body: &Bytes) -> Result<ExportQuery, PipelineError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(query);
    }
    let parsed: ExportQuery = serde_json::from_slice(body).map_err(|err| {
        PipelineError::invalid_input("params", format!("body must be a JSON object: {err}"))
    })?;
    Ok(query.merge(Some(parsed)))
}

fn export_format(raw: Option<&str>, enforce: bool) -> Result<ExportFormat, PipelineError> {
    match raw.map(|value| value.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("file") | Some("csv") => Ok(ExportFormat::File),
        Some("json") => Ok(ExportFormat::Json),
        Some(other) if enforce => Err(PipelineError::invalid_input(
            "params",
            format!("format `{other}` must be file or json"),
        )),
        Some(_) => Ok(ExportFormat::File),
    }
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let (status, upstream) = match err.kind() {
                    PipelineErrorKind::InvalidInput => (StatusCode::BAD_REQUEST, None),
                    PipelineErrorKind::NotFound => (StatusCode::NOT_FOUND, None),
                    PipelineErrorKind::Upstream(code) => {
                        let status = StatusCode::from_u16(code)
                            .ok()
                            .filter(|s| s.is_client_error() || s.is_server_error())
                            .unwrap_or(StatusCode::BAD_GATEWAY);
                        (status, Some(code))
                    }
                    PipelineErrorKind::BadGateway => (StatusCode::BAD_GATEWAY, None),
                    PipelineErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, None),
                };
                if status.is_server_error() {
                    error!(target: "chatbay.api", stage = err.stage(), error = %err, "request failed");
                }
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                    status_code: upstream,
                    response_snippet: err.snippet().map(str::to_string),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
