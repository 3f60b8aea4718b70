#![forbid(unsafe_code)]

//! HTTP surface of the service.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    config::PipelineConfig,
    delivery::{self, EXPOSED_HEADERS},
    error::{ExtractionError, FetchError, PipelineError},
    metadata::{FormatDescriptor, VideoMetadata},
    pipeline::{DownloadRequest, fetch_info, prepare_download},
    platform::PlatformId,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
}

impl AppState {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::Extraction(ExtractionError::ToolFailure { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::Extraction(ExtractionError::Parse(_)) => StatusCode::BAD_GATEWAY,
            PipelineError::Fetch(FetchError::ToolFailure { .. } | FetchError::Parse(_)) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::Extraction(ExtractionError::Timeout(_))
            | PipelineError::Fetch(FetchError::Timeout(_))
            | PipelineError::Transcode(crate::error::TranscodeError::Timeout(_)) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            PipelineError::Fetch(FetchError::Disk(_)) => StatusCode::INSUFFICIENT_STORAGE,
            PipelineError::Transcode(_) | PipelineError::Delivery(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %err, "request failed");
        } else {
            info!(status = status.as_u16(), error = %err, "request rejected");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct InfoQuery {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatsResponse {
    formats: Vec<FormatDescriptor>,
}

#[derive(Debug, Serialize)]
struct PlatformEntry {
    id: PlatformId,
    #[serde(rename = "shortForm")]
    short_form: bool,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/api/info", get(get_info).post(post_info))
        .route("/api/formats", get(get_formats))
        .route("/api/download", post(download))
        .route("/api/platforms", get(platforms))
        .route("/api/health", get(health))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin when none are configured; unparsable origins are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers(EXPOSED_HEADERS)
}

async fn info_for(state: &AppState, query: InfoQuery) -> ApiResult<VideoMetadata> {
    let url = query.url.unwrap_or_default();
    Ok(fetch_info(&state.config, &url, query.platform.as_deref()).await?)
}

async fn get_info(
    State(state): State<AppState>,
    query: Result<Query<InfoQuery>, QueryRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    let Query(query) = query?;
    Ok(Json(info_for(&state, query).await?))
}

async fn post_info(
    State(state): State<AppState>,
    body: Result<Json<InfoQuery>, JsonRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    let Json(query) = body?;
    Ok(Json(info_for(&state, query).await?))
}

async fn get_formats(
    State(state): State<AppState>,
    query: Result<Query<InfoQuery>, QueryRejection>,
) -> ApiResult<Json<FormatsResponse>> {
    let Query(query) = query?;
    let metadata = info_for(&state, query).await?;
    Ok(Json(FormatsResponse {
        formats: metadata.formats,
    }))
}

async fn download(
    State(state): State<AppState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = body?;
    let prepared = prepare_download(&state.config, &request).await?;
    let response = delivery::into_response(prepared)
        .await
        .map_err(PipelineError::from)?;
    Ok(response)
}

async fn platforms() -> Json<Vec<PlatformEntry>> {
    Json(
        PlatformId::SUPPORTED
            .iter()
            .map(|platform| PlatformEntry {
                id: *platform,
                short_form: platform.is_short_form(),
            })
            .collect(),
    )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
