use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fractal_core::{GeometryPayload, ParameterSet, PayloadMetadata};
use fractal_engine::{GenerateError, GenerationService};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

pub mod config;

pub use config::{ConfigError, ServerConfig};

const MAX_ITERATIONS: u32 = 128;
const MAX_GRID_SIZE: u32 = 128;
const BUSY_RETRY_AFTER_MS: u64 = 1_000;

pub fn app(service: Arc<GenerationService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/fractal", post(generate))
        .layer(cors_layer())
        .with_state(service)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct FractalRequest {
    iterations: Option<u32>,
    c: Option<[f64; 4]>,
    #[serde(rename = "gridSize")]
    grid_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FractalResponse {
    success: bool,
    vertices: Vec<f64>,
    indices: Vec<u32>,
    triangle_count: usize,
    vertex_count: usize,
    metadata: PayloadMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    retry_after_ms: Option<u64>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    fn busy() -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "a generation is already in progress, try again shortly".into(),
            retry_after_ms: Some(BUSY_RETRY_AFTER_MS),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            retry_after_ms: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                retry_after_ms: self.retry_after_ms,
            }),
        )
            .into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn generate(
    State(service): State<Arc<GenerationService>>,
    body: Bytes,
) -> Result<Json<FractalResponse>, ApiError> {
    let request: FractalRequest = parse_json(&body)?;
    let params = resolve_params(request)?;

    tracing::info!(
        iterations = params.iterations,
        grid_size = params.grid_size,
        "fractal generation requested"
    );

    match service.generate(&params).await {
        Ok(payload) => Ok(Json(payload_response(payload))),
        Err(GenerateError::Busy) => Err(ApiError::busy()),
        Err(err) => {
            tracing::error!(error = %err, "generation failed terminally");
            Err(ApiError::internal(format!("failed to generate fractal: {err}")))
        }
    }
}

fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("request body is required"));
    }

    serde_json::from_slice(body)
        .map_err(|err| ApiError::bad_request(format!("invalid JSON body: {err}")))
}

fn resolve_params(request: FractalRequest) -> Result<ParameterSet, ApiError> {
    let defaults = ParameterSet::default();
    let params = ParameterSet::new(
        request.iterations.unwrap_or(defaults.iterations),
        request.c.unwrap_or(defaults.c),
        request.grid_size.unwrap_or(defaults.grid_size),
    );

    params
        .validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    if params.iterations > MAX_ITERATIONS {
        return Err(ApiError::bad_request(format!(
            "iterations must be at most {MAX_ITERATIONS}"
        )));
    }
    if params.grid_size > MAX_GRID_SIZE {
        return Err(ApiError::bad_request(format!(
            "gridSize must be at most {MAX_GRID_SIZE}"
        )));
    }
    Ok(params)
}

fn payload_response(payload: GeometryPayload) -> FractalResponse {
    FractalResponse {
        success: true,
        vertices: payload.vertices,
        indices: payload.indices,
        triangle_count: payload.triangle_count,
        vertex_count: payload.vertex_count,
        metadata: payload.metadata,
    }
}
