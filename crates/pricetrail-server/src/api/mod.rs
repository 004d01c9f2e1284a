mod export;
mod history;
mod jobs;
mod stats;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::middleware::{request_id, RequestId};
use crate::scheduler::SyncScheduler;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    /// Present only when the scheduler is enabled; the introspection
    /// endpoints report an empty registry otherwise.
    pub scheduler: Option<Arc<SyncScheduler>>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

impl ResponseMeta {
    pub(super) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Translates store errors into the envelope. Validation, missing-entry,
/// and double-completion failures are the caller's problem; everything
/// else is logged and reported opaquely.
pub(super) fn map_db_error(request_id: String, error: &pricetrail_db::DbError) -> ApiError {
    use pricetrail_db::DbError;
    match error {
        DbError::Validation { field, reason } => ApiError::new(
            request_id,
            "validation_error",
            format!("{field}: {reason}"),
        ),
        DbError::NotFound => ApiError::new(request_id, "not_found", "history entry not found"),
        DbError::AlreadyCompleted { id } => ApiError::new(
            request_id,
            "conflict",
            format!("history entry {id} is already completed"),
        ),
        _ => {
            tracing::error!(error = %error, "database query failed");
            ApiError::new(request_id, "internal_error", "database query failed")
        }
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ])
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/history", get(history::list_history))
        .route("/api/v1/history/dashboard", get(stats::dashboard))
        .route("/api/v1/history/export.csv", get(export::export_csv))
        .route(
            "/api/v1/history/product/{product_id}/summary",
            get(stats::product_summary),
        )
        .route("/api/v1/history/{public_id}", get(history::get_history_entry))
        .route(
            "/api/v1/history/{public_id}/complete",
            post(history::complete_history_entry),
        )
        .route("/api/v1/scheduler/jobs", get(jobs::list_jobs))
        .route("/api/v1/scheduler/jobs/{name}/run", post(jobs::run_job))
        .layer(
            ServiceBuilder::new()
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> impl IntoResponse {
    let meta = ResponseMeta::new(req_id.0);

    match pricetrail_db::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ApiResponse {
                data: HealthData {
                    status: "ok",
                    database: "ok",
                },
                meta,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse {
                    data: HealthData {
                        status: "degraded",
                        database: "unavailable",
                    },
                    meta,
                }),
            )
        }
    }
}
