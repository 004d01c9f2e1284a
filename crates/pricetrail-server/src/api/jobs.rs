//! Scheduler introspection and forced runs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct JobItem {
    pub name: String,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct JobTriggered {
    pub job: String,
    pub status: &'static str,
}

pub(super) async fn list_jobs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Json<ApiResponse<Vec<JobItem>>> {
    let data = match &state.scheduler {
        Some(scheduler) => scheduler
            .job_statuses()
            .await
            .into_iter()
            .map(|s| JobItem {
                name: s.name,
                schedule: s.schedule,
                next_run: s.next_run,
                is_running: s.is_running,
            })
            .collect(),
        None => Vec::new(),
    };

    Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    })
}

/// Kicks off one execution outside the schedule and returns immediately;
/// the tick runs in the background through the job's overlap guard.
pub(super) async fn run_job(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<JobTriggered>>, ApiError> {
    let Some(scheduler) = &state.scheduler else {
        return Err(ApiError::new(
            req_id.0,
            "not_found",
            "scheduler is disabled",
        ));
    };

    if !scheduler.contains(&name).await {
        return Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("no job registered under name {name:?}"),
        ));
    }

    let scheduler = Arc::clone(scheduler);
    let job = name.clone();
    tokio::spawn(async move {
        if let Err(e) = scheduler.run_now(&job).await {
            tracing::error!(job = %job, error = %e, "forced run failed");
        }
    });

    Ok(Json(ApiResponse {
        data: JobTriggered {
            job: name,
            status: "triggered",
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}
