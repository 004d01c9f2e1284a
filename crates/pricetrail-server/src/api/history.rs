use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pricetrail_core::{ChangeType, EntryStatus, Page, PageInfo, UpdateOutcome};
use pricetrail_db::{HistoryEntryRow, HistoryFilters, HistorySort, SortField, SortOrder};

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

/// One ledger entry as exposed over the API. Prices serialize as decimal
/// strings.
#[derive(Debug, Serialize)]
pub(super) struct HistoryItem {
    pub public_id: Uuid,
    pub product_id: String,
    pub sku: String,
    pub product_name: Option<String>,
    pub change_type: String,
    pub previous_prices: PriceSnapshotBody,
    pub new_prices: PriceSnapshotBody,
    pub applied_price: Decimal,
    pub price_source: String,
    pub trigger: String,
    pub description: String,
    pub strategy: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub changed_by: String,
    pub actor_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub change_amount: Decimal,
    pub change_percentage: Decimal,
    pub price_direction: String,
    pub competitiveness_impact: String,
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct PriceSnapshotBody {
    pub marketplace: Option<Decimal>,
    pub pvpm: Option<Decimal>,
    pub fixed: Option<Decimal>,
    pub competitor: Option<Decimal>,
}

impl From<HistoryEntryRow> for HistoryItem {
    fn from(row: HistoryEntryRow) -> Self {
        Self {
            public_id: row.public_id,
            product_id: row.product_id,
            sku: row.sku,
            product_name: row.product_name,
            change_type: row.change_type,
            previous_prices: PriceSnapshotBody {
                marketplace: row.prev_marketplace,
                pvpm: row.prev_pvpm,
                fixed: row.prev_fixed,
                competitor: row.prev_competitor,
            },
            new_prices: PriceSnapshotBody {
                marketplace: row.new_marketplace,
                pvpm: row.new_pvpm,
                fixed: row.new_fixed,
                competitor: row.new_competitor,
            },
            applied_price: row.applied_price,
            price_source: row.price_source,
            trigger: row.trigger_event,
            description: row.description,
            strategy: row.strategy,
            metadata: row.metadata,
            changed_by: row.changed_by,
            actor_type: row.actor_type,
            status: row.status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            processing_time_ms: row.processing_time_ms,
            result: row.result,
            change_amount: row.change_amount,
            change_percentage: row.change_percentage,
            price_direction: row.price_direction,
            competitiveness_impact: row.competitiveness_impact,
            batch_id: row.batch_id,
            created_at: row.created_at,
        }
    }
}

/// Query parameters shared by the listing and the CSV export.
#[derive(Debug, Deserialize)]
pub(super) struct HistoryQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub change_type: Option<String>,
    pub status: Option<String>,
    pub changed_by: Option<String>,
    pub product_id: Option<String>,
    pub sku: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Typed filter values parsed out of the raw query; [`HistoryFilters`]
/// borrows from this.
pub(super) struct ParsedFilters {
    change_types: Option<Vec<ChangeType>>,
    status: Option<EntryStatus>,
}

impl ParsedFilters {
    /// `change_type` accepts a comma-separated list; `all`, empty, or
    /// absent means no filter. Unknown variants are rejected rather than
    /// silently ignored.
    pub(super) fn from_query(query: &HistoryQuery, req_id: &str) -> Result<Self, ApiError> {
        let change_types = match query.change_type.as_deref() {
            None | Some("all" | "") => None,
            Some(raw) => {
                let mut parsed = Vec::new();
                for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let ct = ChangeType::from_str(part).map_err(|e| {
                        ApiError::new(req_id.to_string(), "validation_error", e.to_string())
                    })?;
                    parsed.push(ct);
                }
                if parsed.is_empty() {
                    None
                } else {
                    Some(parsed)
                }
            }
        };

        let status = match query.status.as_deref() {
            None | Some("all" | "") => None,
            Some(raw) => Some(EntryStatus::from_str(raw).map_err(|e| {
                ApiError::new(req_id.to_string(), "validation_error", e.to_string())
            })?),
        };

        Ok(Self {
            change_types,
            status,
        })
    }

    pub(super) fn filters<'a>(&'a self, query: &'a HistoryQuery) -> HistoryFilters<'a> {
        HistoryFilters {
            change_types: self.change_types.as_deref(),
            status: self.status,
            changed_by: query.changed_by.as_deref(),
            product_id: query.product_id.as_deref(),
            sku: query.sku.as_deref(),
            date_from: query.date_from,
            date_to: query.date_to,
        }
    }
}

pub(super) fn parse_sort(query: &HistoryQuery) -> HistorySort {
    HistorySort {
        field: SortField::parse(query.sort_by.as_deref()),
        order: SortOrder::parse(query.sort_order.as_deref()),
    }
}

#[derive(Debug, Serialize)]
pub(super) struct HistoryListData {
    pub items: Vec<HistoryItem>,
    pub pagination: PageInfo,
}

pub(super) async fn list_history(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<HistoryListData>>, ApiError> {
    let parsed = ParsedFilters::from_query(&query, &req_id.0)?;
    let page = Page::from_params(query.page, query.limit);

    let (rows, total) = pricetrail_db::query_history(
        &state.pool,
        parsed.filters(&query),
        parse_sort(&query),
        page,
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: HistoryListData {
            items: rows.into_iter().map(HistoryItem::from).collect(),
            pagination: page.info(total),
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn get_history_entry(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(public_id): Path<Uuid>,
) -> Result<Json<ApiResponse<HistoryItem>>, ApiError> {
    let row = pricetrail_db::get_history_entry(&state.pool, public_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: HistoryItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct CompleteRequest {
    success: bool,
    #[serde(default)]
    outcome: OutcomeBody,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OutcomeBody {
    #[serde(default)]
    local_updated: bool,
    #[serde(default)]
    remote_updated: bool,
    error_message: Option<String>,
}

/// The entry-completion contract: one write moving the entry out of
/// `pending`. Completing a completed entry is a conflict.
pub(super) async fn complete_history_entry(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(public_id): Path<Uuid>,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<ApiResponse<HistoryItem>>, ApiError> {
    let outcome = UpdateOutcome {
        success: body.success,
        local_updated: body.outcome.local_updated,
        remote_updated: body.outcome.remote_updated,
        error_message: body.outcome.error_message,
    };

    let row = pricetrail_db::complete_history_entry(&state.pool, public_id, &outcome)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: HistoryItem::from(row),
        meta: ResponseMeta::new(req_id.0),
    }))
}
