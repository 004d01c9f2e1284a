use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pricetrail_db::DateRange;

use crate::middleware::RequestId;

use super::history::HistoryItem;
use super::{map_db_error, ApiError, ApiResponse, AppState, ResponseMeta};

const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_WINDOW_DAYS: i64 = 365;
const RECENT_CHANGES_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub(super) struct WindowQuery {
    pub days: Option<i64>,
}

fn clamp_days(days: Option<i64>) -> i64 {
    days.unwrap_or(DEFAULT_WINDOW_DAYS).clamp(1, MAX_WINDOW_DAYS)
}

#[derive(Debug, Serialize)]
pub(super) struct DashboardData {
    pub period: PeriodBlock,
    pub summary: SummaryBlock,
    pub breakdown: BreakdownBlock,
    pub recent_changes: Vec<HistoryItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct PeriodBlock {
    pub days: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub(super) struct SummaryBlock {
    pub total_changes: i64,
    pub total_products: i64,
    pub successful_changes: i64,
    pub failed_changes: i64,
    /// Percentage with one decimal place; `0.0` when nothing completed.
    pub success_rate: Decimal,
    /// Summed applied impact, two decimal places.
    pub total_price_impact: Decimal,
    pub total_entries_ever: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct BreakdownBlock {
    pub by_type: Vec<TypeBlock>,
    pub by_direction: Vec<DirectionBlock>,
    pub daily_trend: Vec<DailyBlock>,
}

#[derive(Debug, Serialize)]
pub(super) struct TypeBlock {
    pub change_type: String,
    pub total: i64,
    pub increases: i64,
    pub decreases: i64,
    pub products: i64,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
}

#[derive(Debug, Serialize)]
pub(super) struct DirectionBlock {
    pub direction: String,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub(super) struct DailyBlock {
    pub day: NaiveDate,
    pub total: i64,
    pub increases: i64,
    pub decreases: i64,
    pub total_amount: Decimal,
}

fn success_rate(applied: i64, failed: i64) -> Decimal {
    let completed = applied + failed;
    let mut rate = if completed > 0 {
        (Decimal::from(applied) / Decimal::from(completed) * Decimal::ONE_HUNDRED).round_dp(1)
    } else {
        Decimal::ZERO
    };
    rate.rescale(1);
    rate
}

pub(super) async fn dashboard(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ApiResponse<DashboardData>>, ApiError> {
    let days = clamp_days(query.days);
    let range = DateRange::last_days(days);

    let counts = pricetrail_db::dashboard_counts(&state.pool, range)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let by_type = pricetrail_db::period_summary(&state.pool, range)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let by_direction = pricetrail_db::direction_breakdown(&state.pool, range)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let daily = pricetrail_db::daily_trend(&state.pool, range)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let recent = pricetrail_db::recent_entries(&state.pool, RECENT_CHANGES_LIMIT)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let mut total_price_impact = counts.total_impact;
    total_price_impact.rescale(2);

    Ok(Json(ApiResponse {
        data: DashboardData {
            period: PeriodBlock {
                days,
                start_date: range.from,
                end_date: range.to,
            },
            summary: SummaryBlock {
                total_changes: counts.total_changes,
                total_products: counts.total_products,
                successful_changes: counts.applied,
                failed_changes: counts.failed,
                success_rate: success_rate(counts.applied, counts.failed),
                total_price_impact,
                total_entries_ever: counts.total_entries_ever,
            },
            breakdown: BreakdownBlock {
                by_type: by_type
                    .into_iter()
                    .map(|r| TypeBlock {
                        change_type: r.change_type,
                        total: r.total,
                        increases: r.increases,
                        decreases: r.decreases,
                        products: r.products,
                        total_amount: r.total_amount,
                        avg_amount: r.avg_amount,
                    })
                    .collect(),
                by_direction: by_direction
                    .into_iter()
                    .map(|r| DirectionBlock {
                        direction: r.price_direction,
                        total: r.total,
                    })
                    .collect(),
                daily_trend: daily
                    .into_iter()
                    .map(|r| DailyBlock {
                        day: r.day,
                        total: r.total,
                        increases: r.increases,
                        decreases: r.decreases,
                        total_amount: r.total_amount,
                    })
                    .collect(),
            },
            recent_changes: recent.into_iter().map(HistoryItem::from).collect(),
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct ProductSummaryData {
    pub product_id: String,
    pub days: i64,
    pub total_changes: i64,
    pub increases: i64,
    pub decreases: i64,
    pub unchanged: i64,
    pub by_type: Vec<DirectionlessTypeBlock>,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
    pub recent: Vec<HistoryItem>,
}

#[derive(Debug, Serialize)]
pub(super) struct DirectionlessTypeBlock {
    pub change_type: String,
    pub total: i64,
}

pub(super) async fn product_summary(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(product_id): Path<String>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<ApiResponse<ProductSummaryData>>, ApiError> {
    let days = clamp_days(query.days);
    let summary = pricetrail_db::product_summary(&state.pool, &product_id, days)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: ProductSummaryData {
            product_id,
            days,
            total_changes: summary.total_changes,
            increases: summary.increases,
            decreases: summary.decreases,
            unchanged: summary.unchanged,
            by_type: summary
                .by_type
                .into_iter()
                .map(|r| DirectionlessTypeBlock {
                    change_type: r.change_type,
                    total: r.total,
                })
                .collect(),
            total_amount: summary.total_amount,
            avg_amount: summary.avg_amount,
            recent: summary.recent.into_iter().map(HistoryItem::from).collect(),
        },
        meta: ResponseMeta::new(req_id.0),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_one_decimal_percentage() {
        assert_eq!(success_rate(1, 1).to_string(), "50.0");
        assert_eq!(success_rate(2, 1).to_string(), "66.7");
        assert_eq!(success_rate(0, 0).to_string(), "0.0");
        assert_eq!(success_rate(3, 0).to_string(), "100.0");
    }

    #[test]
    fn window_days_clamp_to_sane_range() {
        assert_eq!(clamp_days(None), 30);
        assert_eq!(clamp_days(Some(0)), 1);
        assert_eq!(clamp_days(Some(10_000)), 365);
        assert_eq!(clamp_days(Some(7)), 7);
    }
}
