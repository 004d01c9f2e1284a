//! Read-model aggregations over the price-change ledger.
//!
//! Everything here is a pure read: grouped summaries for dashboards and
//! exports, computed over `status = 'applied'` entries unless documented
//! otherwise. A range with zero matching entries yields zero-filled
//! summaries, never an error. Query failures surface as
//! [`DbError::Aggregation`] so callers never act on partial numbers.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use pricetrail_core::Page;

use crate::history::{HistoryEntryRow, HistoryFilters, HistorySort, ENTRY_COLUMNS};
use crate::DbError;

/// Inclusive creation-time window for an aggregation.
#[derive(Debug, Clone, Copy)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// The trailing `days`-day window ending now.
    #[must_use]
    pub fn last_days(days: i64) -> Self {
        let to = Utc::now();
        Self {
            from: to - chrono::Duration::days(days.max(0)),
            to,
        }
    }
}

/// Per-change-type rollup within a period.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TypeSummaryRow {
    pub change_type: String,
    pub total: i64,
    pub increases: i64,
    pub decreases: i64,
    pub products: i64,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DirectionCountRow {
    pub price_direction: String,
    pub total: i64,
}

/// One calendar day (UTC) of applied changes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DailyTrendRow {
    pub day: NaiveDate,
    pub total: i64,
    pub increases: i64,
    pub decreases: i64,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActorSummaryRow {
    pub changed_by: String,
    pub actor_type: String,
    pub total: i64,
    pub increases: i64,
    pub decreases: i64,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TopProductRow {
    pub product_id: String,
    pub sku: String,
    pub total: i64,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TypeCountRow {
    pub change_type: String,
    pub total: i64,
}

/// Headline counters for the dashboard.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DashboardCounts {
    /// All entries created in the range, any status.
    pub total_changes: i64,
    pub total_products: i64,
    pub applied: i64,
    pub failed: i64,
    /// Summed `change_amount` over applied entries in the range.
    pub total_impact: Decimal,
    /// All-time entry count, ignoring the range.
    pub total_entries_ever: i64,
}

/// Single-product rollup over a trailing window.
#[derive(Debug, Clone)]
pub struct ProductSummary {
    pub total_changes: i64,
    pub increases: i64,
    pub decreases: i64,
    pub unchanged: i64,
    pub by_type: Vec<TypeCountRow>,
    pub total_amount: Decimal,
    pub avg_amount: Decimal,
    /// The 10 most recent entries for the product, any status.
    pub recent: Vec<HistoryEntryRow>,
}

/// Applied changes per change type: totals, direction counts, distinct
/// products, summed and averaged impact. Ordered by total descending.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if the query fails.
pub async fn period_summary(
    pool: &PgPool,
    range: DateRange,
) -> Result<Vec<TypeSummaryRow>, DbError> {
    sqlx::query_as::<_, TypeSummaryRow>(
        "SELECT change_type, \
                COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE price_direction = 'increase') AS increases, \
                COUNT(*) FILTER (WHERE price_direction = 'decrease') AS decreases, \
                COUNT(DISTINCT product_id) AS products, \
                COALESCE(SUM(change_amount), 0) AS total_amount, \
                COALESCE(AVG(change_amount), 0) AS avg_amount \
         FROM price_history \
         WHERE status = 'applied' AND created_at >= $1 AND created_at <= $2 \
         GROUP BY change_type \
         ORDER BY total DESC, change_type",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .map_err(DbError::Aggregation)
}

/// Applied changes per price direction.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if the query fails.
pub async fn direction_breakdown(
    pool: &PgPool,
    range: DateRange,
) -> Result<Vec<DirectionCountRow>, DbError> {
    sqlx::query_as::<_, DirectionCountRow>(
        "SELECT price_direction, COUNT(*) AS total \
         FROM price_history \
         WHERE status = 'applied' AND created_at >= $1 AND created_at <= $2 \
         GROUP BY price_direction \
         ORDER BY total DESC, price_direction",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .map_err(DbError::Aggregation)
}

/// Applied changes grouped by UTC calendar day, chronological ascending.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if the query fails.
pub async fn daily_trend(pool: &PgPool, range: DateRange) -> Result<Vec<DailyTrendRow>, DbError> {
    sqlx::query_as::<_, DailyTrendRow>(
        "SELECT (created_at AT TIME ZONE 'UTC')::DATE AS day, \
                COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE price_direction = 'increase') AS increases, \
                COUNT(*) FILTER (WHERE price_direction = 'decrease') AS decreases, \
                COALESCE(SUM(change_amount), 0) AS total_amount \
         FROM price_history \
         WHERE status = 'applied' AND created_at >= $1 AND created_at <= $2 \
         GROUP BY day \
         ORDER BY day ASC",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .map_err(DbError::Aggregation)
}

/// Applied changes grouped by actor, most active first.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if the query fails.
pub async fn actor_breakdown(
    pool: &PgPool,
    range: DateRange,
) -> Result<Vec<ActorSummaryRow>, DbError> {
    sqlx::query_as::<_, ActorSummaryRow>(
        "SELECT changed_by, actor_type, \
                COUNT(*) AS total, \
                COUNT(*) FILTER (WHERE price_direction = 'increase') AS increases, \
                COUNT(*) FILTER (WHERE price_direction = 'decrease') AS decreases, \
                COALESCE(SUM(change_amount), 0) AS total_amount \
         FROM price_history \
         WHERE status = 'applied' AND created_at >= $1 AND created_at <= $2 \
         GROUP BY changed_by, actor_type \
         ORDER BY total DESC",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .map_err(DbError::Aggregation)
}

/// The ten most-changed products in the range. Ties stay in grouping order;
/// no secondary sort is applied.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if the query fails.
pub async fn top_changed_products(
    pool: &PgPool,
    range: DateRange,
) -> Result<Vec<TopProductRow>, DbError> {
    sqlx::query_as::<_, TopProductRow>(
        "SELECT product_id, \
                MAX(sku) AS sku, \
                COUNT(*) AS total, \
                COALESCE(SUM(change_amount), 0) AS total_amount, \
                COALESCE(AVG(change_amount), 0) AS avg_amount \
         FROM price_history \
         WHERE status = 'applied' AND created_at >= $1 AND created_at <= $2 \
         GROUP BY product_id \
         ORDER BY total DESC \
         LIMIT 10",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .map_err(DbError::Aggregation)
}

/// Headline counters: range totals, status split, impact, all-time count.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if the query fails.
pub async fn dashboard_counts(pool: &PgPool, range: DateRange) -> Result<DashboardCounts, DbError> {
    sqlx::query_as::<_, DashboardCounts>(
        "SELECT \
             COUNT(*) FILTER (WHERE created_at >= $1 AND created_at <= $2) AS total_changes, \
             COUNT(DISTINCT product_id) \
                 FILTER (WHERE created_at >= $1 AND created_at <= $2) AS total_products, \
             COUNT(*) FILTER (WHERE status = 'applied' \
                 AND created_at >= $1 AND created_at <= $2) AS applied, \
             COUNT(*) FILTER (WHERE status IN ('failed', 'partially_applied') \
                 AND created_at >= $1 AND created_at <= $2) AS failed, \
             COALESCE(SUM(change_amount) FILTER (WHERE status = 'applied' \
                 AND created_at >= $1 AND created_at <= $2), 0) AS total_impact, \
             COUNT(*) AS total_entries_ever \
         FROM price_history",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_one(pool)
    .await
    .map_err(DbError::Aggregation)
}

/// Rollup for a single product over the trailing `days`-day window.
///
/// Aggregates cover applied entries; the recent list carries any status so
/// pending and failed changes stay visible.
///
/// # Errors
///
/// Returns [`DbError::Aggregation`] if any aggregate query fails, or
/// [`DbError::Sqlx`] if the recent-entries listing fails.
pub async fn product_summary(
    pool: &PgPool,
    product_id: &str,
    days: i64,
) -> Result<ProductSummary, DbError> {
    let range = DateRange::last_days(days);

    let (total_changes, increases, decreases, unchanged, total_amount, avg_amount): (
        i64,
        i64,
        i64,
        i64,
        Decimal,
        Decimal,
    ) = sqlx::query_as(
        "SELECT COUNT(*), \
                COUNT(*) FILTER (WHERE price_direction = 'increase'), \
                COUNT(*) FILTER (WHERE price_direction = 'decrease'), \
                COUNT(*) FILTER (WHERE price_direction = 'no_change'), \
                COALESCE(SUM(change_amount), 0), \
                COALESCE(AVG(change_amount), 0) \
         FROM price_history \
         WHERE product_id = $1 AND status = 'applied' \
           AND created_at >= $2 AND created_at <= $3",
    )
    .bind(product_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_one(pool)
    .await
    .map_err(DbError::Aggregation)?;

    let by_type = sqlx::query_as::<_, TypeCountRow>(
        "SELECT change_type, COUNT(*) AS total \
         FROM price_history \
         WHERE product_id = $1 AND status = 'applied' \
           AND created_at >= $2 AND created_at <= $3 \
         GROUP BY change_type \
         ORDER BY total DESC, change_type",
    )
    .bind(product_id)
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await
    .map_err(DbError::Aggregation)?;

    let recent_sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history \
         WHERE product_id = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT 10"
    );
    let recent = sqlx::query_as::<_, HistoryEntryRow>(&recent_sql)
        .bind(product_id)
        .fetch_all(pool)
        .await?;

    Ok(ProductSummary {
        total_changes,
        increases,
        decreases,
        unchanged,
        by_type,
        total_amount,
        avg_amount,
        recent,
    })
}

/// The ten most recent entries overall, any status. Used for the dashboard
/// recent-changes strip.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn recent_entries(pool: &PgPool, limit: i64) -> Result<Vec<HistoryEntryRow>, DbError> {
    let page = Page::new(1, limit);
    let (rows, _) = crate::history::query_history(
        pool,
        HistoryFilters::default(),
        HistorySort::default(),
        page,
    )
    .await?;
    Ok(rows)
}
