//! The ledger store: durable operations on `price_history`.
//!
//! Entries are created in `pending` (or `applied` for already-executed
//! system changes), finalized exactly once by [`complete_history_entry`],
//! and never deleted here — retention is an external concern.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use pricetrail_core::{ChangeType, EntryStatus, Impact, NewHistoryEntry, UpdateOutcome};

use crate::DbError;

/// Full column list of `price_history`, shared by every SELECT/RETURNING.
pub(crate) const ENTRY_COLUMNS: &str = "id, public_id, product_id, sku, product_name, change_type, \
     prev_marketplace, prev_pvpm, prev_fixed, prev_competitor, \
     new_marketplace, new_pvpm, new_fixed, new_competitor, \
     applied_price, price_source, trigger_event, description, strategy, metadata, \
     changed_by, actor_type, status, started_at, completed_at, processing_time_ms, result, \
     validation, change_amount, change_percentage, price_direction, competitiveness_impact, \
     actions_triggered, source_action_id, config_snapshot, batch_id, created_at";

/// AND-composed optional filters; each `$n IS NULL` guard disables the
/// corresponding predicate when the filter is absent.
const FILTER_CLAUSE: &str = "($1::TEXT[] IS NULL OR change_type = ANY($1)) \
     AND ($2::TEXT IS NULL OR status = $2) \
     AND ($3::TEXT IS NULL OR changed_by ILIKE '%' || $3 || '%') \
     AND ($4::TEXT IS NULL OR product_id = $4) \
     AND ($5::TEXT IS NULL OR sku ILIKE '%' || $5 || '%') \
     AND ($6::TIMESTAMPTZ IS NULL OR created_at >= $6) \
     AND ($7::TIMESTAMPTZ IS NULL OR created_at <= $7)";

/// A row from the `price_history` table. Enum-typed columns are kept as the
/// stored text; [`pricetrail_core`] parsers apply where callers need the
/// typed view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryEntryRow {
    pub id: i64,
    pub public_id: Uuid,
    pub product_id: String,
    pub sku: String,
    pub product_name: Option<String>,
    pub change_type: String,
    pub prev_marketplace: Option<Decimal>,
    pub prev_pvpm: Option<Decimal>,
    pub prev_fixed: Option<Decimal>,
    pub prev_competitor: Option<Decimal>,
    pub new_marketplace: Option<Decimal>,
    pub new_pvpm: Option<Decimal>,
    pub new_fixed: Option<Decimal>,
    pub new_competitor: Option<Decimal>,
    pub applied_price: Decimal,
    pub price_source: String,
    pub trigger_event: String,
    pub description: String,
    pub strategy: Option<String>,
    pub metadata: Option<Value>,
    pub changed_by: String,
    pub actor_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
    pub result: Option<Value>,
    pub validation: Value,
    pub change_amount: Decimal,
    pub change_percentage: Decimal,
    pub price_direction: String,
    pub competitiveness_impact: String,
    pub actions_triggered: Vec<String>,
    pub source_action_id: Option<String>,
    pub config_snapshot: Option<Value>,
    pub batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input filters for history listing.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilters<'a> {
    pub change_types: Option<&'a [ChangeType]>,
    pub status: Option<EntryStatus>,
    pub changed_by: Option<&'a str>,
    pub product_id: Option<&'a str>,
    pub sku: Option<&'a str>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

/// Whitelisted sort columns; anything else falls back to creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    CreatedAt,
    AppliedPrice,
    ChangeAmount,
    CompletedAt,
    ProcessingTimeMs,
}

impl SortField {
    #[must_use]
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("applied_price") => Self::AppliedPrice,
            Some("change_amount") => Self::ChangeAmount,
            Some("completed_at") => Self::CompletedAt,
            Some("processing_time_ms") => Self::ProcessingTimeMs,
            _ => Self::CreatedAt,
        }
    }

    const fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::AppliedPrice => "applied_price",
            Self::ChangeAmount => "change_amount",
            Self::CompletedAt => "completed_at",
            Self::ProcessingTimeMs => "processing_time_ms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }

    const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HistorySort {
    pub field: SortField,
    pub order: SortOrder,
}

/// Validates the payload, derives the impact fields, and inserts one entry.
///
/// The derived `change_amount` / `change_percentage` / `price_direction`
/// always come from [`Impact::derive`]; any impact values a caller might
/// have computed are ignored by construction.
///
/// # Errors
///
/// Returns [`DbError::Validation`] for incomplete or malformed payloads and
/// [`DbError::Sqlx`] if the insert fails.
pub async fn create_history_entry(
    pool: &PgPool,
    entry: &NewHistoryEntry,
) -> Result<HistoryEntryRow, DbError> {
    entry.validate()?;

    let impact = Impact::derive(entry.applied_price, entry.previous_prices.marketplace);
    let public_id = Uuid::new_v4();

    let metadata = entry
        .metadata
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| DbError::Validation {
            field: "metadata",
            reason: e.to_string(),
        })?;
    let validation = serde_json::to_value(&entry.validation).map_err(|e| DbError::Validation {
        field: "validation",
        reason: e.to_string(),
    })?;
    let config_snapshot = entry
        .config_snapshot
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| DbError::Validation {
            field: "config_snapshot",
            reason: e.to_string(),
        })?;

    let sql = format!(
        "INSERT INTO price_history \
             (public_id, product_id, sku, product_name, change_type, \
              prev_marketplace, prev_pvpm, prev_fixed, prev_competitor, \
              new_marketplace, new_pvpm, new_fixed, new_competitor, \
              applied_price, price_source, trigger_event, description, strategy, metadata, \
              changed_by, actor_type, status, completed_at, processing_time_ms, \
              validation, change_amount, change_percentage, price_direction, \
              competitiveness_impact, actions_triggered, source_action_id, \
              config_snapshot, batch_id) \
         VALUES ($1, $2, $3, $4, $5, \
                 $6, $7, $8, $9, \
                 $10, $11, $12, $13, \
                 $14, $15, $16, $17, $18, $19, \
                 $20, $21, $22, \
                 CASE WHEN $22 = 'applied' THEN NOW() END, \
                 CASE WHEN $22 = 'applied' THEN 0 END, \
                 $23, $24, $25, $26, \
                 $27, $28, $29, \
                 $30, $31) \
         RETURNING {ENTRY_COLUMNS}"
    );

    let row = sqlx::query_as::<_, HistoryEntryRow>(&sql)
        .bind(public_id)
        .bind(&entry.product_id)
        .bind(&entry.sku)
        .bind(&entry.product_name)
        .bind(entry.change_type.as_str())
        .bind(entry.previous_prices.marketplace)
        .bind(entry.previous_prices.pvpm)
        .bind(entry.previous_prices.fixed)
        .bind(entry.previous_prices.competitor)
        .bind(entry.new_prices.marketplace)
        .bind(entry.new_prices.pvpm)
        .bind(entry.new_prices.fixed)
        .bind(entry.new_prices.competitor)
        .bind(entry.applied_price)
        .bind(entry.price_source.as_str())
        .bind(&entry.trigger)
        .bind(&entry.description)
        .bind(&entry.strategy)
        .bind(metadata)
        .bind(&entry.changed_by)
        .bind(entry.actor_type.as_str())
        .bind(entry.initial_status.as_str())
        .bind(validation)
        .bind(impact.change_amount)
        .bind(impact.change_percentage)
        .bind(impact.direction.as_str())
        .bind(entry.competitiveness_impact.as_str())
        .bind(&entry.actions_triggered)
        .bind(&entry.source_action_id)
        .bind(config_snapshot)
        .bind(&entry.batch_id)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// The single completion write: terminal status from the outcome,
/// `completed_at = NOW()`, processing time from `started_at`, result merged.
///
/// Guarded by `status = 'pending'` so a completed entry can never be
/// rewritten or moved back.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for an unknown id,
/// [`DbError::AlreadyCompleted`] when the entry already left `pending`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn complete_history_entry(
    pool: &PgPool,
    public_id: Uuid,
    outcome: &UpdateOutcome,
) -> Result<HistoryEntryRow, DbError> {
    let result = serde_json::to_value(outcome).map_err(|e| DbError::Validation {
        field: "result",
        reason: e.to_string(),
    })?;

    let sql = format!(
        "UPDATE price_history \
         SET status = $2, \
             completed_at = NOW(), \
             processing_time_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT, \
             result = $3 \
         WHERE public_id = $1 AND status = 'pending' \
         RETURNING {ENTRY_COLUMNS}"
    );

    let row = sqlx::query_as::<_, HistoryEntryRow>(&sql)
        .bind(public_id)
        .bind(outcome.final_status().as_str())
        .bind(result)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(row),
        None => {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT status FROM price_history WHERE public_id = $1")
                    .bind(public_id)
                    .fetch_optional(pool)
                    .await?;
            match existing {
                Some(_) => Err(DbError::AlreadyCompleted { id: public_id }),
                None => Err(DbError::NotFound),
            }
        }
    }
}

/// Fetches a single entry by its public id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_history_entry(pool: &PgPool, public_id: Uuid) -> Result<HistoryEntryRow, DbError> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM price_history WHERE public_id = $1");

    sqlx::query_as::<_, HistoryEntryRow>(&sql)
        .bind(public_id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Filtered, sorted, paginated listing plus the total matching count.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either query fails.
pub async fn query_history(
    pool: &PgPool,
    filters: HistoryFilters<'_>,
    sort: HistorySort,
    page: pricetrail_core::Page,
) -> Result<(Vec<HistoryEntryRow>, i64), DbError> {
    let change_types: Option<Vec<String>> = filters
        .change_types
        .map(|cts| cts.iter().map(|ct| ct.as_str().to_string()).collect());
    let status = filters.status.map(EntryStatus::as_str);

    let count_sql = format!("SELECT COUNT(*) FROM price_history WHERE {FILTER_CLAUSE}");
    let total: i64 = sqlx::query_scalar(&count_sql)
        .bind(&change_types)
        .bind(status)
        .bind(filters.changed_by)
        .bind(filters.product_id)
        .bind(filters.sku)
        .bind(filters.date_from)
        .bind(filters.date_to)
        .fetch_one(pool)
        .await?;

    let order = sort.order.keyword();
    let rows_sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history \
         WHERE {FILTER_CLAUSE} \
         ORDER BY {column} {order}, id {order} \
         LIMIT $8 OFFSET $9",
        column = sort.field.column(),
    );

    let rows = sqlx::query_as::<_, HistoryEntryRow>(&rows_sql)
        .bind(&change_types)
        .bind(status)
        .bind(filters.changed_by)
        .bind(filters.product_id)
        .bind(filters.sku)
        .bind(filters.date_from)
        .bind(filters.date_to)
        .bind(page.page_size())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok((rows, total))
}

/// Export cap; a CSV export never streams more rows than this.
const EXPORT_ROW_LIMIT: i64 = 10_000;

/// Every entry matching the filters, without the listing's page clamp.
/// Capped at 10k rows so an unfiltered export stays bounded.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn export_history(
    pool: &PgPool,
    filters: HistoryFilters<'_>,
    sort: HistorySort,
) -> Result<Vec<HistoryEntryRow>, DbError> {
    let change_types: Option<Vec<String>> = filters
        .change_types
        .map(|cts| cts.iter().map(|ct| ct.as_str().to_string()).collect());
    let status = filters.status.map(EntryStatus::as_str);

    let order = sort.order.keyword();
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history \
         WHERE {FILTER_CLAUSE} \
         ORDER BY {column} {order}, id {order} \
         LIMIT $8",
        column = sort.field.column(),
    );

    let rows = sqlx::query_as::<_, HistoryEntryRow>(&sql)
        .bind(&change_types)
        .bind(status)
        .bind(filters.changed_by)
        .bind(filters.product_id)
        .bind(filters.sku)
        .bind(filters.date_from)
        .bind(filters.date_to)
        .bind(EXPORT_ROW_LIMIT)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// All entries recorded under one bulk-operation batch id, oldest first.
/// This is the unit callers use to detect and reconcile partial batches.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_batch_entries(
    pool: &PgPool,
    batch_id: &str,
) -> Result<Vec<HistoryEntryRow>, DbError> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM price_history \
         WHERE batch_id = $1 \
         ORDER BY created_at ASC, id ASC"
    );

    let rows = sqlx::query_as::<_, HistoryEntryRow>(&sql)
        .bind(batch_id)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Counts `pending` entries whose completion call has not arrived within
/// the given window. Used by the scheduled ledger health check.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_stale_pending(pool: &PgPool, older_than_mins: i64) -> Result<i64, DbError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM price_history \
         WHERE status = 'pending' \
           AND started_at < NOW() - ($1 * INTERVAL '1 minute')",
    )
    .bind(older_than_mins)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_field_parses_whitelisted_columns() {
        assert_eq!(SortField::parse(Some("applied_price")), SortField::AppliedPrice);
        assert_eq!(SortField::parse(Some("change_amount")), SortField::ChangeAmount);
        assert_eq!(SortField::parse(Some("completed_at")), SortField::CompletedAt);
        assert_eq!(
            SortField::parse(Some("processing_time_ms")),
            SortField::ProcessingTimeMs
        );
    }

    #[test]
    fn sort_field_falls_back_to_created_at() {
        assert_eq!(SortField::parse(None), SortField::CreatedAt);
        // A hostile sort parameter must never reach the ORDER BY clause.
        assert_eq!(
            SortField::parse(Some("id; DROP TABLE price_history")),
            SortField::CreatedAt
        );
    }

    #[test]
    fn sort_order_defaults_to_descending() {
        assert_eq!(SortOrder::parse(None), SortOrder::Desc);
        assert_eq!(SortOrder::parse(Some("asc")), SortOrder::Asc);
        assert_eq!(SortOrder::parse(Some("upward")), SortOrder::Desc);
    }

    #[test]
    fn default_sort_is_newest_first() {
        let sort = HistorySort::default();
        assert_eq!(sort.field, SortField::CreatedAt);
        assert_eq!(sort.order, SortOrder::Desc);
    }

    #[test]
    fn default_filters_are_empty() {
        let filters = HistoryFilters::default();
        assert!(filters.change_types.is_none());
        assert!(filters.status.is_none());
        assert!(filters.changed_by.is_none());
        assert!(filters.product_id.is_none());
        assert!(filters.sku.is_none());
        assert!(filters.date_from.is_none());
        assert!(filters.date_to.is_none());
    }
}
