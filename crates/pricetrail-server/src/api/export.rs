//! CSV export of the history listing. Spreadsheet-facing, so the product
//! name is always quoted and money columns carry two decimals.

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    Extension,
};
use rust_decimal::Decimal;

use pricetrail_db::HistoryEntryRow;

use crate::middleware::RequestId;

use super::history::{parse_sort, HistoryQuery, ParsedFilters};
use super::{map_db_error, ApiError, AppState};

const CSV_HEADER: &str = "Date,SKU,Product name,Change type,Previous price,New applied price,\
                          Difference,Percentage,Trigger,Changed-by,Status";

pub(super) async fn export_csv(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let parsed = ParsedFilters::from_query(&query, &req_id.0)?;

    let rows = pricetrail_db::export_history(&state.pool, parsed.filters(&query), parse_sort(&query))
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let mut csv = String::with_capacity(rows.len() * 128 + CSV_HEADER.len() + 1);
    csv.push_str(CSV_HEADER);
    csv.push('\n');
    for row in &rows {
        csv.push_str(&csv_line(row));
        csv.push('\n');
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"price-history.csv\"".to_string(),
            ),
        ],
        csv,
    ))
}

fn csv_line(row: &HistoryEntryRow) -> String {
    let mut difference = row.change_amount;
    difference.rescale(2);
    let mut percentage = row.change_percentage;
    percentage.rescale(2);

    [
        row.created_at.to_rfc3339(),
        escape(&row.sku),
        quote(row.product_name.as_deref().unwrap_or("")),
        row.change_type.clone(),
        row.prev_marketplace.map(two_dp).unwrap_or_default(),
        two_dp(row.applied_price),
        difference.to_string(),
        format!("{percentage}%"),
        escape(&row.trigger_event),
        escape(&row.changed_by),
        row.status.clone(),
    ]
    .join(",")
}

fn two_dp(mut value: Decimal) -> String {
    value.rescale(2);
    value.to_string()
}

/// Quotes only when the value needs it.
fn escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quote(value)
    } else {
        value.to_string()
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
