//! Database integration tests for the ledger store and aggregator.
//!
//! Each test runs against its own migrated database via `#[sqlx::test]`.

use pricetrail_core::{
    ActorType, ChangeType, CompetitivenessImpact, EntryStatus, NewHistoryEntry, Page,
    PriceSnapshot, PriceSource, UpdateOutcome, ValidationState,
};
use pricetrail_db::{DateRange, DbError, HistoryFilters, HistorySort};
use rust_decimal::Decimal;
use uuid::Uuid;

fn dec(s: &str) -> Decimal {
    s.parse().expect("decimal literal")
}

fn entry(product_id: &str, sku: &str, previous: &str, applied: &str) -> NewHistoryEntry {
    NewHistoryEntry {
        product_id: product_id.to_string(),
        sku: sku.to_string(),
        product_name: Some(format!("Product {product_id}")),
        change_type: ChangeType::ManualUpdate,
        previous_prices: PriceSnapshot {
            marketplace: Some(dec(previous)),
            ..PriceSnapshot::default()
        },
        new_prices: PriceSnapshot {
            marketplace: Some(dec(applied)),
            ..PriceSnapshot::default()
        },
        applied_price: dec(applied),
        price_source: PriceSource::Manual,
        trigger: "manual edit".to_string(),
        description: "operator adjusted price".to_string(),
        strategy: None,
        metadata: None,
        changed_by: "ops@example.com".to_string(),
        actor_type: ActorType::User,
        initial_status: EntryStatus::Pending,
        competitiveness_impact: CompetitivenessImpact::Unknown,
        actions_triggered: vec![],
        validation: ValidationState::default(),
        source_action_id: None,
        config_snapshot: None,
        batch_id: None,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn create_derives_impact_fields(pool: sqlx::PgPool) {
    let row = pricetrail_db::create_history_entry(&pool, &entry("p1", "SKU-1", "19.99", "21.99"))
        .await
        .expect("create");

    assert_eq!(row.change_amount, dec("2.00"));
    assert_eq!(row.change_percentage, dec("10.01"));
    assert_eq!(row.price_direction, "increase");
    assert_eq!(row.status, "pending");
    assert!(row.completed_at.is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn create_rejects_empty_trigger(pool: sqlx::PgPool) {
    let mut bad = entry("p1", "SKU-1", "19.99", "21.99");
    bad.trigger = String::new();

    let err = pricetrail_db::create_history_entry(&pool, &bad)
        .await
        .expect_err("validation should fail");
    assert!(
        matches!(err, DbError::Validation { field, .. } if field == "trigger"),
        "expected trigger validation error, got: {err:?}"
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn applied_initial_status_is_completed_at_creation(pool: sqlx::PgPool) {
    let mut system = entry("p1", "SKU-1", "19.99", "18.49");
    system.initial_status = EntryStatus::Applied;
    system.actor_type = ActorType::System;

    let row = pricetrail_db::create_history_entry(&pool, &system)
        .await
        .expect("create");
    assert_eq!(row.status, "applied");
    assert!(row.completed_at.is_some());
    assert_eq!(row.processing_time_ms, Some(0));
}

#[sqlx::test(migrations = "../../migrations")]
async fn complete_moves_pending_to_applied(pool: sqlx::PgPool) {
    let row = pricetrail_db::create_history_entry(&pool, &entry("p1", "SKU-1", "19.99", "21.99"))
        .await
        .expect("create");

    let outcome = UpdateOutcome {
        success: true,
        local_updated: true,
        remote_updated: true,
        error_message: None,
    };
    let completed = pricetrail_db::complete_history_entry(&pool, row.public_id, &outcome)
        .await
        .expect("complete");

    assert_eq!(completed.status, "applied");
    assert!(completed.completed_at.is_some());
    assert!(completed.processing_time_ms.is_some());
    assert_eq!(completed.result.as_ref().unwrap()["success"], true);
}

#[sqlx::test(migrations = "../../migrations")]
async fn complete_moves_pending_to_failed(pool: sqlx::PgPool) {
    let row = pricetrail_db::create_history_entry(&pool, &entry("p1", "SKU-1", "19.99", "21.99"))
        .await
        .expect("create");

    let outcome = UpdateOutcome {
        success: false,
        local_updated: false,
        remote_updated: false,
        error_message: Some("marketplace rejected the update".to_string()),
    };
    let completed = pricetrail_db::complete_history_entry(&pool, row.public_id, &outcome)
        .await
        .expect("complete");
    assert_eq!(completed.status, "failed");
}

#[sqlx::test(migrations = "../../migrations")]
async fn complete_twice_is_rejected(pool: sqlx::PgPool) {
    let row = pricetrail_db::create_history_entry(&pool, &entry("p1", "SKU-1", "19.99", "21.99"))
        .await
        .expect("create");

    let outcome = UpdateOutcome {
        success: true,
        local_updated: true,
        remote_updated: true,
        error_message: None,
    };
    pricetrail_db::complete_history_entry(&pool, row.public_id, &outcome)
        .await
        .expect("first completion");

    let err = pricetrail_db::complete_history_entry(&pool, row.public_id, &outcome)
        .await
        .expect_err("second completion must fail");
    assert!(
        matches!(err, DbError::AlreadyCompleted { id } if id == row.public_id),
        "expected AlreadyCompleted, got: {err:?}"
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn complete_unknown_id_is_not_found(pool: sqlx::PgPool) {
    let outcome = UpdateOutcome::default();
    let err = pricetrail_db::complete_history_entry(&pool, Uuid::new_v4(), &outcome)
        .await
        .expect_err("unknown id");
    assert!(matches!(err, DbError::NotFound), "got: {err:?}");
}

#[sqlx::test(migrations = "../../migrations")]
async fn query_filters_compose_as_and(pool: sqlx::PgPool) {
    pricetrail_db::create_history_entry(&pool, &entry("p1", "WIDGET-A", "10.00", "11.00"))
        .await
        .expect("create");
    pricetrail_db::create_history_entry(&pool, &entry("p2", "WIDGET-B", "10.00", "9.00"))
        .await
        .expect("create");
    let mut other = entry("p3", "GADGET-C", "10.00", "12.00");
    other.change_type = ChangeType::PvpmRecalculation;
    other.changed_by = "pricing-engine".to_string();
    pricetrail_db::create_history_entry(&pool, &other)
        .await
        .expect("create");

    // SKU substring is case-insensitive.
    let (rows, total) = pricetrail_db::query_history(
        &pool,
        HistoryFilters {
            sku: Some("widget"),
            ..HistoryFilters::default()
        },
        HistorySort::default(),
        Page::default(),
    )
    .await
    .expect("query");
    assert_eq!(total, 2);
    assert_eq!(rows.len(), 2);

    // Adding a change-type filter narrows further.
    let (rows, total) = pricetrail_db::query_history(
        &pool,
        HistoryFilters {
            sku: Some("widget"),
            change_types: Some(&[ChangeType::PvpmRecalculation]),
            ..HistoryFilters::default()
        },
        HistorySort::default(),
        Page::default(),
    )
    .await
    .expect("query");
    assert_eq!(total, 0);
    assert!(rows.is_empty());

    // changed_by substring matches the engine actor.
    let (rows, total) = pricetrail_db::query_history(
        &pool,
        HistoryFilters {
            changed_by: Some("ENGINE"),
            ..HistoryFilters::default()
        },
        HistorySort::default(),
        Page::default(),
    )
    .await
    .expect("query");
    assert_eq!(total, 1);
    assert_eq!(rows[0].product_id, "p3");
}

#[sqlx::test(migrations = "../../migrations")]
async fn query_paginates_with_total_count(pool: sqlx::PgPool) {
    for i in 0..5 {
        pricetrail_db::create_history_entry(
            &pool,
            &entry(&format!("p{i}"), &format!("SKU-{i}"), "10.00", "11.00"),
        )
        .await
        .expect("create");
    }

    let page = Page::new(2, 2);
    let (rows, total) = pricetrail_db::query_history(
        &pool,
        HistoryFilters::default(),
        HistorySort::default(),
        page,
    )
    .await
    .expect("query");

    assert_eq!(total, 5);
    assert_eq!(rows.len(), 2);

    let info = page.info(total);
    assert_eq!(info.total_pages, 3);
    assert!(info.has_next);
    assert!(info.has_prev);
}

#[sqlx::test(migrations = "../../migrations")]
async fn batch_entries_share_one_batch_id(pool: sqlx::PgPool) {
    for i in 0..3 {
        let mut e = entry(&format!("p{i}"), &format!("SKU-{i}"), "10.00", "11.00");
        e.change_type = ChangeType::ConfigChange;
        e.batch_id = Some("batch_1234_abcd".to_string());
        pricetrail_db::create_history_entry(&pool, &e)
            .await
            .expect("create");
    }

    let rows = pricetrail_db::list_batch_entries(&pool, "batch_1234_abcd")
        .await
        .expect("list batch");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.change_type == "config_change"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_pending_counts_old_entries_only(pool: sqlx::PgPool) {
    let row = pricetrail_db::create_history_entry(&pool, &entry("p1", "SKU-1", "10.00", "11.00"))
        .await
        .expect("create");

    // Fresh pending entry is not stale yet.
    let count = pricetrail_db::count_stale_pending(&pool, 60)
        .await
        .expect("count");
    assert_eq!(count, 0);

    // Backdate the entry past the threshold.
    sqlx::query("UPDATE price_history SET started_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
        .bind(row.id)
        .execute(&pool)
        .await
        .expect("backdate");

    let count = pricetrail_db::count_stale_pending(&pool, 60)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

async fn seed_applied(pool: &sqlx::PgPool, product_id: &str, previous: &str, applied: &str) {
    let mut e = entry(product_id, &format!("SKU-{product_id}"), previous, applied);
    e.initial_status = EntryStatus::Applied;
    e.actor_type = ActorType::System;
    e.changed_by = "pricing-engine".to_string();
    pricetrail_db::create_history_entry(pool, &e)
        .await
        .expect("seed");
}

#[sqlx::test(migrations = "../../migrations")]
async fn period_summary_empty_range_is_zero_filled(pool: sqlx::PgPool) {
    let rows = pricetrail_db::period_summary(&pool, DateRange::last_days(30))
        .await
        .expect("summary");
    assert!(rows.is_empty());

    let counts = pricetrail_db::dashboard_counts(&pool, DateRange::last_days(30))
        .await
        .expect("counts");
    assert_eq!(counts.total_changes, 0);
    assert_eq!(counts.total_products, 0);
    assert_eq!(counts.applied, 0);
    assert_eq!(counts.failed, 0);
    assert_eq!(counts.total_impact, Decimal::ZERO);
    assert_eq!(counts.total_entries_ever, 0);
}

#[sqlx::test(migrations = "../../migrations")]
async fn period_summary_rolls_up_by_change_type(pool: sqlx::PgPool) {
    seed_applied(&pool, "p1", "10.00", "12.00").await;
    seed_applied(&pool, "p1", "12.00", "11.00").await;
    seed_applied(&pool, "p2", "20.00", "22.00").await;

    let rows = pricetrail_db::period_summary(&pool, DateRange::last_days(7))
        .await
        .expect("summary");
    assert_eq!(rows.len(), 1, "single change type seeded");

    let row = &rows[0];
    assert_eq!(row.change_type, "manual_update");
    assert_eq!(row.total, 3);
    assert_eq!(row.increases, 2);
    assert_eq!(row.decreases, 1);
    assert_eq!(row.products, 2);
    assert_eq!(row.total_amount, dec("3.00"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn pending_entries_are_excluded_from_summaries(pool: sqlx::PgPool) {
    seed_applied(&pool, "p1", "10.00", "12.00").await;
    pricetrail_db::create_history_entry(&pool, &entry("p2", "SKU-p2", "10.00", "15.00"))
        .await
        .expect("pending entry");

    let rows = pricetrail_db::period_summary(&pool, DateRange::last_days(7))
        .await
        .expect("summary");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn daily_trend_is_chronological(pool: sqlx::PgPool) {
    seed_applied(&pool, "p1", "10.00", "12.00").await;
    seed_applied(&pool, "p2", "20.00", "19.00").await;

    // Move one entry to yesterday.
    sqlx::query(
        "UPDATE price_history SET created_at = NOW() - INTERVAL '1 day' \
         WHERE product_id = 'p1'",
    )
    .execute(&pool)
    .await
    .expect("backdate");

    let rows = pricetrail_db::daily_trend(&pool, DateRange::last_days(7))
        .await
        .expect("trend");
    assert_eq!(rows.len(), 2);
    assert!(rows[0].day < rows[1].day, "ascending by day");
    assert_eq!(rows[0].increases, 1);
    assert_eq!(rows[1].decreases, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn top_products_sorts_by_change_count(pool: sqlx::PgPool) {
    seed_applied(&pool, "busy", "10.00", "12.00").await;
    seed_applied(&pool, "busy", "12.00", "13.00").await;
    seed_applied(&pool, "quiet", "20.00", "21.00").await;

    let rows = pricetrail_db::top_changed_products(&pool, DateRange::last_days(7))
        .await
        .expect("top products");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].product_id, "busy");
    assert_eq!(rows[0].total, 2);
    assert_eq!(rows[0].total_amount, dec("3.00"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn actor_breakdown_groups_by_actor(pool: sqlx::PgPool) {
    seed_applied(&pool, "p1", "10.00", "12.00").await;
    seed_applied(&pool, "p2", "10.00", "12.00").await;

    let rows = pricetrail_db::actor_breakdown(&pool, DateRange::last_days(7))
        .await
        .expect("actors");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].changed_by, "pricing-engine");
    assert_eq!(rows[0].actor_type, "system");
    assert_eq!(rows[0].total, 2);
    assert_eq!(rows[0].increases, 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn product_summary_tallies_and_recent(pool: sqlx::PgPool) {
    seed_applied(&pool, "p1", "10.00", "12.00").await;
    seed_applied(&pool, "p1", "12.00", "11.00").await;
    // Pending entry shows in recent but not in the applied aggregates.
    pricetrail_db::create_history_entry(&pool, &entry("p1", "SKU-p1", "11.00", "14.00"))
        .await
        .expect("pending");

    let summary = pricetrail_db::product_summary(&pool, "p1", 30)
        .await
        .expect("summary");
    assert_eq!(summary.total_changes, 2);
    assert_eq!(summary.increases, 1);
    assert_eq!(summary.decreases, 1);
    assert_eq!(summary.by_type.len(), 1);
    assert_eq!(summary.by_type[0].total, 2);
    assert_eq!(summary.recent.len(), 3);
}
