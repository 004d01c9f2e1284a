//! One builder per change-type scenario, all funneling through
//! [`Recorder::record_price_change`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::PgPool;

use pricetrail_core::{
    ActorType, ChangeMetadata, ChangeType, CompetitivenessImpact, EntryStatus, NewHistoryEntry,
    PriceSnapshot, PriceSource, ValidationState,
};
use pricetrail_db::{create_history_entry, DbError, HistoryEntryRow};

use crate::{pvpm_change_is_material, ConfigSnapshotProvider};

/// Identifier the recorder actor defaults to for system-computed changes.
const SYSTEM_ACTOR: &str = "pricing-engine";

/// Denormalized product reference carried into every entry.
#[derive(Debug, Clone, Copy)]
pub struct ProductRef<'a> {
    pub product_id: &'a str,
    pub sku: &'a str,
    pub product_name: Option<&'a str>,
}

/// A PVPM (cost-floor) recalculation to be recorded if material.
#[derive(Debug, Clone)]
pub struct PvpmRecalculation<'a> {
    pub product: ProductRef<'a>,
    pub previous_pvpm: Option<Decimal>,
    pub new_pvpm: Decimal,
    pub current_marketplace: Option<Decimal>,
    pub cost: Decimal,
    pub trigger: &'a str,
    /// Overrides the default system actor, e.g. when a user forced the
    /// recalculation.
    pub changed_by: Option<&'a str>,
    pub actor_type: Option<ActorType>,
}

/// A price movement made in response to a competitor.
#[derive(Debug, Clone)]
pub struct CompetitorResponse<'a> {
    pub product: ProductRef<'a>,
    pub previous_marketplace: Option<Decimal>,
    pub applied_price: Decimal,
    pub competitor_price: Option<Decimal>,
    pub previous_competitor_price: Option<Decimal>,
    pub had_buybox: bool,
    pub has_buybox: bool,
    pub strategy: &'a str,
    pub trigger: &'a str,
    pub changed_by: &'a str,
    pub competitiveness: CompetitivenessImpact,
}

/// A manually pinned price taking effect.
#[derive(Debug, Clone)]
pub struct FixedPriceSet<'a> {
    pub product: ProductRef<'a>,
    pub previous_marketplace: Option<Decimal>,
    pub previous_fixed: Option<Decimal>,
    pub fixed_price: Decimal,
    pub reason: &'a str,
    pub expires_at: Option<DateTime<Utc>>,
    pub trigger: &'a str,
    pub changed_by: &'a str,
}

/// A direct user price edit.
#[derive(Debug, Clone)]
pub struct ManualUpdate<'a> {
    pub product: ProductRef<'a>,
    pub previous_marketplace: Option<Decimal>,
    pub new_price: Decimal,
    pub trigger: &'a str,
    pub description: Option<&'a str>,
    pub changed_by: &'a str,
}

/// One product inside a configuration-driven batch. `new_pvpm` is `None`
/// when the floor has not been recalculated yet; the previous floor is
/// carried forward as the placeholder until a later PVPM entry documents
/// the result.
#[derive(Debug, Clone)]
pub struct BatchProduct<'a> {
    pub product: ProductRef<'a>,
    pub previous_pvpm: Option<Decimal>,
    pub new_pvpm: Option<Decimal>,
    pub current_marketplace: Option<Decimal>,
}

/// A pricing-configuration change fanned out over the affected products.
#[derive(Debug, Clone)]
pub struct ConfigChangeBatch<'a> {
    /// Shared correlation id, typically from
    /// [`crate::generate_batch_id`]. The caller keeps it to reconcile
    /// partial batches.
    pub batch_id: &'a str,
    pub changed_fields: &'a [String],
    pub previous_values: &'a Value,
    pub new_values: &'a Value,
    pub trigger: &'a str,
    pub changed_by: &'a str,
    pub products: &'a [BatchProduct<'a>],
}

/// Entries recorded for one bulk operation.
#[derive(Debug)]
pub struct BatchRecord {
    pub batch_id: String,
    pub entries: Vec<HistoryEntryRow>,
}

/// Normalizes pricing decisions into ledger entries. Holds the pool and the
/// configuration seam; one instance is shared by whatever made the decision.
#[derive(Clone)]
pub struct Recorder {
    pool: PgPool,
    config: Arc<dyn ConfigSnapshotProvider>,
}

impl Recorder {
    #[must_use]
    pub fn new(pool: PgPool, config: Arc<dyn ConfigSnapshotProvider>) -> Self {
        Self { pool, config }
    }

    /// Generic write path shared by every builder. Stamps the active
    /// configuration when the payload does not carry one, then performs the
    /// single ledger write. Store failures propagate uncaught; whether to
    /// retry recording is the caller's policy.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Validation`] or [`DbError::Sqlx`] from the store.
    pub async fn record_price_change(
        &self,
        mut entry: NewHistoryEntry,
    ) -> Result<HistoryEntryRow, DbError> {
        if entry.config_snapshot.is_none() {
            entry.config_snapshot = Some(self.config.current());
        }
        create_history_entry(&self.pool, &entry).await
    }

    /// Records a cost-floor recalculation, already in effect when recorded.
    ///
    /// Returns `Ok(None)` without touching the store when the floor moved
    /// less than one cent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger write fails.
    pub async fn record_pvpm_recalculation(
        &self,
        input: PvpmRecalculation<'_>,
    ) -> Result<Option<HistoryEntryRow>, DbError> {
        if !pvpm_change_is_material(input.previous_pvpm, input.new_pvpm) {
            tracing::debug!(
                product_id = input.product.product_id,
                "pvpm change below threshold; not recording"
            );
            return Ok(None);
        }

        let snapshot = self.config.current();
        let description = format!(
            "PVPM recalculated from {} to {} (cost {}, margin {}%, shipping {})",
            fmt_price(input.previous_pvpm),
            input.new_pvpm,
            input.cost,
            snapshot.margin_pct,
            snapshot.shipping_cost,
        );

        let entry = NewHistoryEntry {
            change_type: ChangeType::PvpmRecalculation,
            previous_prices: PriceSnapshot {
                marketplace: input.current_marketplace,
                pvpm: input.previous_pvpm,
                ..PriceSnapshot::default()
            },
            new_prices: PriceSnapshot {
                marketplace: input.current_marketplace,
                pvpm: Some(input.new_pvpm),
                ..PriceSnapshot::default()
            },
            applied_price: input.new_pvpm,
            price_source: PriceSource::Pvpm,
            trigger: input.trigger.to_string(),
            description,
            metadata: Some(ChangeMetadata::PvpmBreakdown {
                cost: input.cost,
                margin_pct: snapshot.margin_pct,
                shipping_cost: snapshot.shipping_cost,
                iva_pct: snapshot.iva_pct,
            }),
            changed_by: input.changed_by.unwrap_or(SYSTEM_ACTOR).to_string(),
            actor_type: input.actor_type.unwrap_or(ActorType::System),
            // System-computed and already in effect; no completion call follows.
            initial_status: EntryStatus::Applied,
            config_snapshot: Some(snapshot),
            ..base_entry(input.product)
        };

        self.record_price_change(entry).await.map(Some)
    }

    /// Records a competitor-driven price movement, pending until the remote
    /// update is confirmed through the completion contract.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger write fails.
    pub async fn record_competitor_response(
        &self,
        input: CompetitorResponse<'_>,
    ) -> Result<HistoryEntryRow, DbError> {
        let description = format!(
            "Competitor moved {} -> {}; responding with {} via {}",
            fmt_price(input.previous_competitor_price),
            fmt_price(input.competitor_price),
            input.applied_price,
            input.strategy,
        );

        let entry = NewHistoryEntry {
            change_type: ChangeType::CompetitorResponse,
            previous_prices: PriceSnapshot {
                marketplace: input.previous_marketplace,
                competitor: input.previous_competitor_price,
                ..PriceSnapshot::default()
            },
            new_prices: PriceSnapshot {
                marketplace: Some(input.applied_price),
                competitor: input.competitor_price,
                ..PriceSnapshot::default()
            },
            applied_price: input.applied_price,
            price_source: PriceSource::CompetitorStrategy,
            trigger: input.trigger.to_string(),
            description,
            strategy: Some(input.strategy.to_string()),
            metadata: Some(ChangeMetadata::Competitor {
                competitor_price: input.competitor_price,
                previous_competitor_price: input.previous_competitor_price,
                had_buybox: input.had_buybox,
                has_buybox: input.has_buybox,
                strategy_applied: input.strategy.to_string(),
            }),
            changed_by: input.changed_by.to_string(),
            actor_type: ActorType::System,
            competitiveness_impact: input.competitiveness,
            ..base_entry(input.product)
        };

        self.record_price_change(entry).await
    }

    /// Records the transition to a manually pinned price, pending until the
    /// update is confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger write fails.
    pub async fn record_fixed_price_set(
        &self,
        input: FixedPriceSet<'_>,
    ) -> Result<HistoryEntryRow, DbError> {
        let description = format!(
            "Fixed price set to {} (was {}): {}",
            input.fixed_price,
            fmt_price(input.previous_fixed),
            input.reason,
        );

        let entry = NewHistoryEntry {
            change_type: ChangeType::FixedPriceSet,
            previous_prices: PriceSnapshot {
                marketplace: input.previous_marketplace,
                fixed: input.previous_fixed,
                ..PriceSnapshot::default()
            },
            new_prices: PriceSnapshot {
                marketplace: Some(input.fixed_price),
                fixed: Some(input.fixed_price),
                ..PriceSnapshot::default()
            },
            applied_price: input.fixed_price,
            price_source: PriceSource::FixedPrice,
            trigger: input.trigger.to_string(),
            description,
            metadata: Some(ChangeMetadata::FixedPrice {
                reason: input.reason.to_string(),
                expires_at: input.expires_at,
            }),
            changed_by: input.changed_by.to_string(),
            actor_type: ActorType::User,
            ..base_entry(input.product)
        };

        self.record_price_change(entry).await
    }

    /// Records a direct user price edit, pending until confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the ledger write fails.
    pub async fn record_manual_update(
        &self,
        input: ManualUpdate<'_>,
    ) -> Result<HistoryEntryRow, DbError> {
        let description = input.description.map_or_else(
            || {
                format!(
                    "Manual price update {} -> {}",
                    fmt_price(input.previous_marketplace),
                    input.new_price,
                )
            },
            ToString::to_string,
        );

        let entry = NewHistoryEntry {
            change_type: ChangeType::ManualUpdate,
            previous_prices: PriceSnapshot {
                marketplace: input.previous_marketplace,
                ..PriceSnapshot::default()
            },
            new_prices: PriceSnapshot {
                marketplace: Some(input.new_price),
                ..PriceSnapshot::default()
            },
            applied_price: input.new_price,
            price_source: PriceSource::Manual,
            trigger: input.trigger.to_string(),
            description,
            changed_by: input.changed_by.to_string(),
            actor_type: ActorType::User,
            ..base_entry(input.product)
        };

        self.record_price_change(entry).await
    }

    /// Fans a configuration change out into one entry per affected product,
    /// all sharing the caller's batch id.
    ///
    /// Writes are sequential with no cross-entry transaction: an error
    /// propagates immediately and already-written entries stay put. The
    /// batch id is the caller's unit for detecting and retrying partial
    /// batches. A product whose floor has not been recalculated yet is
    /// recorded with its previous floor carried forward; the later PVPM
    /// entry documents the recalculated result.
    ///
    /// # Errors
    ///
    /// Returns the first [`DbError`] encountered; earlier writes are not
    /// rolled back.
    pub async fn record_config_change_batch(
        &self,
        input: ConfigChangeBatch<'_>,
    ) -> Result<BatchRecord, DbError> {
        let snapshot = self.config.current();
        let fields = input.changed_fields.join(", ");
        let mut entries = Vec::with_capacity(input.products.len());

        for item in input.products {
            let placeholder_floor = item.new_pvpm.or(item.previous_pvpm);
            let applied_price = placeholder_floor
                .or(item.current_marketplace)
                .unwrap_or(Decimal::ZERO);
            let description = format!(
                "Pricing configuration changed ({fields}); PVPM {} -> {}",
                fmt_price(item.previous_pvpm),
                placeholder_floor.map_or_else(
                    || "pending recalculation".to_string(),
                    |p| p.to_string()
                ),
            );

            let entry = NewHistoryEntry {
                change_type: ChangeType::ConfigChange,
                previous_prices: PriceSnapshot {
                    marketplace: item.current_marketplace,
                    pvpm: item.previous_pvpm,
                    ..PriceSnapshot::default()
                },
                new_prices: PriceSnapshot {
                    marketplace: item.current_marketplace,
                    pvpm: placeholder_floor,
                    ..PriceSnapshot::default()
                },
                applied_price,
                price_source: PriceSource::Pvpm,
                trigger: input.trigger.to_string(),
                description,
                metadata: Some(ChangeMetadata::ConfigDiff {
                    changed_fields: input.changed_fields.to_vec(),
                    previous_values: input.previous_values.clone(),
                    new_values: input.new_values.clone(),
                }),
                changed_by: input.changed_by.to_string(),
                actor_type: ActorType::System,
                initial_status: EntryStatus::Applied,
                config_snapshot: Some(snapshot),
                batch_id: Some(input.batch_id.to_string()),
                ..base_entry(item.product)
            };

            entries.push(self.record_price_change(entry).await?);
        }

        Ok(BatchRecord {
            batch_id: input.batch_id.to_string(),
            entries,
        })
    }
}

/// Common payload scaffolding shared by every builder: product reference,
/// empty validation, pending status, defaults everywhere else.
fn base_entry(product: ProductRef<'_>) -> NewHistoryEntry {
    NewHistoryEntry {
        product_id: product.product_id.to_string(),
        sku: product.sku.to_string(),
        product_name: product.product_name.map(ToString::to_string),
        change_type: ChangeType::ManualUpdate,
        previous_prices: PriceSnapshot::default(),
        new_prices: PriceSnapshot::default(),
        applied_price: Decimal::ZERO,
        price_source: PriceSource::Manual,
        trigger: String::new(),
        description: String::new(),
        strategy: None,
        metadata: None,
        changed_by: String::new(),
        actor_type: ActorType::System,
        initial_status: EntryStatus::Pending,
        competitiveness_impact: CompetitivenessImpact::Unknown,
        actions_triggered: vec![],
        validation: ValidationState::default(),
        source_action_id: None,
        config_snapshot: None,
        batch_id: None,
    }
}

fn fmt_price(price: Option<Decimal>) -> String {
    price.map_or_else(|| "n/a".to_string(), |p| p.to_string())
}
