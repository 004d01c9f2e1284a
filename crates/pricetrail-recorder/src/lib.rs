//! Builders that normalize pricing decisions into ledger entries.
//!
//! Each change-type scenario has one builder on [`Recorder`]; every builder
//! snapshots the active pricing configuration, produces a fully-populated
//! payload, and performs exactly one durable write through the ledger
//! store. Network calls belong to the caller, who reports the real-world
//! outcome later through the entry-completion contract.

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;

use pricetrail_core::ConfigSnapshot;

mod builders;

pub use builders::{
    BatchProduct, BatchRecord, CompetitorResponse, ConfigChangeBatch, FixedPriceSet, ManualUpdate,
    ProductRef, PvpmRecalculation, Recorder,
};

/// Supplies the pricing configuration active right now, stamped into each
/// entry for historical reproducibility. Read-only; the configuration
/// itself is owned elsewhere.
pub trait ConfigSnapshotProvider: Send + Sync {
    fn current(&self) -> ConfigSnapshot;
}

/// Fixed in-process configuration, typically built from `AppConfig`
/// defaults at startup.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfigProvider {
    snapshot: ConfigSnapshot,
}

impl StaticConfigProvider {
    #[must_use]
    pub const fn new(snapshot: ConfigSnapshot) -> Self {
        Self { snapshot }
    }
}

impl ConfigSnapshotProvider for StaticConfigProvider {
    fn current(&self) -> ConfigSnapshot {
        self.snapshot
    }
}

/// Builds a collision-resistant correlation id for one bulk operation:
/// `{prefix}_{unix_millis}_{8 random alphanumerics}`.
#[must_use]
pub fn generate_batch_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Floor-price churn below one cent is not audit-worthy; the PVPM builder
/// skips recording entirely when this returns false.
#[must_use]
pub fn pvpm_change_is_material(previous: Option<Decimal>, new: Decimal) -> bool {
    let threshold = Decimal::new(1, 2);
    (new - previous.unwrap_or(Decimal::ZERO)).abs() >= threshold
}
