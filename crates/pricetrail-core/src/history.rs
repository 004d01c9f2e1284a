//! Domain model for the price-change audit ledger.
//!
//! Every price mutation applied to a catalog item — PVPM (cost-floor)
//! recalculation, competitor response, fixed price, manual edit, batch
//! reconfiguration — is recorded as one immutable-once-completed history
//! entry. The types here are storage-agnostic; derived fields are computed
//! by [`Impact::derive`] and never trusted from input.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

pub const TRIGGER_MAX_LEN: usize = 200;
pub const DESCRIPTION_MAX_LEN: usize = 1000;

/// Raised when a stored or user-supplied enum string has no known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// The closed set of recorded change scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Recomputation of the cost-based floor price (PVPM).
    PvpmRecalculation,
    CompetitorResponse,
    ManualUpdate,
    FixedPriceSet,
    FixedPriceRemoved,
    ConfigChange,
    BulkOperation,
    SystemCorrection,
    AmazonSync,
    WebOfferAdjustment,
}

text_enum!(ChangeType, "change type", {
    PvpmRecalculation => "pvpm_recalculation",
    CompetitorResponse => "competitor_response",
    ManualUpdate => "manual_update",
    FixedPriceSet => "fixed_price_set",
    FixedPriceRemoved => "fixed_price_removed",
    ConfigChange => "config_change",
    BulkOperation => "bulk_operation",
    SystemCorrection => "system_correction",
    AmazonSync => "amazon_sync",
    WebOfferAdjustment => "web_offer_adjustment",
});

impl ChangeType {
    /// All variants, in declaration order.
    #[must_use]
    pub const fn all() -> [ChangeType; 10] {
        [
            Self::PvpmRecalculation,
            Self::CompetitorResponse,
            Self::ManualUpdate,
            Self::FixedPriceSet,
            Self::FixedPriceRemoved,
            Self::ConfigChange,
            Self::BulkOperation,
            Self::SystemCorrection,
            Self::AmazonSync,
            Self::WebOfferAdjustment,
        ]
    }
}

/// Which pricing strategy produced the applied price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Pvpm,
    FixedPrice,
    CompetitorStrategy,
    Manual,
    ExternalSync,
}

text_enum!(PriceSource, "price source", {
    Pvpm => "pvpm",
    FixedPrice => "fixed_price",
    CompetitorStrategy => "competitor_strategy",
    Manual => "manual",
    ExternalSync => "external_sync",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    User,
    System,
    Scheduler,
    Api,
}

text_enum!(ActorType, "actor type", {
    User => "user",
    System => "system",
    Scheduler => "scheduler",
    Api => "api",
});

/// Entry lifecycle. Transitions only ever move forward out of `Pending`;
/// a completed entry receives no further writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Applied,
    Failed,
    PartiallyApplied,
}

text_enum!(EntryStatus, "entry status", {
    Pending => "pending",
    Applied => "applied",
    Failed => "failed",
    PartiallyApplied => "partially_applied",
});

impl EntryStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
    Increase,
    Decrease,
    NoChange,
}

text_enum!(PriceDirection, "price direction", {
    Increase => "increase",
    Decrease => "decrease",
    NoChange => "no_change",
});

/// Caller-assessed effect on competitive position. Defaults to `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitivenessImpact {
    Improved,
    Maintained,
    Decreased,
    #[default]
    Unknown,
}

text_enum!(CompetitivenessImpact, "competitiveness impact", {
    Improved => "improved",
    Maintained => "maintained",
    Decreased => "decreased",
    Unknown => "unknown",
});

/// Per-source price observation, taken before and after a change. Any source
/// may be absent (a product without a fixed price, no competitor offer, …).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub marketplace: Option<Decimal>,
    pub pvpm: Option<Decimal>,
    pub fixed: Option<Decimal>,
    pub competitor: Option<Decimal>,
}

/// Shape-per-scenario context payload, tagged by `kind` in storage.
///
/// The recorder matches exhaustively so that every change type carries the
/// variant that belongs to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeMetadata {
    Competitor {
        competitor_price: Option<Decimal>,
        previous_competitor_price: Option<Decimal>,
        had_buybox: bool,
        has_buybox: bool,
        strategy_applied: String,
    },
    PvpmBreakdown {
        cost: Decimal,
        margin_pct: Decimal,
        shipping_cost: Decimal,
        iva_pct: Decimal,
    },
    FixedPrice {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },
    ConfigDiff {
        changed_fields: Vec<String>,
        previous_values: Value,
        new_values: Value,
    },
    WebOffer {
        conflicts_with_fixed: bool,
        conflicts_with_pvpm: bool,
        resolution: String,
    },
}

/// Outcome of a pre-change check that may not have run at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    #[default]
    Unknown,
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub warning_type: String,
    pub message: String,
    pub severity: WarningSeverity,
}

/// Pre-change validation outcome stamped onto the entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationState {
    pub pvpm_check: CheckResult,
    pub web_offer_check: CheckResult,
    pub margin_check: CheckResult,
    pub competitor_check: CheckResult,
    #[serde(default)]
    pub warnings: Vec<ValidationWarning>,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

/// Result of the real-world price update, merged into the entry by the
/// single completion write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub success: bool,
    pub local_updated: bool,
    pub remote_updated: bool,
    pub error_message: Option<String>,
}

impl UpdateOutcome {
    /// Terminal status implied by this outcome: `Applied` on success,
    /// `PartiallyApplied` when exactly one channel was updated, otherwise
    /// `Failed`.
    #[must_use]
    pub const fn final_status(&self) -> EntryStatus {
        if self.success {
            EntryStatus::Applied
        } else if self.local_updated != self.remote_updated {
            EntryStatus::PartiallyApplied
        } else {
            EntryStatus::Failed
        }
    }
}

/// Pricing configuration active at record time, stamped into each entry so
/// historical decisions stay reproducible after the config moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub margin_pct: Decimal,
    pub iva_pct: Decimal,
    pub shipping_cost: Decimal,
}

/// Derived impact fields. Always recomputed at creation from the applied
/// price and the previous marketplace price; never client-supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Impact {
    pub change_amount: Decimal,
    pub change_percentage: Decimal,
    pub direction: PriceDirection,
}

impl Impact {
    /// Movement below one cent in either direction counts as no change.
    const DIRECTION_THRESHOLD: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    #[must_use]
    pub fn derive(applied_price: Decimal, previous_marketplace: Option<Decimal>) -> Self {
        let previous = previous_marketplace.unwrap_or(Decimal::ZERO);
        let change_amount = applied_price - previous;

        let change_percentage = if previous > Decimal::ZERO {
            (change_amount / previous * Decimal::ONE_HUNDRED).round_dp(2)
        } else {
            Decimal::ZERO
        };

        let direction = if change_amount > Self::DIRECTION_THRESHOLD {
            PriceDirection::Increase
        } else if change_amount < -Self::DIRECTION_THRESHOLD {
            PriceDirection::Decrease
        } else {
            PriceDirection::NoChange
        };

        Self {
            change_amount,
            change_percentage,
            direction,
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid history entry: {field} {reason}")]
pub struct EntryValidationError {
    pub field: &'static str,
    pub reason: String,
}

/// Creation payload consumed by the ledger store.
///
/// `sku` and `product_name` are denormalized from the external catalog so
/// filtering and CSV export never need a join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub product_id: String,
    pub sku: String,
    pub product_name: Option<String>,
    pub change_type: ChangeType,
    pub previous_prices: PriceSnapshot,
    pub new_prices: PriceSnapshot,
    pub applied_price: Decimal,
    pub price_source: PriceSource,
    pub trigger: String,
    pub description: String,
    pub strategy: Option<String>,
    pub metadata: Option<ChangeMetadata>,
    pub changed_by: String,
    pub actor_type: ActorType,
    /// `Pending` for changes awaiting an external update, `Applied` for
    /// system changes already in effect when recorded.
    pub initial_status: EntryStatus,
    pub competitiveness_impact: CompetitivenessImpact,
    pub actions_triggered: Vec<String>,
    pub validation: ValidationState,
    pub source_action_id: Option<String>,
    pub config_snapshot: Option<ConfigSnapshot>,
    pub batch_id: Option<String>,
}

impl NewHistoryEntry {
    /// Rejects incomplete or malformed payloads before anything touches
    /// storage.
    ///
    /// # Errors
    ///
    /// Returns [`EntryValidationError`] naming the offending field.
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        let non_empty = |field: &'static str, value: &str| {
            if value.trim().is_empty() {
                Err(EntryValidationError {
                    field,
                    reason: "must not be empty".to_string(),
                })
            } else {
                Ok(())
            }
        };

        non_empty("product_id", &self.product_id)?;
        non_empty("sku", &self.sku)?;
        non_empty("trigger", &self.trigger)?;
        non_empty("description", &self.description)?;
        non_empty("changed_by", &self.changed_by)?;

        if self.applied_price < Decimal::ZERO {
            return Err(EntryValidationError {
                field: "applied_price",
                reason: format!("must be non-negative, got {}", self.applied_price),
            });
        }
        if self.trigger.len() > TRIGGER_MAX_LEN {
            return Err(EntryValidationError {
                field: "trigger",
                reason: format!("exceeds {TRIGGER_MAX_LEN} characters"),
            });
        }
        if self.description.len() > DESCRIPTION_MAX_LEN {
            return Err(EntryValidationError {
                field: "description",
                reason: format!("exceeds {DESCRIPTION_MAX_LEN} characters"),
            });
        }
        if matches!(self.initial_status, EntryStatus::Failed | EntryStatus::PartiallyApplied) {
            return Err(EntryValidationError {
                field: "initial_status",
                reason: "entries start as pending or applied".to_string(),
            });
        }

        Ok(())
    }
}
