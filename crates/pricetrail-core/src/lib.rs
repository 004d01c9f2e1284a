use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for environment variable {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

mod app_config;
mod config;
pub mod history;
pub mod page;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use history::{
    ActorType, ChangeMetadata, ChangeType, CheckResult, CompetitivenessImpact, ConfigSnapshot,
    EntryStatus, EntryValidationError, Impact, NewHistoryEntry, PriceDirection, PriceSnapshot,
    PriceSource, UnknownVariant, UpdateOutcome, ValidationState, ValidationWarning,
    WarningSeverity, DESCRIPTION_MAX_LEN, TRIGGER_MAX_LEN,
};
pub use page::{Page, PageInfo};
