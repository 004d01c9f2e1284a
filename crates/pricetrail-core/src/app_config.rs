use std::net::SocketAddr;

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    /// When false the binary runs as a passive API worker and registers no
    /// recurring jobs.
    pub scheduler_enabled: bool,
    pub full_sync_cron: String,
    pub light_sync_cron: String,
    pub health_check_cron: String,
    /// Pending entries older than this are reported as stuck by the hourly
    /// ledger health check.
    pub pending_stale_after_mins: i64,
    pub default_margin_pct: Decimal,
    pub default_iva_pct: Decimal,
    pub default_shipping_cost: Decimal,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("scheduler_enabled", &self.scheduler_enabled)
            .field("full_sync_cron", &self.full_sync_cron)
            .field("light_sync_cron", &self.light_sync_cron)
            .field("health_check_cron", &self.health_check_cron)
            .field("pending_stale_after_mins", &self.pending_stale_after_mins)
            .field("default_margin_pct", &self.default_margin_pct)
            .field("default_iva_pct", &self.default_iva_pct)
            .field("default_shipping_cost", &self.default_shipping_cost)
            .finish()
    }
}
