//! Default recurring jobs: catalog resyncs and the ledger health check.

use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::PgPool;

use super::{JobAction, JobSchedule, OverlapPolicy, SchedulerError, SyncScheduler};

pub const FULL_SYNC_JOB: &str = "full_sync";
pub const LIGHT_SYNC_JOB: &str = "light_sync";
pub const LEDGER_HEALTH_JOB: &str = "ledger_health";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Full catalog resync.
    Full,
    /// Lightweight resync of recently changed products.
    Light,
}

/// Seam to the external catalog-sync collaborator. The scheduler only
/// drives the cadence; what a sync actually does lives outside this
/// service.
pub trait CatalogSync: Send + Sync {
    fn run(&self, kind: SyncKind) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Stand-in used until a real sync collaborator is wired in; logs and
/// succeeds.
pub struct NoopCatalogSync;

impl CatalogSync for NoopCatalogSync {
    fn run(&self, kind: SyncKind) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            tracing::info!(?kind, "catalog sync requested; no collaborator configured");
            Ok(())
        })
    }
}

/// Builds the scheduler, registers the default jobs with their configured
/// cron expressions, and starts it.
///
/// # Errors
///
/// Returns [`SchedulerError`] if a cron expression is rejected or the
/// scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<pricetrail_core::AppConfig>,
    sync: Arc<dyn CatalogSync>,
) -> Result<SyncScheduler, SchedulerError> {
    let scheduler = SyncScheduler::new().await?;

    scheduler
        .register(
            FULL_SYNC_JOB,
            JobSchedule::Cron(config.full_sync_cron.clone()),
            OverlapPolicy::Skip,
            sync_action(Arc::clone(&sync), SyncKind::Full),
        )
        .await?;
    scheduler
        .register(
            LIGHT_SYNC_JOB,
            JobSchedule::Cron(config.light_sync_cron.clone()),
            OverlapPolicy::Skip,
            sync_action(sync, SyncKind::Light),
        )
        .await?;
    scheduler
        .register(
            LEDGER_HEALTH_JOB,
            JobSchedule::Cron(config.health_check_cron.clone()),
            OverlapPolicy::Skip,
            health_action(pool, config.pending_stale_after_mins),
        )
        .await?;

    scheduler.start().await?;
    Ok(scheduler)
}

fn sync_action(sync: Arc<dyn CatalogSync>, kind: SyncKind) -> JobAction {
    Arc::new(move || sync.run(kind))
}

/// Counts `pending` entries older than the configured threshold and warns
/// when any are stuck. A stuck pending entry usually means the caller that
/// recorded it never reported its outcome.
fn health_action(pool: PgPool, stale_after_mins: i64) -> JobAction {
    Arc::new(move || {
        let pool = pool.clone();
        Box::pin(async move {
            let stale = pricetrail_db::count_stale_pending(&pool, stale_after_mins).await?;
            if stale > 0 {
                tracing::warn!(
                    stale,
                    older_than_mins = stale_after_mins,
                    "pending entries without a completion"
                );
            } else {
                tracing::debug!("no stale pending entries");
            }
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSync {
        full: AtomicUsize,
        light: AtomicUsize,
    }

    impl CatalogSync for Arc<CountingSync> {
        fn run(&self, kind: SyncKind) -> BoxFuture<'static, anyhow::Result<()>> {
            let this = Arc::clone(self);
            Box::pin(async move {
                match kind {
                    SyncKind::Full => this.full.fetch_add(1, Ordering::SeqCst),
                    SyncKind::Light => this.light.fetch_add(1, Ordering::SeqCst),
                };
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn sync_action_dispatches_by_kind() {
        let sync = Arc::new(CountingSync {
            full: AtomicUsize::new(0),
            light: AtomicUsize::new(0),
        });

        let full = sync_action(Arc::new(Arc::clone(&sync)), SyncKind::Full);
        let light = sync_action(Arc::new(Arc::clone(&sync)), SyncKind::Light);
        full().await.expect("full sync");
        light().await.expect("light sync");
        light().await.expect("light sync");

        assert_eq!(sync.full.load(Ordering::SeqCst), 1);
        assert_eq!(sync.light.load(Ordering::SeqCst), 2);
    }
}
