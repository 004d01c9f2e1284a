//! Background job scheduler.
//!
//! Wraps a [`JobScheduler`] in an explicit named-job registry so jobs can
//! be inspected, forced, and cancelled at runtime. Constructed at startup
//! only when `PRICETRAIL_SCHEDULER_ENABLED` is set; otherwise the binary
//! runs as a passive API worker.

pub mod jobs;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Recurrence rule kept as data so introspection can report it verbatim.
#[derive(Debug, Clone)]
pub enum JobSchedule {
    /// Six-field cron expression (seconds first), evaluated in UTC.
    Cron(String),
    Every(Duration),
}

impl JobSchedule {
    fn describe(&self) -> String {
        match self {
            Self::Cron(expr) => expr.clone(),
            Self::Every(d) => format!("every {}s", d.as_secs()),
        }
    }
}

/// What to do when a tick fires while the previous one is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Drop the new tick and log it.
    #[default]
    Skip,
    /// Wait for the in-flight tick, then run.
    Queue,
}

/// One tick of work. Failures are logged at the scheduler boundary and
/// never unschedule the job.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no job registered under name {0:?}")]
    JobNotFound(String),
    #[error(transparent)]
    Scheduler(#[from] JobSchedulerError),
}

/// Introspection view of one registered job.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub is_running: bool,
}

struct ManagedJob {
    id: uuid::Uuid,
    schedule: JobSchedule,
    policy: OverlapPolicy,
    action: JobAction,
    guard: Arc<Mutex<()>>,
    running: Arc<AtomicBool>,
}

/// Named-job registry over [`JobScheduler`]. The handle must be kept alive
/// for the lifetime of the process; dropping it stops all timers.
pub struct SyncScheduler {
    inner: JobScheduler,
    jobs: Arc<RwLock<HashMap<String, ManagedJob>>>,
}

impl SyncScheduler {
    /// # Errors
    ///
    /// Returns [`JobSchedulerError`] if the underlying scheduler cannot be
    /// initialised.
    pub async fn new() -> Result<Self, JobSchedulerError> {
        Ok(Self {
            inner: JobScheduler::new().await?,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Registers a recurring job under a unique name. Re-registering a name
    /// replaces the previous timer.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Scheduler`] if the recurrence rule is
    /// rejected or the job cannot be added.
    pub async fn register(
        &self,
        name: &str,
        schedule: JobSchedule,
        policy: OverlapPolicy,
        action: JobAction,
    ) -> Result<(), SchedulerError> {
        let guard = Arc::new(Mutex::new(()));
        let running = Arc::new(AtomicBool::new(false));

        let tick_name = name.to_string();
        let tick_action = Arc::clone(&action);
        let tick_guard = Arc::clone(&guard);
        let tick_running = Arc::clone(&running);
        let make_tick = move |_uuid, _lock| {
            let name = tick_name.clone();
            let action = Arc::clone(&tick_action);
            let guard = Arc::clone(&tick_guard);
            let running = Arc::clone(&tick_running);
            Box::pin(async move {
                execute_guarded(&name, policy, &guard, &running, &action).await;
            }) as BoxFuture<'static, ()>
        };

        let job = match &schedule {
            JobSchedule::Cron(expr) => Job::new_async(expr.as_str(), make_tick)?,
            JobSchedule::Every(period) => Job::new_repeated_async(*period, make_tick)?,
        };
        let id = self.inner.add(job).await?;

        let previous = self.jobs.write().await.insert(
            name.to_string(),
            ManagedJob {
                id,
                schedule,
                policy,
                action,
                guard,
                running,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(job = name, "replacing previously registered job");
            self.inner.remove(&previous.id).await?;
        }

        tracing::info!(job = name, "job registered");
        Ok(())
    }

    /// Starts firing registered timers.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Scheduler`] if the underlying scheduler
    /// fails to start.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.inner.start().await?;
        Ok(())
    }

    /// Forces one execution outside the normal schedule, through the same
    /// overlap guard as a timed tick. Waits for the tick to finish (or to
    /// be skipped, under [`OverlapPolicy::Skip`] with a tick in flight).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::JobNotFound`] for unknown names.
    pub async fn run_now(&self, name: &str) -> Result<(), SchedulerError> {
        let (policy, action, guard, running) = {
            let jobs = self.jobs.read().await;
            let job = jobs
                .get(name)
                .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
            (
                job.policy,
                Arc::clone(&job.action),
                Arc::clone(&job.guard),
                Arc::clone(&job.running),
            )
        };

        tracing::info!(job = name, "forced run requested");
        execute_guarded(name, policy, &guard, &running, &action).await;
        Ok(())
    }

    /// Releases the job's timer. An in-flight tick runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::JobNotFound`] for unknown names.
    pub async fn cancel(&self, name: &str) -> Result<(), SchedulerError> {
        let job = self
            .jobs
            .write()
            .await
            .remove(name)
            .ok_or_else(|| SchedulerError::JobNotFound(name.to_string()))?;
        self.inner.remove(&job.id).await?;
        tracing::info!(job = name, "job cancelled");
        Ok(())
    }

    /// Releases every timer. In-flight ticks run to completion.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Scheduler`] if a timer cannot be removed.
    pub async fn cancel_all(&self) -> Result<(), SchedulerError> {
        let mut jobs = self.jobs.write().await;
        for (name, job) in jobs.drain() {
            self.inner.remove(&job.id).await?;
            tracing::info!(job = %name, "job cancelled");
        }
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.jobs.read().await.contains_key(name)
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(name)
            .is_some_and(|job| job.running.load(Ordering::SeqCst))
    }

    /// Next fire time, once the scheduler has started. `None` for unknown
    /// names or when no further tick is planned.
    pub async fn next_run(&self, name: &str) -> Option<DateTime<Utc>> {
        let id = self.jobs.read().await.get(name).map(|job| job.id)?;
        let mut inner = self.inner.clone();
        inner.next_tick_for_job(id).await.ok().flatten()
    }

    /// Snapshot of every registered job, sorted by name.
    pub async fn job_statuses(&self) -> Vec<JobStatus> {
        let snapshot: Vec<(String, uuid::Uuid, String, bool)> = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .map(|(name, job)| {
                    (
                        name.clone(),
                        job.id,
                        job.schedule.describe(),
                        job.running.load(Ordering::SeqCst),
                    )
                })
                .collect()
        };

        let mut statuses = Vec::with_capacity(snapshot.len());
        for (name, id, schedule, is_running) in snapshot {
            let mut inner = self.inner.clone();
            let next_run = inner.next_tick_for_job(id).await.ok().flatten();
            statuses.push(JobStatus {
                name,
                schedule,
                next_run,
                is_running,
            });
        }
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }
}

/// Runs one tick under the job's overlap guard. A failing action is logged
/// with the job name and swallowed; it never unschedules the job or
/// affects other jobs.
async fn execute_guarded(
    name: &str,
    policy: OverlapPolicy,
    guard: &Mutex<()>,
    running: &AtomicBool,
    action: &JobAction,
) {
    let _permit = match policy {
        OverlapPolicy::Skip => match guard.try_lock() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(job = name, "previous tick still running; skipping");
                return;
            }
        },
        OverlapPolicy::Queue => guard.lock().await,
    };

    running.store(true, Ordering::SeqCst);
    let started = std::time::Instant::now();
    match action().await {
        Ok(()) => {
            tracing::info!(
                job = name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tick complete"
            );
        }
        Err(e) => {
            tracing::error!(job = name, error = %e, "tick failed");
        }
    }
    running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_action(counter: Arc<AtomicUsize>) -> JobAction {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn failing_action(counter: Arc<AtomicUsize>) -> JobAction {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("simulated tick failure")
            })
        })
    }

    #[tokio::test]
    async fn run_now_executes_registered_job() {
        let scheduler = SyncScheduler::new().await.expect("scheduler");
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                "count",
                JobSchedule::Every(Duration::from_secs(3600)),
                OverlapPolicy::Skip,
                counting_action(Arc::clone(&counter)),
            )
            .await
            .expect("register");

        scheduler.run_now("count").await.expect("run");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running("count").await);
    }

    #[tokio::test]
    async fn run_now_unknown_name_is_not_found() {
        let scheduler = SyncScheduler::new().await.expect("scheduler");
        let err = scheduler.run_now("ghost").await.expect_err("unknown job");
        assert!(matches!(err, SchedulerError::JobNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn failing_tick_leaves_job_registered_and_runnable() {
        let scheduler = SyncScheduler::new().await.expect("scheduler");
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                "flaky",
                JobSchedule::Cron("0 0 3 * * *".to_string()),
                OverlapPolicy::Skip,
                failing_action(Arc::clone(&counter)),
            )
            .await
            .expect("register");
        scheduler
            .register(
                "steady",
                JobSchedule::Every(Duration::from_secs(3600)),
                OverlapPolicy::Skip,
                counting_action(Arc::new(AtomicUsize::new(0))),
            )
            .await
            .expect("register");

        scheduler.run_now("flaky").await.expect("failed tick is swallowed");
        scheduler.run_now("flaky").await.expect("still runnable");
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(scheduler.contains("flaky").await);
        assert!(scheduler.contains("steady").await);
        let statuses = scheduler.job_statuses().await;
        let flaky = statuses
            .iter()
            .find(|s| s.name == "flaky")
            .expect("flaky listed");
        assert_eq!(flaky.schedule, "0 0 3 * * *");
    }

    #[tokio::test]
    async fn skip_policy_drops_overlapping_tick() {
        let scheduler = Arc::new(SyncScheduler::new().await.expect("scheduler"));
        let counter = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));

        let slow_counter = Arc::clone(&counter);
        let action: JobAction = Arc::new(move || {
            let counter = Arc::clone(&slow_counter);
            let release_rx = Arc::clone(&release_rx);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(rx) = release_rx.lock().await.take() {
                    rx.await.ok();
                }
                Ok(())
            })
        });
        scheduler
            .register(
                "slow",
                JobSchedule::Every(Duration::from_secs(3600)),
                OverlapPolicy::Skip,
                action,
            )
            .await
            .expect("register");

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_now("slow").await })
        };
        // Let the first tick take the guard before the overlapping one.
        while !scheduler.is_running("slow").await {
            tokio::task::yield_now().await;
        }

        scheduler.run_now("slow").await.expect("skipped tick is ok");
        assert_eq!(counter.load(Ordering::SeqCst), 1, "second tick skipped");

        release_tx.send(()).expect("release first tick");
        first.await.expect("join").expect("first tick");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn queue_policy_waits_for_in_flight_tick() {
        let scheduler = Arc::new(SyncScheduler::new().await.expect("scheduler"));
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler
            .register(
                "queued",
                JobSchedule::Every(Duration::from_secs(3600)),
                OverlapPolicy::Queue,
                counting_action(Arc::clone(&counter)),
            )
            .await
            .expect("register");

        let a = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_now("queued").await })
        };
        let b = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run_now("queued").await })
        };
        a.await.expect("join").expect("run");
        b.await.expect("join").expect("run");
        assert_eq!(counter.load(Ordering::SeqCst), 2, "both ticks ran");
    }

    #[tokio::test]
    async fn cancel_removes_job_from_registry() {
        let scheduler = SyncScheduler::new().await.expect("scheduler");
        scheduler
            .register(
                "doomed",
                JobSchedule::Every(Duration::from_secs(3600)),
                OverlapPolicy::Skip,
                counting_action(Arc::new(AtomicUsize::new(0))),
            )
            .await
            .expect("register");

        scheduler.cancel("doomed").await.expect("cancel");
        assert!(!scheduler.contains("doomed").await);
        let err = scheduler.run_now("doomed").await.expect_err("gone");
        assert!(matches!(err, SchedulerError::JobNotFound(_)));
    }
}
