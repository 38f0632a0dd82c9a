//! Wall-clock job scheduler.
//!
//! Each job is a cron expression with seconds granularity, evaluated in one
//! fixed timezone. Every job gets its own task that sleeps until the next fire
//! time, runs the job to completion, and then computes the following fire time,
//! so runs of the same job never overlap; fire times missed while a run was
//! still going are skipped. A panic inside a job is caught and logged, and the
//! loop carries on with the next fire time.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid schedule '{spec}' for job {name}: {source}")]
    InvalidSchedule {
        name: String,
        spec: String,
        #[source]
        source: cron::error::Error,
    },
}

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A named job and the cron expression that triggers it.
#[derive(Clone)]
pub struct Job {
    spec: String,
    name: String,
    func: JobFn,
}

impl Job {
    pub fn new<F, Fut>(spec: impl Into<String>, name: impl Into<String>, func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            spec: spec.into(),
            name: name.into(),
            func: Arc::new(move || func().boxed()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("spec", &self.spec)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct ScheduledJob {
    name: String,
    schedule: Schedule,
    func: JobFn,
}

/// Jobs registered against one timezone.
pub struct Scheduler {
    timezone: Tz,
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    #[must_use]
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            jobs: Vec::new(),
        }
    }

    /// Create a scheduler with all `jobs` registered.
    ///
    /// # Errors
    ///
    /// Returns an error for the first job whose schedule does not parse.
    pub fn with_jobs(timezone: Tz, jobs: Vec<Job>) -> Result<Self, SchedulerError> {
        let mut scheduler = Self::new(timezone);
        for job in jobs {
            scheduler.add_job(job)?;
        }
        Ok(scheduler)
    }

    /// Register a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job's schedule does not parse.
    pub fn add_job(&mut self, job: Job) -> Result<(), SchedulerError> {
        let schedule =
            Schedule::from_str(&job.spec).map_err(|source| SchedulerError::InvalidSchedule {
                name: job.name.clone(),
                spec: job.spec.clone(),
                source,
            })?;

        info!(job = %job.name, spec = %job.spec, timezone = %self.timezone, "Registered job");
        self.jobs.push(ScheduledJob {
            name: job.name,
            schedule,
            func: job.func,
        });
        Ok(())
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Spawn one task per registered job.
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let timezone = self.timezone;
        let tasks = self
            .jobs
            .into_iter()
            .map(|job| tokio::spawn(job_loop(job, timezone)))
            .collect();
        SchedulerHandle { tasks }
    }
}

/// Running scheduler tasks.
#[derive(Debug)]
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all job loops. A job that is mid-run is aborted with its loop.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// First fire time of `schedule` strictly after `after`, evaluated in `timezone`.
#[must_use]
pub fn next_fire_after(schedule: &Schedule, timezone: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&timezone))
        .next()
        .map(|fire| fire.with_timezone(&Utc))
}

async fn job_loop(job: ScheduledJob, timezone: Tz) {
    loop {
        let Some(next) = next_fire_after(&job.schedule, timezone, Utc::now()) else {
            warn!(job = %job.name, "Schedule has no future fire times, stopping job");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;

        info!(job = %job.name, "Running scheduled job");
        run_guarded(&job.name, &job.func).await;
    }
}

/// Run a job, catching a panic so it cannot take down the job loop.
///
/// The job runs on the calling task, so aborting that task cancels the job too.
/// Returns `false` if the job panicked.
async fn run_guarded(name: &str, func: &JobFn) -> bool {
    match AssertUnwindSafe(func()).catch_unwind().await {
        Ok(()) => true,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(job = %name, "Scheduled job panicked: {message}");
            false
        }
    }
}

/// Run a registered job once, outside its schedule.
///
/// Returns `false` if the job panicked.
pub async fn run_job_now(job: &Job) -> bool {
    info!(job = %job.name, "Running job on demand");
    run_guarded(&job.name, &job.func).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn schedule(spec: &str) -> Schedule {
        Schedule::from_str(spec).unwrap()
    }

    #[test]
    fn test_next_fire_respects_timezone() {
        // 09:07:00 in Detroit during EDT (UTC-4) is 13:07:00 UTC.
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let next = next_fire_after(&schedule("0 7 9 * * *"), chrono_tz::America::Detroit, after);
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 6, 1, 13, 7, 0).unwrap()));

        // In winter (EST, UTC-5) the same wall-clock time is 14:07 UTC.
        let after = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let next = next_fire_after(&schedule("0 7 9 * * *"), chrono_tz::America::Detroit, after);
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 1, 15, 14, 7, 0).unwrap()));
    }

    #[test]
    fn test_next_fire_rolls_to_next_day() {
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 13, 7, 0).unwrap();
        let next = next_fire_after(&schedule("0 7 9 * * *"), chrono_tz::America::Detroit, after);
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2024, 6, 2, 13, 7, 0).unwrap()));
    }

    #[test]
    fn test_invalid_schedule_is_rejected() {
        let mut scheduler = Scheduler::new(chrono_tz::UTC);
        let err = scheduler
            .add_job(Job::new("every tuesday", "broken", || async {}))
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_job_is_contained() {
        let job = Job::new("* * * * * *", "explodes", || async {
            panic!("job failure");
        });
        assert!(!run_job_now(&job).await);

        let ok = Job::new("* * * * * *", "fine", || async {});
        assert!(run_job_now(&ok).await);
    }

    #[tokio::test]
    async fn test_started_jobs_fire_despite_panicking_neighbour() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let scheduler = Scheduler::with_jobs(
            chrono_tz::America::Detroit,
            vec![
                Job::new("* * * * * *", "counter", move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
                Job::new("* * * * * *", "explodes", || async {
                    panic!("job failure");
                }),
            ],
        )
        .unwrap();

        let handle = scheduler.start();
        assert_eq!(handle.job_count(), 2);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let seen = fired.load(Ordering::SeqCst);
        handle.shutdown();

        // Every second fires, so at least two runs fit in the window.
        assert!(seen >= 2, "counter job fired {seen} times");
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_job() {
        let started = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicBool::new(false));
        let (job_started, job_dropped) = (Arc::clone(&started), Arc::clone(&dropped));

        let mut scheduler = Scheduler::new(chrono_tz::UTC);
        scheduler
            .add_job(Job::new("* * * * * *", "long", move || {
                let started = Arc::clone(&job_started);
                let guard = SetOnDrop(Arc::clone(&job_dropped));
                async move {
                    let _guard = guard;
                    started.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }))
            .unwrap();

        let handle = scheduler.start();
        for _ in 0..30 {
            if started.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(started.load(Ordering::SeqCst));
        assert!(!dropped.load(Ordering::SeqCst));

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }
}
