//! Runner - drains the ready-work stream and executes jobs concurrently.

use crate::registry::Registry;
use crate::report::{JobOutcome, RunReport};
use crate::scheduler::{CompletionSender, Scheduler};
use chrono::Utc;
use rollout_core::{
    Backends, CancelHandle, CancelSignal, Error, JobIndex, Result, RunId, duration_ms,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Executes every job of a registry, each in its own task.
///
/// The first failure, in completion order, ends the run: remaining work is
/// cancelled and joined before the error is returned.
pub struct Runner {
    registry: Arc<Registry>,
    backends: Backends,
    max_parallel: Option<usize>,
    /// Set by the first call to [`Runner::run`]; job statuses are single-use.
    claimed: AtomicBool,
}

impl Runner {
    pub fn new(registry: Registry, backends: Backends) -> Self {
        Self {
            registry: Arc::new(registry),
            backends,
            max_parallel: None,
            claimed: AtomicBool::new(false),
        }
    }

    /// Limit how many jobs execute at the same time.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel.max(1));
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run every registered job.
    ///
    /// A runner runs once. Any later or concurrent call fails with
    /// [`Error::Internal`] without touching the registry.
    pub async fn run(&self) -> Result<RunReport> {
        if self.claimed.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal(
                "this runner has already run; a registry can only be run once".to_string(),
            ));
        }

        let run_id = RunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(%run_id, jobs = self.registry.len(), max_parallel = ?self.max_parallel, "Starting run");

        let (mut ready, completions, scheduler) =
            Scheduler::new(self.registry.clone()).spawn(Scheduler::DEFAULT_CAPACITY);
        let cancel = CancelHandle::new();
        let limit = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));

        let mut workers: JoinSet<Result<JobOutcome>> = JoinSet::new();
        let mut outcomes = Vec::with_capacity(self.registry.len());
        let mut failure: Option<Error> = None;
        let mut stream_open = true;

        loop {
            tokio::select! {
                next = ready.recv(), if stream_open => match next {
                    Some(index) => {
                        self.launch(index, &mut workers, &completions, cancel.signal(), limit.clone());
                    }
                    None => {
                        debug!(%run_id, "Ready stream closed");
                        stream_open = false;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => match joined {
                    Ok(Ok(outcome)) => outcomes.push(outcome),
                    Ok(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    Err(e) => {
                        failure = Some(Error::Internal(format!("job worker panicked: {}", e)));
                        break;
                    }
                },
                else => break,
            }
        }

        if let Some(e) = failure {
            error!(%run_id, error = %e, in_flight = workers.len(), "Run failed; cancelling remaining jobs");
            cancel.cancel();
            drop(ready);
            while let Some(joined) = workers.join_next().await {
                if let Ok(Err(other)) = joined {
                    debug!(%run_id, error = %other, "Dropping outcome of cancelled job");
                }
            }
            drop(completions);
            match scheduler.await {
                Ok(Ok(())) => {}
                Ok(Err(other)) => warn!(%run_id, error = %other, "Scheduler stopped with an error"),
                Err(join) => warn!(%run_id, error = %join, "Scheduler task failed"),
            }
            return Err(e);
        }

        drop(completions);
        match scheduler.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(%run_id, error = %e, "Scheduler stopped with an error");
                return Err(e);
            }
            Err(e) => return Err(Error::Internal(format!("scheduler task failed: {}", e))),
        }

        let elapsed_ms = duration_ms(clock.elapsed());
        info!(%run_id, jobs = outcomes.len(), duration_ms = elapsed_ms, "Run succeeded");
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed_ms,
            jobs: outcomes,
        })
    }

    fn launch(
        &self,
        index: JobIndex,
        workers: &mut JoinSet<Result<JobOutcome>>,
        completions: &CompletionSender,
        cancel: CancelSignal,
        limit: Option<Arc<Semaphore>>,
    ) {
        let registry = self.registry.clone();
        let backends = self.backends.clone();
        let completions = completions.clone();

        workers.spawn(async move {
            let job = registry.job(index);
            let outcome = cancel
                .guard(async {
                    let _permit = match limit {
                        Some(limit) => Some(
                            limit
                                .acquire_owned()
                                .await
                                .map_err(|e| Error::Internal(e.to_string()))?,
                        ),
                        None => None,
                    };

                    let started_at = Utc::now();
                    let clock = Instant::now();
                    job.execute(&backends, &cancel).await?;
                    Ok(JobOutcome {
                        kind: job.kind(),
                        key: job.key().to_string(),
                        started_at,
                        finished_at: Utc::now(),
                        duration_ms: duration_ms(clock.elapsed()),
                    })
                })
                .await?;

            completions.report(index);
            Ok(outcome)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;
    use rollout_core::{JobDeclaration, JobKind, Status};
    use std::time::Duration;
    use tokio::time::timeout;

    fn runner(declarations: Vec<JobDeclaration>, backends: Backends) -> Runner {
        Runner::new(Registry::new(declarations).unwrap(), backends)
    }

    #[tokio::test]
    async fn test_dependent_starts_after_dependency_done() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("deploy b.yaml", 50)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::build("a.yaml"),
                JobDeclaration::deploy("b.yaml", &[]),
                JobDeclaration::deploy("c.yaml", &["b.yaml"]),
            ],
            backends,
        );

        let report = runner.run().await.unwrap();

        let b_end = backend.position("end deploy b.yaml").unwrap();
        let c_start = backend.position("start deploy c.yaml").unwrap();
        assert!(b_end < c_start, "events: {:?}", backend.events());
        assert_eq!(report.jobs.len(), 3);

        let b = report.outcome(JobKind::Deploy, "b.yaml").unwrap();
        let c = report.outcome(JobKind::Deploy, "c.yaml").unwrap();
        assert!(b.finished_at <= c.started_at);
        assert!(runner.registry().jobs().iter().all(|j| j.status() == Status::Done));
    }

    #[tokio::test]
    async fn test_every_job_runs_exactly_once() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("deploy infra.yaml", 20)
            .delay("pull postgres:13", 10)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::pull("base", vec!["postgres:13".into(), "redis:7".into()]),
                JobDeclaration::build("app.yaml"),
                JobDeclaration::build("worker.yaml"),
                JobDeclaration::deploy("infra.yaml", &[]),
                JobDeclaration::deploy("db.yaml", &["infra.yaml"]),
                JobDeclaration::deploy("cache.yaml", &["infra.yaml"]),
                JobDeclaration::deploy("app.yaml", &["db.yaml", "cache.yaml"]),
                JobDeclaration::deploy("worker.yaml", &["app.yaml"]),
            ],
            backends,
        );

        let report = runner.run().await.unwrap();
        assert_eq!(report.jobs.len(), 8);

        let events = backend.events();
        let mut starts: Vec<&String> = events.iter().filter(|e| e.starts_with("start")).collect();
        starts.sort();
        let total = starts.len();
        starts.dedup();
        assert_eq!(starts.len(), total, "a call ran twice: {:?}", events);
        assert_eq!(total, 9);

        for (dep, dependent) in [
            ("infra.yaml", "db.yaml"),
            ("infra.yaml", "cache.yaml"),
            ("db.yaml", "app.yaml"),
            ("cache.yaml", "app.yaml"),
            ("app.yaml", "worker.yaml"),
        ] {
            let end = backend.position(&format!("end deploy {}", dep)).unwrap();
            let start = backend.position(&format!("start deploy {}", dependent)).unwrap();
            assert!(end < start, "{} started before {} finished", dependent, dep);
        }
    }

    #[tokio::test]
    async fn test_independent_jobs_run_concurrently() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("deploy a.yaml", 200)
            .delay("deploy b.yaml", 200)
            .delay("deploy c.yaml", 200)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::deploy("a.yaml", &[]),
                JobDeclaration::deploy("b.yaml", &[]),
                JobDeclaration::deploy("c.yaml", &[]),
            ],
            backends,
        );

        let started = Instant::now();
        runner.run().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(550));
        assert_eq!(backend.max_active(), 3);
    }

    #[tokio::test]
    async fn test_max_parallel_bounds_concurrency() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("build a.yaml", 30)
            .delay("build b.yaml", 30)
            .delay("build c.yaml", 30)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::build("a.yaml"),
                JobDeclaration::build("b.yaml"),
                JobDeclaration::build("c.yaml"),
            ],
            backends,
        )
        .with_max_parallel(1);

        runner.run().await.unwrap();
        assert_eq!(backend.max_active(), 1);
        assert_eq!(backend.finished(), 3);
    }

    #[tokio::test]
    async fn test_first_failure_returned_without_waiting() {
        let mut script = ScriptedBackend::default().fail("deploy a.yaml", "E");
        let mut declarations = vec![JobDeclaration::deploy("a.yaml", &[])];
        for i in 0..9 {
            let file = format!("slow-{}.yaml", i);
            script = script.delay(&format!("build {}", file), 10_000);
            declarations.push(JobDeclaration::Build {
                file,
                output: None,
                args: vec![],
            });
        }
        let (backend, backends) = script.shared();
        let runner = runner(declarations, backends);

        let err = timeout(Duration::from_secs(2), runner.run())
            .await
            .expect("run should not wait for slow jobs")
            .unwrap_err();

        assert_eq!(
            err,
            Error::ExecutionFailed {
                job: "deploy a.yaml".to_string(),
                message: "E".to_string()
            }
        );
        // Cancelled workers were joined before returning.
        assert_eq!(backend.active(), 0);
        assert!(backend.finished() >= 1);
    }

    #[tokio::test]
    async fn test_failure_reported_in_completion_order() {
        let (_backend, backends) = ScriptedBackend::default()
            .delay("deploy first.yaml", 300)
            .fail("deploy first.yaml", "late")
            .delay("deploy second.yaml", 10)
            .fail("deploy second.yaml", "early")
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::deploy("first.yaml", &[]),
                JobDeclaration::deploy("second.yaml", &[]),
            ],
            backends,
        );

        let err = runner.run().await.unwrap_err();
        assert_eq!(
            err,
            Error::ExecutionFailed {
                job: "deploy second.yaml".to_string(),
                message: "early".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dependents_of_failed_job_never_start() {
        let (backend, backends) = ScriptedBackend::default()
            .fail("deploy infra.yaml", "unreachable cluster")
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::deploy("infra.yaml", &[]),
                JobDeclaration::deploy("app.yaml", &["infra.yaml"]),
            ],
            backends,
        );

        let err = timeout(Duration::from_secs(2), runner.run())
            .await
            .expect("run should not hang on a stuck dependency")
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { .. }));
        assert_eq!(backend.position("start deploy app.yaml"), None);

        let app = runner.registry().get(JobKind::Deploy, "app.yaml").unwrap();
        assert_eq!(app.status(), Status::NotStarted);
    }

    #[tokio::test]
    async fn test_success_waits_for_every_worker() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("pull alpine:3", 100)
            .delay("build a.yaml", 50)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::pull("base", vec!["alpine:3".into()]),
                JobDeclaration::build("a.yaml"),
                JobDeclaration::deploy("b.yaml", &[]),
            ],
            backends,
        );

        let report = runner.run().await.unwrap();
        assert_eq!(backend.finished(), 3);
        assert_eq!(report.jobs.len(), 3);
        assert!(report.parallelism() > 0.0);
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let runner = runner(
            vec![JobDeclaration::build("a.yaml")],
            ScriptedBackend::default().backends(),
        );
        runner.run().await.unwrap();
        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_concurrent_runs_rejected() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("build a.yaml", 50)
            .shared();
        let runner = runner(vec![JobDeclaration::build("a.yaml")], backends);

        let (first, second) = timeout(Duration::from_secs(2), async {
            tokio::join!(runner.run(), runner.run())
        })
        .await
        .expect("concurrent runs should finish");

        let (ok, err) = match (first, second) {
            (Ok(report), Err(e)) | (Err(e), Ok(report)) => (report, e),
            other => panic!("expected exactly one run to succeed, got {:?}", other),
        };
        assert_eq!(ok.jobs.len(), 1);
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(backend.finished(), 1);
    }

    #[tokio::test]
    async fn test_failing_pull_fails_run() {
        let (backend, backends) = ScriptedBackend::default()
            .fail("pull postgres:13", "denied")
            .delay("build app.yaml", 10_000)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::pull("base", vec!["postgres:13".into(), "redis:7".into()]),
                JobDeclaration::build("app.yaml"),
            ],
            backends,
        );

        let err = timeout(Duration::from_secs(2), runner.run())
            .await
            .expect("run should stop at the failed pull")
            .unwrap_err();

        assert_eq!(
            err,
            Error::PullFailed {
                image: "postgres:13".to_string(),
                message: "denied".to_string()
            }
        );
        assert_eq!(backend.position("start pull redis:7"), None);
        assert_eq!(backend.active(), 0);
        let base = runner.registry().get(JobKind::Pull, "base").unwrap();
        assert_ne!(base.status(), Status::Done);
    }

    #[tokio::test]
    async fn test_queued_jobs_cancelled_on_failure() {
        let (backend, backends) = ScriptedBackend::default()
            .delay("build a.yaml", 50)
            .fail("build a.yaml", "E")
            .delay("build b.yaml", 10_000)
            .delay("build c.yaml", 10_000)
            .shared();
        let runner = runner(
            vec![
                JobDeclaration::build("a.yaml"),
                JobDeclaration::build("b.yaml"),
                JobDeclaration::build("c.yaml"),
            ],
            backends,
        )
        .with_max_parallel(1);

        let err = timeout(Duration::from_secs(2), runner.run())
            .await
            .expect("queued jobs should not hold up the run")
            .unwrap_err();

        assert!(matches!(err, Error::ExecutionFailed { .. }));
        // b and c were waiting for a permit and never reached the backend.
        assert_eq!(backend.position("start build b.yaml"), None);
        assert_eq!(backend.position("start build c.yaml"), None);
        assert_eq!(backend.finished(), 1);
        assert_eq!(backend.active(), 0);
    }

    #[tokio::test]
    async fn test_empty_registry_succeeds() {
        let runner = runner(vec![], ScriptedBackend::default().backends());
        let report = runner.run().await.unwrap();
        assert!(report.jobs.is_empty());
    }
}
