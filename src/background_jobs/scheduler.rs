use super::context::JobContext;
use super::handle::{JobRunInfo, ScheduleState, SchedulerCommand, SharedJobState};
use super::job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Manages background job scheduling and execution.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Currently running jobs with their task handles (not shared, managed by scheduler loop)
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    /// Receiver for hook events raised by the Reconciliation Service or startup.
    hook_receiver: mpsc::Receiver<HookEvent>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    /// Create a new job scheduler and return a handle for interacting with it.
    pub fn new(
        hook_receiver: mpsc::Receiver<HookEvent>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            hook_receiver,
            command_receiver,
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        info!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);

        self.trigger_jobs_for_hook(HookEvent::OnStartup).await;

        loop {
            self.cleanup_completed_jobs().await;

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(event) = self.hook_receiver.recv() => {
                    debug!("Received hook event: {}", event);
                    self.trigger_jobs_for_hook(event).await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Handle a command from the SchedulerHandle.
    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::TriggerJob { job_id, response } => {
                let result = self.trigger_job(&job_id).await;
                let _ = response.send(result);
            }
        }
    }

    /// Manually trigger a job by ID.
    async fn trigger_job(&mut self, job_id: &str) -> Result<(), JobError> {
        let state = self.shared_state.read().await;
        if !state.jobs.contains_key(job_id) {
            return Err(JobError::NotFound);
        }

        if state.running_jobs.contains(job_id) {
            return Err(JobError::AlreadyRunning);
        }
        drop(state);

        self.spawn_job(job_id, "manual").await;
        Ok(())
    }

    /// Calculate time until the next scheduled job should run.
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let mut min_duration = Duration::from_secs(60);

        let state = self.shared_state.read().await;
        for (job_id, job) in &state.jobs {
            if state.running_jobs.contains(job_id) {
                continue;
            }

            if let Some(next_run) = Self::next_run_time(&state, job_id, job.schedule()) {
                let now = chrono::Utc::now();
                if next_run > now {
                    let duration = (next_run - now).to_std().unwrap_or(Duration::from_secs(1));
                    if duration < min_duration {
                        min_duration = duration;
                    }
                } else {
                    return Duration::from_secs(0);
                }
            }
        }

        min_duration
    }

    /// Get the next scheduled run time for a job, from in-memory schedule state.
    fn next_run_time(
        state: &SharedJobState,
        job_id: &str,
        schedule: JobSchedule,
    ) -> Option<chrono::DateTime<chrono::Utc>> {
        match schedule {
            JobSchedule::Interval(_interval) => Some(
                state
                    .schedule_state
                    .get(job_id)
                    .map(|s| s.next_run_at)
                    .unwrap_or_else(chrono::Utc::now),
            ),
            JobSchedule::Cron(ref cron_expr) => {
                warn!(
                    "Cron scheduling not yet implemented for job {}: {}",
                    job_id, cron_expr
                );
                None
            }
            JobSchedule::Hook(_) => None,
            JobSchedule::Combined { cron, interval, .. } => {
                let interval_time = interval.map(|_| {
                    state
                        .schedule_state
                        .get(job_id)
                        .map(|s| s.next_run_at)
                        .unwrap_or_else(chrono::Utc::now)
                });
                if cron.is_some() {
                    warn!(
                        "Cron scheduling in Combined not yet implemented for job {}",
                        job_id
                    );
                }
                interval_time
            }
        }
    }

    /// Run all jobs that are due for scheduled execution.
    async fn run_due_jobs(&mut self) {
        let now = chrono::Utc::now();
        let mut jobs_to_run = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    continue;
                }

                if let Some(next_run) = Self::next_run_time(&state, job_id, job.schedule()) {
                    if next_run <= now {
                        jobs_to_run.push(job_id.clone());
                    }
                }
            }
        }

        for job_id in jobs_to_run {
            self.spawn_job(&job_id, "schedule").await;
        }
    }

    /// Trigger all jobs that listen for a specific hook event.
    async fn trigger_jobs_for_hook(&mut self, event: HookEvent) {
        let mut jobs_to_trigger = Vec::new();

        {
            let state = self.shared_state.read().await;
            for (job_id, job) in &state.jobs {
                if state.running_jobs.contains(job_id) {
                    debug!("Skipping hook trigger for already running job: {}", job_id);
                    continue;
                }

                let should_trigger = match job.schedule() {
                    JobSchedule::Hook(hook_event) => hook_event == event,
                    JobSchedule::Combined { ref hooks, .. } => hooks.contains(&event),
                    _ => false,
                };

                if should_trigger {
                    jobs_to_trigger.push(job_id.clone());
                }
            }
        }

        for job_id in jobs_to_trigger {
            let trigger = format!("hook:{}", event);
            self.spawn_job(&job_id, &trigger).await;
        }
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        let started_at = chrono::Utc::now();
        info!("Starting job: {} (triggered_by: {})", job_id, triggered_by);

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
        }

        // Set next_run_at up front for interval-based jobs, so a slow job
        // doesn't cause the scheduler to immediately re-queue it.
        let interval = match job.schedule() {
            JobSchedule::Interval(int) => Some(int),
            JobSchedule::Combined { interval, .. } => interval,
            _ => None,
        };
        if let Some(interval) = interval {
            let next_run =
                chrono::Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default();
            let mut state = self.shared_state.write().await;
            state.schedule_state.insert(
                job_id.to_string(),
                ScheduleState {
                    next_run_at: next_run,
                    last_run_at: None,
                },
            );
        }

        crate::metrics::set_background_job_running(job_id, true);

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());

        let ctx = JobContext::new(
            cancel_token,
            Arc::clone(&self.job_context.catalog_store),
            Arc::clone(&self.job_context.scheduler),
        );

        let job_id_owned = job_id.to_string();
        let triggered_by_owned = triggered_by.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let start_time = Instant::now();
            let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;
            let elapsed = start_time.elapsed();
            let finished_at = chrono::Utc::now();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    ("completed", None, "success")
                }
                Ok(Err(e)) => match e {
                    JobError::Cancelled => {
                        info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                        ("failed", Some("Cancelled".to_string()), "cancelled")
                    }
                    _ => {
                        error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                        ("failed", Some(e.to_string()), "failed")
                    }
                },
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    ("failed", Some(format!("Task panic: {}", e)), "panic")
                }
            };

            crate::metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            crate::metrics::set_background_job_running(&job_id_owned, false);

            let mut state = shared_state.write().await;
            state.running_jobs.remove(&job_id_owned);
            state.record_run(
                &job_id_owned,
                JobRunInfo {
                    started_at: started_at.to_rfc3339(),
                    finished_at: Some(finished_at.to_rfc3339()),
                    status: status.to_string(),
                    error_message: error_msg,
                    triggered_by: triggered_by_owned,
                },
            );
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    /// Update schedule state after a job completes (for interval-based jobs).
    async fn update_schedule_after_run(&self, job_id: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => return,
            }
        };

        let interval = match job.schedule() {
            JobSchedule::Interval(int) => Some(int),
            JobSchedule::Combined { interval, .. } => interval,
            _ => None,
        };

        if let Some(interval) = interval {
            let next_run =
                chrono::Utc::now() + chrono::Duration::from_std(interval).unwrap_or_default();
            let mut state = self.shared_state.write().await;
            state.schedule_state.insert(
                job_id.to_string(),
                ScheduleState {
                    next_run_at: next_run,
                    last_run_at: Some(chrono::Utc::now()),
                },
            );
        }
    }

    /// Clean up handles for completed jobs.
    async fn cleanup_completed_jobs(&mut self) {
        let mut completed = Vec::new();

        for (job_id, handle) in &self.running_handles {
            if handle.is_finished() {
                completed.push(job_id.clone());
            }
        }

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
            self.update_schedule_after_run(&job_id).await;
        }
    }

    /// Gracefully shut down the scheduler.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        {
            let state = self.shared_state.read().await;
            for job_id in &state.running_jobs {
                if let Some(job) = state.jobs.get(job_id) {
                    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
                        if let Some(token) = self.job_cancel_tokens.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                }
            }
        }

        let mut wait_jobs = Vec::new();
        for (job_id, handle) in self.running_handles.drain() {
            let behavior = {
                let state = self.shared_state.read().await;
                state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or(ShutdownBehavior::Cancellable)
            };
            wait_jobs.push((job_id, handle, behavior));
        }

        for (job_id, handle, behavior) in wait_jobs {
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            let _ = tokio::time::timeout(Duration::from_secs(30), handle).await;
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    hook_receiver: mpsc::Receiver<HookEvent>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
) -> (JobScheduler, super::handle::SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState {
        jobs: HashMap::new(),
        running_jobs: HashSet::new(),
        schedule_state: HashMap::new(),
        history: HashMap::new(),
    }));

    let scheduler = JobScheduler::new(
        hook_receiver,
        command_rx,
        shutdown_token,
        job_context,
        Arc::clone(&shared_state),
    );

    let handle = super::handle::SchedulerHandle::new(command_tx, shared_state);

    (scheduler, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::SqliteCatalogStore;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct TestJob {
        id: &'static str,
        execution_count: Arc<AtomicUsize>,
        should_fail: Arc<AtomicBool>,
    }

    impl BackgroundJob for TestJob {
        fn id(&self) -> &'static str {
            self.id
        }

        fn name(&self) -> &'static str {
            "Test Job"
        }

        fn description(&self) -> &'static str {
            "A test job for unit tests"
        }

        fn schedule(&self) -> JobSchedule {
            JobSchedule::Hook(HookEvent::OnStartup)
        }

        fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
            self.execution_count.fetch_add(1, Ordering::SeqCst);
            if self.should_fail.load(Ordering::SeqCst) {
                Err(JobError::ExecutionFailed("Test failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn test_job_context(temp_dir: &TempDir, shutdown_token: &CancellationToken) -> JobContext {
        let db_path = temp_dir.path().join("catalog.db");
        let catalog_store: Arc<dyn crate::catalog_store::CatalogStore> =
            Arc::new(SqliteCatalogStore::new(&db_path).unwrap());
        let scheduler = Scheduler::new(2, shutdown_token.child_token());
        JobContext::new(shutdown_token.child_token(), catalog_store, scheduler)
    }

    fn create_test_scheduler() -> (
        JobScheduler,
        super::super::handle::SchedulerHandle,
        TempDir,
        mpsc::Sender<HookEvent>,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let (hook_sender, hook_receiver) = mpsc::channel(100);
        let shutdown_token = CancellationToken::new();
        let job_context = test_job_context(&temp_dir, &shutdown_token);

        let (scheduler, handle) = create_scheduler(hook_receiver, shutdown_token, job_context);

        (scheduler, handle, temp_dir, hook_sender)
    }

    #[tokio::test]
    async fn test_register_job() {
        let (mut scheduler, handle, _temp_dir, _hook_sender) = create_test_scheduler();

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(TestJob {
            id: "test_job",
            execution_count: exec_count,
            should_fail: Arc::new(AtomicBool::new(false)),
        });

        scheduler.register_job(job).await;

        let jobs = handle.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "test_job");
    }

    #[tokio::test]
    async fn test_job_exists_check() {
        let (mut scheduler, handle, _temp_dir, _hook_sender) = create_test_scheduler();

        assert!(!handle.job_exists("nonexistent").await);

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(TestJob {
            id: "test_job",
            execution_count: exec_count,
            should_fail: Arc::new(AtomicBool::new(false)),
        });
        scheduler.register_job(job).await;

        assert!(handle.job_exists("test_job").await);
        assert!(!handle.job_exists("nonexistent").await);
    }

    #[tokio::test]
    async fn test_get_job_history_empty() {
        let (_scheduler, handle, _temp_dir, _hook_sender) = create_test_scheduler();

        let history = handle.get_job_history("nonexistent", 10).await;
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_job_execution_on_startup_hook() {
        let temp_dir = TempDir::new().unwrap();
        let (hook_sender, hook_receiver) = mpsc::channel(100);
        let shutdown_token = CancellationToken::new();
        let job_context = test_job_context(&temp_dir, &shutdown_token);

        let (mut scheduler, handle) =
            create_scheduler(hook_receiver, shutdown_token.clone(), job_context);

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(TestJob {
            id: "startup_job",
            execution_count: exec_count.clone(),
            should_fail: Arc::new(AtomicBool::new(false)),
        });
        scheduler.register_job(job).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(
            exec_count.load(Ordering::SeqCst) >= 1,
            "Job should have executed on startup"
        );

        let history = handle.get_job_history("startup_job", 10).await;
        assert!(!history.is_empty(), "Job history should be recorded");
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].triggered_by, "hook:OnStartup");

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;

        drop(hook_sender);
    }

    #[tokio::test]
    async fn test_failed_job_records_error() {
        let temp_dir = TempDir::new().unwrap();
        let (_hook_sender, hook_receiver) = mpsc::channel(100);
        let shutdown_token = CancellationToken::new();
        let job_context = test_job_context(&temp_dir, &shutdown_token);

        let (mut scheduler, handle) =
            create_scheduler(hook_receiver, shutdown_token.clone(), job_context);

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(TestJob {
            id: "failing_job",
            execution_count: exec_count.clone(),
            should_fail: Arc::new(AtomicBool::new(true)),
        });
        scheduler.register_job(job).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(
            exec_count.load(Ordering::SeqCst) >= 1,
            "Job should have attempted execution"
        );

        let history = handle.get_job_history("failing_job", 10).await;
        assert!(!history.is_empty(), "Job history should be recorded");
        assert_eq!(history[0].status, "failed");
        assert!(history[0].error_message.is_some());
        assert!(history[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("Test failure"));

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_hook_triggered_job_execution() {
        let temp_dir = TempDir::new().unwrap();
        let (hook_sender, hook_receiver) = mpsc::channel(100);
        let shutdown_token = CancellationToken::new();
        let job_context = test_job_context(&temp_dir, &shutdown_token);

        let (mut scheduler, handle) =
            create_scheduler(hook_receiver, shutdown_token.clone(), job_context);

        struct ReconcileHookJob {
            exec_count: Arc<AtomicUsize>,
        }

        impl BackgroundJob for ReconcileHookJob {
            fn id(&self) -> &'static str {
                "reconcile_hook_job"
            }
            fn name(&self) -> &'static str {
                "Reconcile Hook Job"
            }
            fn description(&self) -> &'static str {
                "Runs on a forced reconciliation hook"
            }
            fn schedule(&self) -> JobSchedule {
                JobSchedule::Hook(HookEvent::OnForceReconcile)
            }
            fn execute(&self, _ctx: &JobContext) -> Result<(), JobError> {
                self.exec_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(ReconcileHookJob {
            exec_count: exec_count.clone(),
        });
        scheduler.register_job(job).await;

        let sched_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            exec_count.load(Ordering::SeqCst),
            0,
            "Job should not run on startup"
        );

        hook_sender
            .send(HookEvent::OnForceReconcile)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            exec_count.load(Ordering::SeqCst),
            1,
            "Job should run on forced reconciliation hook"
        );

        let history = handle.get_job_history("reconcile_hook_job", 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].triggered_by, "hook:OnForceReconcile");

        shutdown_token.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(2), sched_handle).await;
    }

    #[tokio::test]
    async fn test_job_count() {
        let (mut scheduler, _handle, _temp_dir, _hook_sender) = create_test_scheduler();

        assert_eq!(scheduler.job_count().await, 0);

        let exec_count = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(TestJob {
            id: "test_job",
            execution_count: exec_count,
            should_fail: Arc::new(AtomicBool::new(false)),
        });
        scheduler.register_job(job).await;

        assert_eq!(scheduler.job_count().await, 1);
    }
}
