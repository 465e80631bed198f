//! The Download Scheduler. Grounded on `DownloadManager` in
//! the Python original's `download_manager.py`: an `asyncio.Semaphore`-gated
//! worker over a FIFO queue, with a bounded-size map of finished jobs
//! (`while len(completed) > 50: delete oldest`). The worker loop there polls
//! every 0.5s; here the driver is event-driven via a `Notify` instead, since
//! nothing blocks on a poll interval in the tokio translation.

use super::aggregator::ProgressAggregator;
use super::job::{DownloadJob, JobId, JobStatus, TitleRef};
use crate::catalog_store::UnitSelector;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_MAX_COMPLETED: usize = 50;

/// A unit of acquisition work the Scheduler drives to completion. The HLS
/// Fetcher's two backends each implement this.
#[async_trait]
pub trait DownloadWork: Send + Sync {
    async fn run(&self, progress: ProgressSink) -> CoreResult<()>;
}

/// Handed to `DownloadWork::run` so it can report fractional progress and
/// cooperatively notice a cancellation request: a running job's cancel is
/// cooperative, flipped through this sink rather than forced.
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    state: Arc<Mutex<SchedulerState>>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub async fn report(&self, fraction: f32) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&self.job_id) {
            job.progress = fraction.clamp(0.0, 1.0);
            let snapshot = job.clone();
            state.aggregator.track(&snapshot);
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct SchedulerState {
    jobs: HashMap<JobId, DownloadJob>,
    work: HashMap<JobId, Arc<dyn DownloadWork>>,
    queue: VecDeque<JobId>,
    cancel_tokens: HashMap<JobId, CancellationToken>,
    completed_order: VecDeque<JobId>,
    aggregator: ProgressAggregator,
    next_id: u64,
}

impl SchedulerState {
    fn is_duplicate(&self, title_ref: &TitleRef, unit_ref: UnitSelector) -> bool {
        self.jobs.values().any(|j| {
            !j.status.is_terminal()
                && j.title_ref == *title_ref
                && j.unit_ref == unit_ref
        })
    }
}

/// Point-in-time view of scheduler occupancy.
#[derive(Debug, Clone)]
pub struct SchedulerOverview {
    pub pending: usize,
    pub running: usize,
    pub completed_tracked: usize,
}

/// Bounded FIFO download queue with an at-most-`parallelism` concurrency
/// bound (invariant I5).
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    semaphore: Arc<Semaphore>,
    notify: Arc<Notify>,
    max_completed: usize,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(parallelism: usize, shutdown: CancellationToken) -> Arc<Self> {
        Self::with_capacity(parallelism, DEFAULT_MAX_COMPLETED, shutdown)
    }

    pub fn with_capacity(
        parallelism: usize,
        max_completed: usize,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            state: Arc::new(Mutex::new(SchedulerState {
                jobs: HashMap::new(),
                work: HashMap::new(),
                queue: VecDeque::new(),
                cancel_tokens: HashMap::new(),
                completed_order: VecDeque::new(),
                aggregator: ProgressAggregator::new(),
                next_id: 1,
            })),
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
            notify: Arc::new(Notify::new()),
            max_completed,
            shutdown,
        });

        let driver = Arc::clone(&scheduler);
        tokio::spawn(async move { driver.drive().await });

        scheduler
    }

    /// Enqueue a new job. Rejects duplicate (title, unit) submissions while
    /// an earlier job for the same pair is still non-terminal (invariant I4).
    pub async fn submit(
        &self,
        title_ref: TitleRef,
        unit_ref: UnitSelector,
        work: Arc<dyn DownloadWork>,
    ) -> CoreResult<JobId> {
        let mut state = self.state.lock().await;
        if state.is_duplicate(&title_ref, unit_ref) {
            return Err(CoreError::Duplicate(format!(
                "{}/{:?} already queued or running",
                title_ref.name, unit_ref
            )));
        }

        let id = JobId(state.next_id);
        state.next_id += 1;

        let job = DownloadJob::new(id, title_ref, unit_ref, now());
        state.aggregator.track(&job);
        state.jobs.insert(id, job);
        state.work.insert(id, work);
        state.queue.push_back(id);
        drop(state);

        self.notify.notify_one();
        Ok(id)
    }

    /// Cancel a job. Pending jobs are removed synchronously. Running jobs
    /// are signalled and transition to `Cancelled` once the work notices the
    /// flipped token — this call does not wait for that to happen.
    pub async fn cancel(&self, id: JobId) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get(&id).cloned() else {
            return Ok(false);
        };

        match job.status {
            JobStatus::Pending => {
                state.queue.retain(|qid| *qid != id);
                state.work.remove(&id);
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(now());
                    let snapshot = job.clone();
                    state.aggregator.track(&snapshot);
                }
                Self::retire(&mut state, id, self.max_completed);
                Ok(true)
            }
            JobStatus::Running => {
                if let Some(token) = state.cancel_tokens.get(&id) {
                    token.cancel();
                }
                Ok(true)
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => Ok(false),
        }
    }

    pub async fn status(&self, id: JobId) -> Option<DownloadJob> {
        self.state.lock().await.jobs.get(&id).cloned()
    }

    pub async fn overview(&self) -> SchedulerOverview {
        let state = self.state.lock().await;
        let pending = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .count();
        let running = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        SchedulerOverview {
            pending,
            running,
            completed_tracked: state.completed_order.len(),
        }
    }

    /// Render the current unified progress snapshot if the coalescing
    /// window has elapsed, `None` otherwise.
    pub async fn render_progress(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.aggregator.prune();
        state.aggregator.render_if_due()
    }

    /// Main driver loop: pops jobs off the queue as semaphore permits free
    /// up and spawns their execution.
    async fn drive(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("scheduler driver shutting down");
                    return;
                }
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }

            loop {
                let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => break,
                };

                let next_id = {
                    let mut state = self.state.lock().await;
                    state.queue.pop_front()
                };

                let Some(job_id) = next_id else {
                    drop(permit);
                    break;
                };

                self.spawn_job(job_id, permit).await;
            }
        }
    }

    async fn spawn_job(self: &Arc<Self>, job_id: JobId, permit: tokio::sync::OwnedSemaphorePermit) {
        let (work, cancel_token) = {
            let mut state = self.state.lock().await;
            let Some(work) = state.work.remove(&job_id) else {
                drop(permit);
                return;
            };
            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.status = JobStatus::Running;
                job.started_at = Some(now());
                let snapshot = job.clone();
                state.aggregator.track(&snapshot);
            }
            let token = self.shutdown.child_token();
            state.cancel_tokens.insert(job_id, token.clone());
            (work, token)
        };

        let sink = ProgressSink {
            job_id,
            state: Arc::clone(&self.state),
            cancel: cancel_token,
        };

        let state = Arc::clone(&self.state);
        let notify = Arc::clone(&self.notify);
        let max_completed = self.max_completed;

        tokio::spawn(async move {
            let started = Instant::now();
            let cancel_requested = sink.is_cancel_requested();
            let result = if cancel_requested {
                Err(CoreError::Cancelled)
            } else {
                work.run(sink.clone()).await
            };
            let elapsed = started.elapsed();

            let mut state = state.lock().await;
            state.cancel_tokens.remove(&job_id);

            if let Some(job) = state.jobs.get_mut(&job_id) {
                job.completed_at = Some(now());
                match result {
                    Ok(()) => {
                        job.status = JobStatus::Completed;
                        job.progress = 1.0;
                    }
                    Err(CoreError::Cancelled) => {
                        job.status = JobStatus::Cancelled;
                    }
                    Err(e) => {
                        job.status = JobStatus::Failed;
                        job.error = Some(e.to_string());
                        warn!("download job {} failed after {:?}: {}", job_id, elapsed, e);
                    }
                }
                let label = match job.status {
                    JobStatus::Completed => "completed",
                    JobStatus::Failed => "failed",
                    JobStatus::Cancelled => "cancelled",
                    _ => "unknown",
                };
                crate::metrics::record_scheduler_job_terminal(label);
                let snapshot = job.clone();
                state.aggregator.track(&snapshot);
            }
            Self::retire(&mut state, job_id, max_completed);
            // permit is dropped here, freeing a concurrency slot.
            drop(permit);
            notify.notify_one();
        });
    }

    /// Track a newly-terminal job in the bounded completion LRU, evicting
    /// the oldest entry once it exceeds `max_completed`.
    fn retire(state: &mut SchedulerState, id: JobId, max_completed: usize) {
        state.completed_order.push_back(id);
        while state.completed_order.len() > max_completed {
            if let Some(evict) = state.completed_order.pop_front() {
                state.jobs.remove(&evict);
                state.aggregator.remove(evict);
            }
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::Kind;
    use tokio::sync::Notify as TestNotify;

    struct InstantWork {
        fail: bool,
    }

    #[async_trait]
    impl DownloadWork for InstantWork {
        async fn run(&self, progress: ProgressSink) -> CoreResult<()> {
            progress.report(1.0).await;
            if self.fail {
                Err(CoreError::FetchFailed("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    struct BlockingWork {
        gate: Arc<TestNotify>,
    }

    #[async_trait]
    impl DownloadWork for BlockingWork {
        async fn run(&self, _progress: ProgressSink) -> CoreResult<()> {
            self.gate.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn submit_and_complete_job() {
        let scheduler = Scheduler::new(2, CancellationToken::new());
        let id = scheduler
            .submit(
                TitleRef::new(Kind::Anime, "Frieren"),
                UnitSelector::Episode {
                    season: Some(1),
                    episode: 1,
                },
                Arc::new(InstantWork { fail: false }),
            )
            .await
            .unwrap();

        for _ in 0..20 {
            let job = scheduler.status(id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, JobStatus::Completed);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let scheduler = Scheduler::new(1, CancellationToken::new());
        let gate = Arc::new(TestNotify::new());
        let title = TitleRef::new(Kind::Anime, "Frieren");
        let unit = UnitSelector::Episode {
            season: Some(1),
            episode: 1,
        };

        scheduler
            .submit(title.clone(), unit, Arc::new(BlockingWork { gate: gate.clone() }))
            .await
            .unwrap();

        let err = scheduler
            .submit(title, unit, Arc::new(InstantWork { fail: false }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate");

        gate.notify_one();
    }

    #[tokio::test]
    async fn parallelism_bound_is_respected() {
        let scheduler = Scheduler::new(2, CancellationToken::new());
        let gate = Arc::new(TestNotify::new());
        let mut ids = Vec::new();
        for i in 0..5 {
            let id = scheduler
                .submit(
                    TitleRef::new(Kind::Anime, format!("Show {}", i)),
                    UnitSelector::Episode {
                        season: Some(1),
                        episode: 1,
                    },
                    Arc::new(BlockingWork { gate: gate.clone() }),
                )
                .await
                .unwrap();
            ids.push(id);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let overview = scheduler.overview().await;
        assert_eq!(overview.running, 2);
        assert_eq!(overview.pending, 3);

        gate.notify_waiters();
    }

    #[tokio::test]
    async fn cancelling_pending_job_is_immediate() {
        let scheduler = Scheduler::new(1, CancellationToken::new());
        let gate = Arc::new(TestNotify::new());
        scheduler
            .submit(
                TitleRef::new(Kind::Anime, "A"),
                UnitSelector::Episode {
                    season: Some(1),
                    episode: 1,
                },
                Arc::new(BlockingWork { gate: gate.clone() }),
            )
            .await
            .unwrap();
        let pending_id = scheduler
            .submit(
                TitleRef::new(Kind::Anime, "B"),
                UnitSelector::Episode {
                    season: Some(1),
                    episode: 1,
                },
                Arc::new(InstantWork { fail: false }),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let cancelled = scheduler.cancel(pending_id).await.unwrap();
        assert!(cancelled);
        let job = scheduler.status(pending_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        gate.notify_one();
    }
}
