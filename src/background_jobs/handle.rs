use super::job::{BackgroundJob, JobError, JobSchedule};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

const HISTORY_PER_JOB: usize = 50;

/// Information about a registered job for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: JobScheduleInfo,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable schedule information.
#[derive(Debug, Clone, Serialize)]
pub struct JobScheduleInfo {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<Vec<String>>,
}

impl From<JobSchedule> for JobScheduleInfo {
    fn from(schedule: JobSchedule) -> Self {
        match schedule {
            JobSchedule::Cron(expr) => JobScheduleInfo {
                schedule_type: "cron".to_string(),
                cron: Some(expr),
                value_secs: None,
                hooks: None,
            },
            JobSchedule::Interval(duration) => JobScheduleInfo {
                schedule_type: "interval".to_string(),
                value_secs: Some(duration.as_secs()),
                cron: None,
                hooks: None,
            },
            JobSchedule::Hook(event) => JobScheduleInfo {
                schedule_type: "hook".to_string(),
                hooks: Some(vec![event.to_string()]),
                value_secs: None,
                cron: None,
            },
            JobSchedule::Combined {
                cron,
                interval,
                hooks,
            } => JobScheduleInfo {
                schedule_type: "combined".to_string(),
                cron,
                value_secs: interval.map(|d| d.as_secs()),
                hooks: Some(hooks.iter().map(|h| h.to_string()).collect()),
            },
        }
    }
}

/// A single past job execution. Kept in memory only — nothing in this
/// crate serves it over a restart boundary.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    TriggerJob {
        job_id: String,
        response: oneshot::Sender<Result<(), JobError>>,
    },
}

/// In-memory schedule bookkeeping for interval-based jobs.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleState {
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Shared state between scheduler and handle.
pub struct SharedJobState {
    /// Static job info (set at registration, never changes)
    pub jobs: HashMap<String, Arc<dyn BackgroundJob>>,
    /// Currently running job IDs
    pub running_jobs: std::collections::HashSet<String>,
    /// Per-job schedule state for interval/combined jobs.
    pub schedule_state: HashMap<String, ScheduleState>,
    /// Per-job bounded run history, most recent last.
    pub history: HashMap<String, VecDeque<JobRunInfo>>,
}

impl SharedJobState {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            running_jobs: std::collections::HashSet::new(),
            schedule_state: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn record_run(&mut self, job_id: &str, run: JobRunInfo) {
        let entry = self.history.entry(job_id.to_string()).or_default();
        entry.push_back(run);
        while entry.len() > HISTORY_PER_JOB {
            entry.pop_front();
        }
    }

    pub fn last_run(&self, job_id: &str) -> Option<JobRunInfo> {
        self.history.get(job_id).and_then(|h| h.back()).cloned()
    }
}

impl Default for SharedJobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to interact with the job scheduler from other async tasks.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// Channel to send commands to the scheduler
    command_tx: mpsc::Sender<SchedulerCommand>,
    /// Shared state for reading job info
    shared_state: Arc<RwLock<SharedJobState>>,
}

impl SchedulerHandle {
    /// Create a new scheduler handle.
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
        }
    }

    /// Get information about all registered jobs.
    pub async fn list_jobs(&self) -> Result<Vec<JobInfo>> {
        let state = self.shared_state.read().await;
        let mut jobs = Vec::new();

        for (job_id, job) in &state.jobs {
            let is_running = state.running_jobs.contains(job_id);
            let last_run = state.last_run(job_id);
            let next_run_at = state
                .schedule_state
                .get(job_id)
                .map(|s| s.next_run_at.to_rfc3339());

            jobs.push(JobInfo {
                id: job_id.clone(),
                name: job.name().to_string(),
                description: job.description().to_string(),
                schedule: job.schedule().into(),
                is_running,
                last_run,
                next_run_at,
            });
        }

        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    /// Get information about a specific job.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobInfo>> {
        let state = self.shared_state.read().await;

        if let Some(job) = state.jobs.get(job_id) {
            let is_running = state.running_jobs.contains(job_id);
            let last_run = state.last_run(job_id);
            let next_run_at = state
                .schedule_state
                .get(job_id)
                .map(|s| s.next_run_at.to_rfc3339());

            Ok(Some(JobInfo {
                id: job_id.to_string(),
                name: job.name().to_string(),
                description: job.description().to_string(),
                schedule: job.schedule().into(),
                is_running,
                last_run,
                next_run_at,
            }))
        } else {
            Ok(None)
        }
    }

    /// Trigger a job manually.
    pub async fn trigger_job(&self, job_id: &str) -> Result<(), JobError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::TriggerJob {
                job_id: job_id.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler not available".to_string()))?;

        response_rx
            .await
            .map_err(|_| JobError::ExecutionFailed("Scheduler did not respond".to_string()))?
    }

    /// Get job execution history, most recent last.
    pub async fn get_job_history(&self, job_id: &str, limit: usize) -> Vec<JobRunInfo> {
        let state = self.shared_state.read().await;
        match state.history.get(job_id) {
            Some(h) => h.iter().rev().take(limit).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Check if a job is currently running.
    pub async fn is_job_running(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.running_jobs.contains(job_id)
    }

    /// Check if a job with the given ID exists.
    pub async fn job_exists(&self, job_id: &str) -> bool {
        let state = self.shared_state.read().await;
        state.jobs.contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::job::HookEvent;
    use std::time::Duration;

    #[test]
    fn test_job_schedule_info_from_cron() {
        let schedule = JobSchedule::Cron("0 0 * * *".to_string());
        let info: JobScheduleInfo = schedule.into();

        assert_eq!(info.schedule_type, "cron");
        assert_eq!(info.cron, Some("0 0 * * *".to_string()));
        assert!(info.value_secs.is_none());
        assert!(info.hooks.is_none());
    }

    #[test]
    fn test_job_schedule_info_from_interval() {
        let schedule = JobSchedule::Interval(Duration::from_secs(3600));
        let info: JobScheduleInfo = schedule.into();

        assert_eq!(info.schedule_type, "interval");
        assert_eq!(info.value_secs, Some(3600));
        assert!(info.cron.is_none());
        assert!(info.hooks.is_none());
    }

    #[test]
    fn test_job_schedule_info_from_hook() {
        let schedule = JobSchedule::Hook(HookEvent::OnStartup);
        let info: JobScheduleInfo = schedule.into();

        assert_eq!(info.schedule_type, "hook");
        assert_eq!(info.hooks, Some(vec!["OnStartup".to_string()]));
        assert!(info.value_secs.is_none());
        assert!(info.cron.is_none());
    }

    #[test]
    fn test_job_schedule_info_from_combined() {
        let schedule = JobSchedule::Combined {
            cron: Some("0 * * * *".to_string()),
            interval: Some(Duration::from_secs(1800)),
            hooks: vec![HookEvent::OnStartup, HookEvent::OnDownloadComplete],
        };
        let info: JobScheduleInfo = schedule.into();

        assert_eq!(info.schedule_type, "combined");
        assert_eq!(info.cron, Some("0 * * * *".to_string()));
        assert_eq!(info.value_secs, Some(1800));
        let hooks = info.hooks.unwrap();
        assert_eq!(hooks.len(), 2);
        assert!(hooks.contains(&"OnStartup".to_string()));
        assert!(hooks.contains(&"OnDownloadComplete".to_string()));
    }

    #[test]
    fn shared_job_state_bounds_history_per_job() {
        let mut state = SharedJobState::new();
        for i in 0..(HISTORY_PER_JOB + 10) {
            state.record_run(
                "job_a",
                JobRunInfo {
                    started_at: format!("run-{i}"),
                    finished_at: None,
                    status: "completed".to_string(),
                    error_message: None,
                    triggered_by: "schedule".to_string(),
                },
            );
        }
        assert_eq!(state.history.get("job_a").unwrap().len(), HISTORY_PER_JOB);
        assert_eq!(
            state.history.get("job_a").unwrap().back().unwrap().started_at,
            format!("run-{}", HISTORY_PER_JOB + 9)
        );
    }

    #[test]
    fn last_run_returns_most_recent() {
        let mut state = SharedJobState::new();
        state.record_run(
            "job_a",
            JobRunInfo {
                started_at: "first".to_string(),
                finished_at: None,
                status: "completed".to_string(),
                error_message: None,
                triggered_by: "schedule".to_string(),
            },
        );
        state.record_run(
            "job_a",
            JobRunInfo {
                started_at: "second".to_string(),
                finished_at: None,
                status: "failed".to_string(),
                error_message: Some("x".to_string()),
                triggered_by: "manual".to_string(),
            },
        );
        assert_eq!(state.last_run("job_a").unwrap().started_at, "second");
    }
}
