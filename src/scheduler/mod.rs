mod aggregator;
mod job;
mod scheduler;

pub use job::{DownloadJob, JobId, JobStatus, TitleRef};
pub use scheduler::{DownloadWork, ProgressSink, Scheduler, SchedulerOverview};
