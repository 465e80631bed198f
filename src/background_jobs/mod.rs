//! Background job scheduling and execution system.
//!
//! This module provides infrastructure for running periodic and
//! hook-triggered background tasks. The Reconciliation Service is the only
//! job this crate registers, but the scheduler itself is generic.

mod context;
mod handle;
mod job;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerCommand, SchedulerHandle, SharedJobState};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
