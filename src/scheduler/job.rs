//! Download job model. Grounded on `DownloadJob`/`DownloadStatus` in the
//! Python original's `download_manager.py`, with fields id/title_ref/
//! unit_ref/status/progress/error/created_at/started_at/completed_at.

use crate::catalog_store::{Kind, UnitSelector};
use serde::Serialize;
use std::fmt;

/// Monotonically increasing job identifier, drawn from a counter that is
/// never reused for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Which Title a job acquires a unit for. Not the Title record itself:
/// the Catalog Store owns Titles exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TitleRef {
    pub kind: Kind,
    pub name: String,
}

impl TitleRef {
    pub fn new(kind: Kind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// A single queued/running/finished acquisition. The Scheduler owns these
/// records exclusively.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    pub id: JobId,
    pub title_ref: TitleRef,
    pub unit_ref: UnitSelector,
    pub status: JobStatus,
    /// 0.0..=1.0, monotonically non-decreasing while Running.
    pub progress: f32,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl DownloadJob {
    pub fn new(id: JobId, title_ref: TitleRef, unit_ref: UnitSelector, created_at: i64) -> Self {
        Self {
            id,
            title_ref,
            unit_ref,
            status: JobStatus::Pending,
            progress: 0.0,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Identity used to reject duplicate submissions (invariant I4: no two
    /// non-terminal jobs for the same (title, unit)).
    pub fn dedup_key(&self) -> (Kind, &str, UnitSelector) {
        (self.title_ref.kind, self.title_ref.name.as_str(), self.unit_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_exactly_three() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn dedup_key_distinguishes_units_of_same_title() {
        let a = DownloadJob::new(
            JobId(1),
            TitleRef::new(Kind::Anime, "Frieren"),
            UnitSelector::Episode {
                season: Some(1),
                episode: 1,
            },
            0,
        );
        let b = DownloadJob::new(
            JobId(2),
            TitleRef::new(Kind::Anime, "Frieren"),
            UnitSelector::Episode {
                season: Some(1),
                episode: 2,
            },
            0,
        );
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
