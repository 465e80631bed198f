//! Unified progress aggregator. Grounded on `UnifiedProgressTracker` in the
//! Python original's `download_manager.py`: a single rate-limited render
//! covering every in-flight job, grouped by kind, with a short tail of
//! recently-finished jobs and background pruning.

use super::job::{DownloadJob, JobId, JobStatus, TitleRef};
use crate::catalog_store::Kind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const BAR_CELLS: usize = 10;
const RECENT_TAIL: usize = 3;
const COALESCE_INTERVAL: Duration = Duration::from_secs(4);
const COMPLETED_RETENTION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct TrackedEntry {
    title_ref: TitleRef,
    status: JobStatus,
    progress: f32,
    finished_at: Option<Instant>,
}

/// Renders a single human-readable snapshot of everything the Scheduler is
/// doing. Internal state is kept separate from `Scheduler`'s job table so
/// the render cadence can be throttled independently of job bookkeeping.
pub struct ProgressAggregator {
    entries: HashMap<JobId, TrackedEntry>,
    last_render_at: Option<Instant>,
    last_emitted: Option<String>,
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            last_render_at: None,
            last_emitted: None,
        }
    }

    pub fn track(&mut self, job: &DownloadJob) {
        let finished_at = job.status.is_terminal().then(Instant::now);
        self.entries.insert(
            job.id,
            TrackedEntry {
                title_ref: job.title_ref.clone(),
                status: job.status,
                progress: job.progress,
                finished_at,
            },
        );
    }

    pub fn remove(&mut self, id: JobId) {
        self.entries.remove(&id);
    }

    /// Drop completed/failed/cancelled entries older than the retention
    /// window. Called on a timer by the scheduler's driver loop.
    pub fn prune(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, e| match e.finished_at {
            Some(t) => now.duration_since(t) < COMPLETED_RETENTION,
            None => true,
        });
    }

    /// Whether enough time has passed since the last render to justify
    /// building a new one (coalesces bursts of progress updates).
    pub fn should_render(&self) -> bool {
        match self.last_render_at {
            None => true,
            Some(t) => t.elapsed() >= COALESCE_INTERVAL,
        }
    }

    /// Build the current snapshot text if the coalescing window has
    /// elapsed, returning `None` if it is identical to the last emitted
    /// text (emissions are suppressed when nothing actually changed).
    pub fn render_if_due(&mut self) -> Option<String> {
        if !self.should_render() {
            return None;
        }
        let text = self.render();
        self.last_render_at = Some(Instant::now());
        if self.last_emitted.as_deref() == Some(text.as_str()) {
            None
        } else {
            self.last_emitted = Some(text.clone());
            Some(text)
        }
    }

    /// Build the current snapshot text unconditionally.
    fn render(&mut self) -> String {
        let mut running: Vec<&TrackedEntry> = self
            .entries
            .values()
            .filter(|e| e.status == JobStatus::Running)
            .collect();
        running.sort_by(|a, b| a.title_ref.name.cmp(&b.title_ref.name));

        let mut pending_by_kind: HashMap<Kind, usize> = HashMap::new();
        for e in self.entries.values().filter(|e| e.status == JobStatus::Pending) {
            *pending_by_kind.entry(e.title_ref.kind).or_default() += 1;
        }

        let mut recent: Vec<&TrackedEntry> = self
            .entries
            .values()
            .filter(|e| e.finished_at.is_some())
            .collect();
        recent.sort_by_key(|e| std::cmp::Reverse(e.finished_at));
        recent.truncate(RECENT_TAIL);

        let mut out = String::new();
        if running.is_empty() && pending_by_kind.is_empty() {
            out.push_str("no active downloads\n");
        }
        for e in &running {
            out.push_str(&format!(
                "{} {} {}\n",
                kind_icon(e.title_ref.kind),
                e.title_ref.name,
                render_bar(e.progress)
            ));
        }
        for (kind, count) in &pending_by_kind {
            out.push_str(&format!("{} {} queued: {}\n", kind_icon(*kind), kind.table_name(), count));
        }
        for e in &recent {
            let marker = match e.status {
                JobStatus::Completed => "done",
                JobStatus::Failed => "failed",
                JobStatus::Cancelled => "cancelled",
                _ => "?",
            };
            out.push_str(&format!(
                "  {} {} ({})\n",
                kind_icon(e.title_ref.kind),
                e.title_ref.name,
                marker
            ));
        }
        out
    }
}

fn kind_icon(kind: Kind) -> &'static str {
    match kind {
        Kind::Anime => "[anime]",
        Kind::Series => "[tv]",
        Kind::Film => "[film]",
    }
}

fn render_bar(progress: f32) -> String {
    let filled = ((progress.clamp(0.0, 1.0)) * BAR_CELLS as f32).round() as usize;
    let filled = filled.min(BAR_CELLS);
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(BAR_CELLS - filled),
        progress.clamp(0.0, 1.0) * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::UnitSelector;

    fn job(id: u64, status: JobStatus, progress: f32) -> DownloadJob {
        let mut j = DownloadJob::new(
            JobId(id),
            TitleRef::new(Kind::Anime, "Frieren"),
            UnitSelector::Episode {
                season: Some(1),
                episode: 1,
            },
            0,
        );
        j.status = status;
        j.progress = progress;
        j
    }

    #[test]
    fn render_bar_clamps_to_cell_count() {
        assert_eq!(render_bar(0.0), "[----------]   0%");
        assert_eq!(render_bar(1.0), "[##########] 100%");
    }

    #[test]
    fn prune_keeps_non_terminal_entries() {
        let mut agg = ProgressAggregator::new();
        agg.track(&job(1, JobStatus::Running, 0.5));
        agg.prune();
        assert_eq!(agg.entries.len(), 1);
    }

    #[test]
    fn should_render_throttles_after_first_render() {
        let mut agg = ProgressAggregator::new();
        assert!(agg.should_render());
        agg.render_if_due();
        assert!(!agg.should_render());
    }

    #[test]
    fn render_if_due_suppresses_unchanged_text() {
        let mut agg = ProgressAggregator::new();
        agg.track(&job(1, JobStatus::Running, 0.5));
        let first = agg.render_if_due();
        assert!(first.is_some());

        // Force the coalescing window open again without changing any entry.
        agg.last_render_at = None;
        let second = agg.render_if_due();
        assert_eq!(second, None, "unchanged snapshot must be suppressed");
    }

    #[test]
    fn render_if_due_emits_when_content_changes() {
        let mut agg = ProgressAggregator::new();
        agg.track(&job(1, JobStatus::Running, 0.5));
        agg.render_if_due();

        agg.last_render_at = None;
        agg.track(&job(1, JobStatus::Running, 0.9));
        let second = agg.render_if_due();
        assert!(second.is_some());
    }
}
