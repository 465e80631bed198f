//! CatalogStore trait: durable, concurrency-safe CRUD on Titles, per
//! spec.md §4.1. One operation per bullet point in that section.

use super::models::{Kind, ProgressMap, Title};
use crate::error::CoreResult;

pub trait CatalogStore: Send + Sync {
    /// Insert a new Title. Returns `Ok(false)` (not an error) if a Title
    /// with the same (kind, name) already exists — see `CoreError::Duplicate`
    /// for the case callers want to surface that as a hard failure instead.
    fn add(
        &self,
        kind: Kind,
        name: &str,
        provider: &str,
        provider_ref: &str,
        total_units: u32,
        year: Option<&str>,
    ) -> CoreResult<bool>;

    /// Exact (kind, name) match.
    fn get(&self, kind: Kind, name: &str) -> CoreResult<Option<Title>>;

    /// Case-insensitive substring match on `name`, first hit in stable
    /// (name-ascending) order. Used for user-facing partial-name lookups.
    fn search(&self, kind: Kind, name_substring: &str) -> CoreResult<Option<Title>>;

    /// All Titles of a kind, ordered by name.
    fn list(&self, kind: Kind) -> CoreResult<Vec<Title>>;

    fn update_progress(&self, kind: Kind, name: &str, downloaded_units: u32) -> CoreResult<()>;

    fn update_total(&self, kind: Kind, name: &str, total_units: u32) -> CoreResult<()>;

    fn update_last_refresh(&self, kind: Kind, name: &str, ts: i64) -> CoreResult<()>;

    fn update_progress_map(&self, kind: Kind, name: &str, map: &ProgressMap) -> CoreResult<()>;

    /// Remove a Title record. Returns `Ok(false)` if it didn't exist.
    /// Deleting the title's directory subtree on disk is the caller's
    /// responsibility (best-effort, idempotent, per spec.md §3 Lifecycles).
    fn remove(&self, kind: Kind, name: &str) -> CoreResult<bool>;

    /// Films with `downloaded_units == 0`.
    fn pending_films(&self) -> CoreResult<Vec<Title>>;
}
