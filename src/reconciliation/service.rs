//! The Reconciliation Service job itself. Implements the teacher's
//! `BackgroundJob` trait, grounded on the shape of
//! `background_jobs/jobs/popular_content.rs` (a struct holding its own
//! tunables, registered with `JobSchedule::Combined`).

use super::diff::{diff_inventory, needs_refresh};
use crate::background_jobs::{
    BackgroundJob, HookEvent, JobContext, JobError, JobSchedule, ShutdownBehavior,
};
use crate::catalog_store::{Kind, UnitSelector};
use crate::error::CoreError;
use crate::hls_fetcher::{FetchProgress, HlsFetcher};
use crate::provider::ProviderAdapter;
use crate::scheduler::{DownloadWork, ProgressSink, TitleRef};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

/// On-disk destination roots per kind.
#[derive(Debug, Clone)]
pub struct DestinationRoots {
    pub anime_root: PathBuf,
    pub series_root: PathBuf,
    pub film_root: PathBuf,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Where a unit's output file belongs.
fn output_location(
    roots: &DestinationRoots,
    kind: Kind,
    name: &str,
    unit: UnitSelector,
) -> (PathBuf, String) {
    match (kind, unit) {
        (Kind::Film, UnitSelector::Film) => (roots.film_root.join(name), name.to_string()),
        (Kind::Anime, UnitSelector::Episode { episode, .. }) => (
            roots.anime_root.join(name),
            format!("{name} - Episode {episode}"),
        ),
        (Kind::Series, UnitSelector::Episode { season, episode }) => {
            let season = season.unwrap_or(1);
            (
                roots
                    .series_root
                    .join(name)
                    .join(format!("S{season:02}")),
                format!("{name} - S{season:02}E{episode:02}"),
            )
        }
        // A kind/unit mismatch here would be a bug in the diff step, not a
        // runtime condition callers can hit.
        (kind, unit) => unreachable!("kind {:?} paired with unit {:?}", kind, unit),
    }
}

/// Periodically (and on demand) diffs the Catalog Store against each
/// Provider Adapter's inventory and submits the gap to the Scheduler.
pub struct ReconciliationService {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    hls_fetcher: Arc<dyn HlsFetcher>,
    roots: DestinationRoots,
    tick_interval: Duration,
    /// Anime-specific sub-bound layered inside the anime run_fn, independent
    /// of the Scheduler's own global permit.
    anime_semaphore: Arc<Semaphore>,
    /// Raises `HookEvent::OnDownloadComplete` so a waiting title's remaining
    /// gap is re-checked without waiting for the next tick, rather than the
    /// driver loop polling the download scheduler for completions.
    hook_sender: mpsc::Sender<HookEvent>,
}

impl ReconciliationService {
    pub fn new(
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        hls_fetcher: Arc<dyn HlsFetcher>,
        roots: DestinationRoots,
        tick_interval: Duration,
        anime_parallelism_bonus: usize,
        hook_sender: mpsc::Sender<HookEvent>,
    ) -> Self {
        let adapters = adapters
            .into_iter()
            .map(|a| (a.adapter_id().to_string(), a))
            .collect();
        Self {
            adapters,
            hls_fetcher,
            roots,
            tick_interval,
            anime_semaphore: Arc::new(Semaphore::new(anime_parallelism_bonus.max(1))),
            hook_sender,
        }
    }

    fn run_tick(
        &self,
        ctx: &JobContext,
        title_filter: Option<&str>,
        season_filter: Option<u32>,
    ) -> Result<(), JobError> {
        let started = Instant::now();
        let handle = tokio::runtime::Handle::current();
        let now_ts = now();
        let forced = title_filter.is_some();
        let mut jobs_submitted: u64 = 0;

        for kind in [Kind::Anime, Kind::Series, Kind::Film] {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let titles = ctx
                .catalog_store
                .list(kind)
                .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
            crate::metrics::set_catalog_titles(kind.as_db_str(), titles.len());

            for title in titles {
                if let Some(filter_name) = title_filter {
                    if title.name != filter_name {
                        continue;
                    }
                }
                if ctx.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                if !needs_refresh(&title, now_ts, forced) {
                    continue;
                }

                let Some(adapter) = self.adapters.get(&title.provider) else {
                    warn!(title = %title.name, provider = %title.provider, "no adapter registered for provider");
                    continue;
                };

                let inventory = match handle.block_on(adapter.resolve(&title.provider_ref, kind)) {
                    Ok(inventory) => inventory,
                    Err(e) => {
                        warn!(title = %title.name, error = %e, "resolve failed, skipping this tick");
                        continue;
                    }
                };

                if let Err(e) =
                    ctx.catalog_store
                        .update_total(kind, &title.name, inventory.total_units())
                {
                    warn!(title = %title.name, error = %e, "failed to update total_units");
                }

                let mut missing = diff_inventory(&title, &inventory);
                if let Some(season) = season_filter {
                    missing.retain(|m| {
                        matches!(m.unit, UnitSelector::Episode { season: Some(s), .. } if s == season)
                    });
                }

                for missing_unit in missing {
                    let title_ref = TitleRef::new(kind, title.name.clone());
                    let (output_dir, base_name) =
                        output_location(&self.roots, kind, &title.name, missing_unit.unit);

                    let work: Arc<dyn DownloadWork> = Arc::new(ReconciliationWork {
                        adapter: Arc::clone(adapter),
                        hls_fetcher: Arc::clone(&self.hls_fetcher),
                        catalog_store: Arc::clone(&ctx.catalog_store),
                        kind,
                        title_name: title.name.clone(),
                        provider_ref: title.provider_ref.clone(),
                        unit: missing_unit.unit,
                        output_dir,
                        base_name,
                        duration_hint: missing_unit.duration_seconds.map(f64::from),
                        anime_semaphore: (kind == Kind::Anime)
                            .then(|| Arc::clone(&self.anime_semaphore)),
                        hook_sender: self.hook_sender.clone(),
                    });

                    match handle.block_on(ctx.scheduler.submit(title_ref, missing_unit.unit, work))
                    {
                        Ok(_) => jobs_submitted += 1,
                        Err(CoreError::Duplicate(_)) => {}
                        Err(e) => {
                            warn!(title = %title.name, error = %e, "failed to submit job")
                        }
                    }
                }
            }
        }

        info!(jobs_submitted, elapsed = ?started.elapsed(), "reconciliation tick complete");
        crate::metrics::record_reconcile_tick(started.elapsed(), jobs_submitted);
        Ok(())
    }
}

impl BackgroundJob for ReconciliationService {
    fn id(&self) -> &'static str {
        "reconciliation"
    }

    fn name(&self) -> &'static str {
        "Library Reconciliation"
    }

    fn description(&self) -> &'static str {
        "Diffs the catalog against each provider's inventory and enqueues missing units"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            cron: None,
            interval: Some(self.tick_interval),
            hooks: vec![HookEvent::OnStartup, HookEvent::OnDownloadComplete],
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.run_tick(ctx, None, None)
    }

    fn execute_with_params(
        &self,
        ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<(), JobError> {
        let title = params
            .as_ref()
            .and_then(|p| p.get("title"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string());
        let season = params
            .as_ref()
            .and_then(|p| p.get("season"))
            .and_then(|s| s.as_u64())
            .map(|s| s as u32);
        self.run_tick(ctx, title.as_deref(), season)
    }
}

/// One missing unit's worth of acquisition work: resolve playlist, fetch,
/// write back.
struct ReconciliationWork {
    adapter: Arc<dyn ProviderAdapter>,
    hls_fetcher: Arc<dyn HlsFetcher>,
    catalog_store: Arc<dyn crate::catalog_store::CatalogStore>,
    kind: Kind,
    title_name: String,
    provider_ref: String,
    unit: UnitSelector,
    output_dir: PathBuf,
    base_name: String,
    duration_hint: Option<f64>,
    anime_semaphore: Option<Arc<Semaphore>>,
    hook_sender: mpsc::Sender<HookEvent>,
}

impl ReconciliationWork {
    fn record_completion(&self) -> Result<(), CoreError> {
        match self.unit {
            UnitSelector::Film => {
                self.catalog_store
                    .update_progress(self.kind, &self.title_name, 1)?;
            }
            UnitSelector::Episode {
                season: None,
                episode: _,
            } => {
                let title = self
                    .catalog_store
                    .get(self.kind, &self.title_name)?
                    .ok_or_else(|| {
                        CoreError::NotFound(format!("{} disappeared mid-download", self.title_name))
                    })?;
                self.catalog_store.update_progress(
                    self.kind,
                    &self.title_name,
                    title.downloaded_units + 1,
                )?;
            }
            UnitSelector::Episode {
                season: Some(season),
                episode,
            } => {
                let mut title = self
                    .catalog_store
                    .get(self.kind, &self.title_name)?
                    .ok_or_else(|| {
                        CoreError::NotFound(format!("{} disappeared mid-download", self.title_name))
                    })?;
                let entry = title.progress_map.entry(season).or_default();
                entry.downloaded.insert(episode);
                let total = title.progress_map_sum();
                self.catalog_store
                    .update_progress_map(self.kind, &self.title_name, &title.progress_map)?;
                self.catalog_store
                    .update_progress(self.kind, &self.title_name, total)?;
            }
        }
        self.catalog_store
            .update_last_refresh(self.kind, &self.title_name, now())?;
        Ok(())
    }
}

#[async_trait]
impl DownloadWork for ReconciliationWork {
    async fn run(&self, progress: ProgressSink) -> Result<(), CoreError> {
        let _anime_permit = match &self.anime_semaphore {
            Some(sem) => Some(
                Arc::clone(sem)
                    .acquire_owned()
                    .await
                    .map_err(|_| CoreError::Cancelled)?,
            ),
            None => None,
        };

        if progress.is_cancel_requested() {
            return Err(CoreError::Cancelled);
        }

        let playlist = self.adapter.get_playlist(&self.provider_ref, self.unit).await?;

        let sink_for_callback = progress.clone();
        let on_progress: Arc<dyn Fn(FetchProgress) + Send + Sync> =
            Arc::new(move |update: FetchProgress| {
                let sink = sink_for_callback.clone();
                tokio::spawn(async move {
                    sink.report(update.fraction).await;
                });
            });

        self.hls_fetcher
            .fetch(
                &playlist.0,
                &self.output_dir,
                &self.base_name,
                self.duration_hint,
                Some(on_progress),
            )
            .await?;

        self.record_completion()?;
        progress.report(1.0).await;
        let _ = self.hook_sender.try_send(HookEvent::OnDownloadComplete);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anime_output_location_uses_flat_episode_naming() {
        let roots = DestinationRoots {
            anime_root: PathBuf::from("/media/anime"),
            series_root: PathBuf::from("/media/series"),
            film_root: PathBuf::from("/media/films"),
        };
        let (dir, base) = output_location(
            &roots,
            Kind::Anime,
            "Frieren",
            UnitSelector::Episode {
                season: None,
                episode: 7,
            },
        );
        assert_eq!(dir, PathBuf::from("/media/anime/Frieren"));
        assert_eq!(base, "Frieren - Episode 7");
    }

    #[test]
    fn series_output_location_zero_pads_season_and_episode() {
        let roots = DestinationRoots {
            anime_root: PathBuf::from("/media/anime"),
            series_root: PathBuf::from("/media/series"),
            film_root: PathBuf::from("/media/films"),
        };
        let (dir, base) = output_location(
            &roots,
            Kind::Series,
            "The Wire",
            UnitSelector::Episode {
                season: Some(2),
                episode: 5,
            },
        );
        assert_eq!(dir, PathBuf::from("/media/series/The Wire/S02"));
        assert_eq!(base, "The Wire - S02E05");
    }

    #[test]
    fn film_output_location_uses_title_name_directly() {
        let roots = DestinationRoots {
            anime_root: PathBuf::from("/media/anime"),
            series_root: PathBuf::from("/media/series"),
            film_root: PathBuf::from("/media/films"),
        };
        let (dir, base) = output_location(&roots, Kind::Film, "Paddington", UnitSelector::Film);
        assert_eq!(dir, PathBuf::from("/media/films/Paddington"));
        assert_eq!(base, "Paddington");
    }
}
