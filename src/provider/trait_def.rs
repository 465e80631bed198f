//! `ProviderAdapter`: the capability set required of every upstream
//! source. Mirrors the object-safe `Arc<dyn Trait>` shape the teacher
//! uses for `CatalogStore`.

use crate::catalog_store::{Kind, UnitSelector};
use crate::error::CoreResult;
use async_trait::async_trait;

/// A single search result. Carries just enough to let a caller decide
/// whether to `add()` the Title to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub provider_ref: String,
    pub display_name: String,
    pub year: Option<String>,
    pub kind_hint: Kind,
}

/// One season's worth of episodes, as reported by the structured adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonInventory {
    pub season: u32,
    pub episodes: Vec<EpisodeRef>,
}

/// An episode reference as resolved from an adapter's inventory. `number`
/// may carry a fractional part (e.g. a ".5" special); diffing floors it.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRef {
    pub number: f64,
    pub provider_episode_ref: String,
    pub duration_seconds: Option<u32>,
}

/// An adapter's current view of a Title's contents.
#[derive(Debug, Clone, PartialEq)]
pub enum Inventory {
    /// A film: always exactly one unit.
    Film,
    /// A flat episode count with no season dimension (the simple adapter).
    FlatEpisodes { unit_count: u32 },
    /// A season-structured inventory (the structured adapter).
    Seasons(Vec<SeasonInventory>),
}

impl Inventory {
    /// Total number of units across the whole inventory, for
    /// `Title.total_units` bookkeeping.
    pub fn total_units(&self) -> u32 {
        match self {
            Inventory::Film => 1,
            Inventory::FlatEpisodes { unit_count } => *unit_count,
            Inventory::Seasons(seasons) => {
                seasons.iter().map(|s| s.episodes.len() as u32).sum()
            }
        }
    }
}

/// A time-limited HLS master playlist URL, bearing credentials in its query
/// string. Must not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistUrl(pub String);

/// Capability interface a Title's `provider` field names. The core depends
/// on exactly this set and nothing more.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable identifier stored in `Title.provider`.
    fn adapter_id(&self) -> &'static str;

    /// Find candidate titles matching a free-text query.
    async fn search(&self, query: &str) -> CoreResult<Vec<SearchHit>>;

    /// Current inventory for a Title, keyed by its opaque `provider_ref`.
    async fn resolve(&self, provider_ref: &str, kind: Kind) -> CoreResult<Inventory>;

    /// A fully-qualified, credentialed HLS master playlist URL for one unit.
    async fn get_playlist(
        &self,
        provider_ref: &str,
        unit: UnitSelector,
    ) -> CoreResult<PlaylistUrl>;
}
