use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The three content kinds the catalog tracks. Each maps to its own physical
/// table (`anime`, `tv`, `movies`) per the on-disk compatibility note — the
/// `CatalogStore` trait presents one polymorphic API over all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Kind {
    Anime,
    Series,
    Film,
}

impl Kind {
    pub fn table_name(self) -> &'static str {
        match self {
            Kind::Anime => "anime",
            Kind::Series => "tv",
            Kind::Film => "movies",
        }
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            Kind::Anime => "anime",
            Kind::Series => "series",
            Kind::Film => "film",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "anime" => Some(Kind::Anime),
            "series" => Some(Kind::Series),
            "film" => Some(Kind::Film),
            _ => None,
        }
    }

    /// Episodic kinds carry a season-indexed `progress_map`; films don't.
    pub fn is_episodic(self) -> bool {
        !matches!(self, Kind::Film)
    }
}

/// Per-season progress for episodic titles: total episode count for that
/// season and the set of episode numbers already downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonProgress {
    pub total: u32,
    pub downloaded: BTreeSet<u32>,
}

/// `season -> SeasonProgress`. Absent/empty for films and for titles tracked
/// by the flat/simple adapter (season dimension collapses to season `1`).
pub type ProgressMap = BTreeMap<u32, SeasonProgress>;

/// A tracked piece of media. Field names mirror spec.md §3 exactly; they are
/// normative, the storage encoding (three tables) is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub kind: Kind,
    pub name: String,
    pub provider: String,
    pub provider_ref: String,
    pub year: Option<String>,
    pub total_units: u32,
    pub downloaded_units: u32,
    pub progress_map: ProgressMap,
    pub last_refresh: Option<i64>,
    pub created_at: i64,
}

impl Title {
    /// I2: downloaded_units must equal the sum of per-season downloaded
    /// counts for episodic titles with a non-empty progress_map. Titles
    /// tracked by the flat adapter (empty progress_map) are exempt — they
    /// have no season dimension to sum over.
    pub fn progress_map_sum(&self) -> u32 {
        self.progress_map
            .values()
            .map(|s| s.downloaded.len() as u32)
            .sum()
    }

    pub fn is_progress_map_consistent(&self) -> bool {
        self.progress_map.is_empty() || self.progress_map_sum() == self.downloaded_units
    }
}

/// What a DownloadJob fetches: a whole film, or a specific season/episode
/// set within an episodic title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitSelector {
    Film,
    Episode { season: Option<u32>, episode: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title_with_map(map: ProgressMap, downloaded_units: u32) -> Title {
        Title {
            kind: Kind::Anime,
            name: "X".into(),
            provider: "a".into(),
            provider_ref: "/play/x".into(),
            year: None,
            total_units: 10,
            downloaded_units,
            progress_map: map,
            last_refresh: None,
            created_at: 0,
        }
    }

    #[test]
    fn progress_map_sum_matches_invariant() {
        let mut map = ProgressMap::new();
        map.insert(
            1,
            SeasonProgress {
                total: 3,
                downloaded: [1u32, 2].into_iter().collect(),
            },
        );
        let t = title_with_map(map, 2);
        assert!(t.is_progress_map_consistent());
        assert_eq!(t.progress_map_sum(), 2);
    }

    #[test]
    fn inconsistent_progress_map_is_detected() {
        let mut map = ProgressMap::new();
        map.insert(
            1,
            SeasonProgress {
                total: 3,
                downloaded: [1u32].into_iter().collect(),
            },
        );
        let t = title_with_map(map, 5);
        assert!(!t.is_progress_map_consistent());
    }

    #[test]
    fn empty_progress_map_is_exempt() {
        let t = title_with_map(ProgressMap::new(), 1);
        assert!(t.is_progress_map_consistent());
    }

    #[test]
    fn kind_round_trips_through_db_str() {
        for k in [Kind::Anime, Kind::Series, Kind::Film] {
            assert_eq!(Kind::from_db_str(k.as_db_str()), Some(k));
        }
    }
}
