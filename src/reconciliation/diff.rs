//! Inventory-minus-downloaded diffing. No teacher analogue — this logic
//! doesn't exist in the corpus in this shape.

use crate::catalog_store::{Kind, ProgressMap, Title, UnitSelector};
use crate::provider::Inventory;
use std::collections::BTreeSet;

/// One missing unit, paired with the provider-opaque ref needed to fetch its
/// playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingUnit {
    pub unit: UnitSelector,
    pub provider_episode_ref: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// Floor a (possibly decimal) episode number for diffing. `9.5` and `9` both
/// floor to `9`, so an inventory listing both proposes only unit 9 once.
fn floor_episode(number: f64) -> u32 {
    number.floor().max(0.0) as u32
}

/// Compute the missing units for a Title given its adapter-reported
/// inventory. Caller already decided (step 1) that this Title is due for a
/// refresh.
pub fn diff_inventory(title: &Title, inventory: &Inventory) -> Vec<MissingUnit> {
    match inventory {
        Inventory::Film => {
            if title.downloaded_units == 0 {
                vec![MissingUnit {
                    unit: UnitSelector::Film,
                    provider_episode_ref: None,
                    duration_seconds: None,
                }]
            } else {
                Vec::new()
            }
        }
        Inventory::FlatEpisodes { unit_count } => {
            let downloaded: BTreeSet<u32> = if title.progress_map.is_empty() {
                (1..=title.downloaded_units).collect()
            } else {
                title
                    .progress_map
                    .values()
                    .flat_map(|s| s.downloaded.iter().copied())
                    .collect()
            };
            (1..=*unit_count)
                .filter(|n| !downloaded.contains(n))
                .map(|n| MissingUnit {
                    unit: UnitSelector::Episode {
                        season: None,
                        episode: n,
                    },
                    provider_episode_ref: None,
                    duration_seconds: None,
                })
                .collect()
        }
        Inventory::Seasons(seasons) => {
            let mut missing = Vec::new();
            for season in seasons {
                let downloaded = title
                    .progress_map
                    .get(&season.season)
                    .map(|p| &p.downloaded)
                    .cloned()
                    .unwrap_or_default();

                let mut seen_floored = BTreeSet::new();
                for ep in &season.episodes {
                    let floored = floor_episode(ep.number);
                    if downloaded.contains(&floored) || !seen_floored.insert(floored) {
                        continue;
                    }
                    missing.push(MissingUnit {
                        unit: UnitSelector::Episode {
                            season: Some(season.season),
                            episode: floored,
                        },
                        provider_episode_ref: Some(ep.provider_episode_ref.clone()),
                        duration_seconds: ep.duration_seconds,
                    });
                }
            }
            missing
        }
    }
}

/// Step 1's refresh decision: known gap, or episodic + speculative probe
/// window, or forced.
pub fn needs_refresh(title: &Title, now: i64, forced: bool) -> bool {
    if forced {
        return true;
    }
    if title.downloaded_units < title.total_units {
        return true;
    }
    if title.kind.is_episodic() {
        if let Some(last_refresh) = title.last_refresh {
            let age_days = (now - last_refresh) / 86_400;
            return (7..21).contains(&age_days);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::SeasonProgress;
    use crate::provider::{EpisodeRef, SeasonInventory};
    use std::collections::BTreeMap;

    fn anime_title(downloaded_units: u32, total_units: u32, progress_map: ProgressMap) -> Title {
        Title {
            kind: Kind::Anime,
            name: "X".into(),
            provider: "a".into(),
            provider_ref: "/play/x".into(),
            year: None,
            total_units,
            downloaded_units,
            progress_map,
            last_refresh: None,
            created_at: 0,
        }
    }

    #[test]
    fn fully_synced_film_has_no_missing_units() {
        let title = anime_title(1, 1, ProgressMap::new());
        let mut film_title = title;
        film_title.kind = Kind::Film;
        assert!(diff_inventory(&film_title, &Inventory::Film).is_empty());
    }

    #[test]
    fn pending_film_is_missing_one_unit() {
        let mut title = anime_title(0, 1, ProgressMap::new());
        title.kind = Kind::Film;
        let missing = diff_inventory(&title, &Inventory::Film);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].unit, UnitSelector::Film);
    }

    #[test]
    fn decimal_episode_floors_and_dedupes_against_integer_sibling() {
        let title = anime_title(0, 10, ProgressMap::new());
        let inventory = Inventory::Seasons(vec![SeasonInventory {
            season: 1,
            episodes: vec![
                EpisodeRef {
                    number: 9.0,
                    provider_episode_ref: "ep9".into(),
                    duration_seconds: None,
                },
                EpisodeRef {
                    number: 9.5,
                    provider_episode_ref: "ep9.5".into(),
                    duration_seconds: None,
                },
            ],
        }]);
        let missing = diff_inventory(&title, &inventory);
        assert_eq!(missing.len(), 1);
        assert_eq!(
            missing[0].unit,
            UnitSelector::Episode {
                season: Some(1),
                episode: 9
            }
        );
    }

    #[test]
    fn already_downloaded_episode_is_excluded() {
        let mut map = ProgressMap::new();
        map.insert(
            1,
            SeasonProgress {
                total: 2,
                downloaded: [1u32].into_iter().collect(),
            },
        );
        let title = anime_title(1, 2, map);
        let inventory = Inventory::Seasons(vec![SeasonInventory {
            season: 1,
            episodes: vec![
                EpisodeRef {
                    number: 1.0,
                    provider_episode_ref: "ep1".into(),
                    duration_seconds: None,
                },
                EpisodeRef {
                    number: 2.0,
                    provider_episode_ref: "ep2".into(),
                    duration_seconds: None,
                },
            ],
        }]);
        let missing = diff_inventory(&title, &inventory);
        assert_eq!(missing.len(), 1);
        assert_eq!(
            missing[0].unit,
            UnitSelector::Episode {
                season: Some(1),
                episode: 2
            }
        );
    }

    #[test]
    fn flat_episodes_uses_downloaded_units_when_no_progress_map() {
        let title = anime_title(2, 5, ProgressMap::new());
        let missing = diff_inventory(&title, &Inventory::FlatEpisodes { unit_count: 5 });
        let episodes: Vec<u32> = missing
            .iter()
            .map(|m| match m.unit {
                UnitSelector::Episode { episode, .. } => episode,
                UnitSelector::Film => unreachable!(),
            })
            .collect();
        assert_eq!(episodes, vec![3, 4, 5]);
    }

    #[test]
    fn gap_forces_refresh_regardless_of_last_refresh_age() {
        let title = anime_title(1, 3, ProgressMap::new());
        assert!(needs_refresh(&title, 0, false));
    }

    #[test]
    fn fully_synced_title_outside_probe_window_is_skipped() {
        let mut title = anime_title(3, 3, ProgressMap::new());
        title.last_refresh = Some(0);
        assert!(!needs_refresh(&title, 1 * 86_400, false));
        assert!(!needs_refresh(&title, 25 * 86_400, false));
    }

    #[test]
    fn fully_synced_title_inside_probe_window_is_refreshed_once() {
        let mut title = anime_title(3, 3, ProgressMap::new());
        title.last_refresh = Some(0);
        assert!(needs_refresh(&title, 10 * 86_400, false));
    }

    #[test]
    fn forced_refresh_bypasses_all_other_checks() {
        let mut title = anime_title(3, 3, ProgressMap::new());
        title.last_refresh = Some(0);
        assert!(needs_refresh(&title, 1, true));
    }
}
