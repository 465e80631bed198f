//! The simple adapter: flat episode count, no season dimension. Delegates
//! playlist resolution to its own upstream-specific path rather than the
//! structured adapter's iframe-scraping protocol. Grounded on
//! `original_source/database.py`'s simpler per-kind CRUD shape, which never
//! deals with a `seasons_data` column.

use super::discovery::BaseUrlDiscovery;
use super::trait_def::{Inventory, PlaylistUrl, ProviderAdapter, SearchHit};
use crate::catalog_store::{Kind, UnitSelector};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::time::Duration;

const USER_AGENT: &str = "mediahoard/0.1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Flat-episode adapter for upstreams with no season structure.
pub struct SimpleAdapter {
    client: reqwest::Client,
    discovery: BaseUrlDiscovery,
}

impl SimpleAdapter {
    pub fn new(directory_url: Option<String>, static_fallbacks: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .user_agent(USER_AGENT)
                .build()
                .expect("failed to build simple adapter HTTP client"),
            discovery: BaseUrlDiscovery::new(directory_url, static_fallbacks),
        }
    }
}

#[async_trait]
impl ProviderAdapter for SimpleAdapter {
    fn adapter_id(&self) -> &'static str {
        "simple"
    }

    async fn search(&self, query: &str) -> CoreResult<Vec<SearchHit>> {
        let base_url = self.discovery.resolve().await?;
        let url = format!("{base_url}/search?q={}", urlencoding::encode(query));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "search returned status {}",
                response.status()
            )));
        }

        let body: Vec<SimpleSearchHitBody> = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        Ok(body
            .into_iter()
            .map(|h| SearchHit {
                provider_ref: h.path,
                display_name: h.title,
                year: h.year,
                kind_hint: if h.episodes == Some(1) {
                    Kind::Film
                } else {
                    Kind::Anime
                },
            })
            .collect())
    }

    async fn resolve(&self, provider_ref: &str, kind: Kind) -> CoreResult<Inventory> {
        if kind == Kind::Film {
            return Ok(Inventory::Film);
        }

        let base_url = self.discovery.resolve().await?;
        let url = format!("{base_url}/anime/{provider_ref}/info");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "resolve returned status {}",
                response.status()
            )));
        }

        let body: SimpleInfoBody = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        Ok(Inventory::FlatEpisodes {
            unit_count: body.episode_count,
        })
    }

    async fn get_playlist(
        &self,
        provider_ref: &str,
        unit: UnitSelector,
    ) -> CoreResult<PlaylistUrl> {
        let base_url = self.discovery.resolve().await?;
        let episode = match unit {
            UnitSelector::Film => 1,
            UnitSelector::Episode { episode, .. } => episode,
        };
        let url = format!("{base_url}/anime/{provider_ref}/episode/{episode}/playlist");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::PlaylistUnavailable(format!(
                "playlist endpoint returned status {}",
                response.status()
            )));
        }

        let body: SimplePlaylistBody = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        if body.url.is_empty() {
            return Err(CoreError::PlaylistUnavailable(
                "empty playlist URL in response".to_string(),
            ));
        }
        Ok(PlaylistUrl(body.url))
    }
}

#[derive(serde::Deserialize)]
struct SimpleSearchHitBody {
    path: String,
    title: String,
    year: Option<String>,
    episodes: Option<u32>,
}

#[derive(serde::Deserialize)]
struct SimpleInfoBody {
    episode_count: u32,
}

#[derive(serde::Deserialize)]
struct SimplePlaylistBody {
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_film_never_hits_the_network() {
        let adapter = SimpleAdapter::new(None, vec![]);
        let inventory = adapter.resolve("anything", Kind::Film).await.unwrap();
        assert_eq!(inventory, Inventory::Film);
    }

    #[test]
    fn inventory_total_units_matches_flat_count() {
        let inventory = Inventory::FlatEpisodes { unit_count: 12 };
        assert_eq!(inventory.total_units(), 12);
    }
}
