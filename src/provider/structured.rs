//! The structured adapter: iframe-scraping, season-aware. Grounded on
//! `original_source/src/yuna/providers/streamingcommunity/models.py` (value
//! shapes) and `tests/test_streamingcommunity.py` (the exact extraction
//! protocol — `X-Inertia` headers, `window.masterPlaylist` pattern,
//! token/expiry/HD-flag query merge), generalized into a five-step
//! playlist extraction protocol.

use super::discovery::BaseUrlDiscovery;
use super::trait_def::{
    EpisodeRef, Inventory, PlaylistUrl, ProviderAdapter, SearchHit, SeasonInventory,
};
use crate::catalog_store::{Kind, UnitSelector};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const INERTIA_VERSION: &str = "1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

lazy_static! {
    static ref IFRAME_SRC_RE: Regex =
        Regex::new(r#"<iframe[^>]+src=["']([^"']+)["']"#).expect("static regex");
    static ref SCRIPT_BODY_RE: Regex =
        Regex::new(r"(?s)<script[^>]*>(.*?)</script>").expect("static regex");
    static ref MASTER_PLAYLIST_URL_RE: Regex =
        Regex::new(r#"masterPlaylist\s*=\s*\{[^}]*?url:\s*['"]([^'"]+)['"]"#)
            .expect("static regex");
    static ref STREAMS_ARRAY_URL_RE: Regex =
        Regex::new(r#"streams\s*:\s*\[\s*\{[^}]*?url:\s*['"]([^'"]+)['"]"#)
            .expect("static regex");
    static ref TOKEN_RE: Regex =
        Regex::new(r#"token['"]?\s*:\s*['"]([^'"]+)['"]"#).expect("static regex");
    static ref EXPIRES_RE: Regex =
        Regex::new(r#"expires['"]?\s*:\s*['"]?(\d+)['"]?"#).expect("static regex");
    static ref CAN_PLAY_FHD_RE: Regex =
        Regex::new(r#"canPlayFHD['"]?\s*:\s*(true|false)"#).expect("static regex");
}

/// The iframe-scraping, season-aware adapter.
pub struct StructuredAdapter {
    client: reqwest::Client,
    discovery: BaseUrlDiscovery,
}

impl StructuredAdapter {
    pub fn new(directory_url: Option<String>, static_fallbacks: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .user_agent(USER_AGENT)
                .build()
                .expect("failed to build structured adapter HTTP client"),
            discovery: BaseUrlDiscovery::new(directory_url, static_fallbacks),
        }
    }

    fn inertia_headers() -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Inertia", reqwest::header::HeaderValue::from_static("true"));
        headers.insert(
            "X-Inertia-Version",
            reqwest::header::HeaderValue::from_static(INERTIA_VERSION),
        );
        headers
    }

    /// Steps 1–3 of the extraction protocol: fetch the title page, find
    /// the iframe, fetch and concatenate its script bodies.
    async fn fetch_concatenated_scripts(&self, page_url: &str) -> CoreResult<String> {
        let page = self
            .client
            .get(page_url)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?
            .text()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        let iframe_url = IFRAME_SRC_RE
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                CoreError::PlaylistUnavailable("no iframe found on title page".to_string())
            })?;

        let iframe_body = self
            .client
            .get(&iframe_url)
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?
            .text()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        let concatenated: String = SCRIPT_BODY_RE
            .captures_iter(&iframe_body)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect::<Vec<_>>()
            .join("\n");

        if concatenated.is_empty() {
            return Err(CoreError::PlaylistUnavailable(
                "iframe contained no script bodies".to_string(),
            ));
        }
        Ok(concatenated)
    }

    /// Step 4: recover playlist URL, token, expiry, and HD flag from the
    /// concatenated script text.
    fn extract_playlist_parts(scripts: &str) -> CoreResult<(String, Option<String>, Option<String>, bool)> {
        let base_url = STREAMS_ARRAY_URL_RE
            .captures(scripts)
            .or_else(|| MASTER_PLAYLIST_URL_RE.captures(scripts))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                CoreError::PlaylistUnavailable(
                    "no masterPlaylist/streams URL found in scripts".to_string(),
                )
            })?;

        let token = TOKEN_RE
            .captures(scripts)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let expires = EXPIRES_RE
            .captures(scripts)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let can_play_fhd = CAN_PLAY_FHD_RE
            .captures(scripts)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str() == "true")
            .unwrap_or(false);

        Ok((base_url, token, expires, can_play_fhd))
    }

    /// Step 5: merge token, expiry, and the HD flag into the playlist URL's
    /// query string, preserving parameters already present.
    fn merge_playlist_query(
        base_url: &str,
        token: Option<String>,
        expires: Option<String>,
        hd: bool,
    ) -> String {
        let (path, existing_query) = match base_url.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (base_url.to_string(), String::new()),
        };

        let mut params: Vec<(String, String)> = existing_query
            .split('&')
            .filter(|kv| !kv.is_empty())
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut set = |key: &str, value: String| {
            if !params.iter().any(|(k, _)| k == key) {
                params.push((key.to_string(), value));
            }
        };

        if let Some(token) = token {
            set("token", urlencoding::encode(&token).into_owned());
        }
        if let Some(expires) = expires {
            set("expires", expires);
        }
        if hd {
            set("h", "1".to_string());
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        }
    }
}

#[async_trait]
impl ProviderAdapter for StructuredAdapter {
    fn adapter_id(&self) -> &'static str {
        "structured"
    }

    async fn search(&self, query: &str) -> CoreResult<Vec<SearchHit>> {
        let base_url = self.discovery.resolve().await?;
        let url = format!("{base_url}/api/search?q={}", urlencoding::encode(query));

        let response = self
            .client
            .get(&url)
            .headers(Self::inertia_headers())
            .send()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CoreError::ProviderUnavailable(format!(
                "search returned status {}",
                response.status()
            )));
        }

        let body: SearchResponseBody = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        Ok(body
            .titles
            .into_iter()
            .map(|t| SearchHit {
                provider_ref: t.slug,
                display_name: t.name,
                year: t.year.map(|y| y.to_string()),
                kind_hint: match t.kind.as_str() {
                    "anime" => Kind::Anime,
                    "movie" | "film" => Kind::Film,
                    _ => Kind::Series,
                },
            })
            .collect())
    }

    async fn resolve(&self, provider_ref: &str, kind: Kind) -> CoreResult<Inventory> {
        if kind == Kind::Film {
            return Ok(Inventory::Film);
        }

        let base_url = self.discovery.resolve().await?;
        let url = format!("{base_url}/titles/{provider_ref}");

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

        let body: SeriesInfoBody = response
            .json()
            .await
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        let seasons = body
            .seasons
            .into_iter()
            .map(|s| SeasonInventory {
                season: s.number,
                episodes: s
                    .episodes
                    .into_iter()
                    .map(|e| EpisodeRef {
                        number: e.number,
                        provider_episode_ref: e.id,
                        duration_seconds: e.duration,
                    })
                    .collect(),
            })
            .collect();

        Ok(Inventory::Seasons(seasons))
    }

    async fn get_playlist(
        &self,
        provider_ref: &str,
        unit: UnitSelector,
    ) -> CoreResult<PlaylistUrl> {
        let base_url = self.discovery.resolve().await?;
        let page_url = match unit {
            UnitSelector::Film => format!("{base_url}/watch/{provider_ref}"),
            UnitSelector::Episode { season, episode } => format!(
                "{base_url}/watch/{provider_ref}?season={}&episode={episode}",
                season.unwrap_or(1)
            ),
        };

        let scripts = self.fetch_concatenated_scripts(&page_url).await?;
        let (url, token, expires, hd) = Self::extract_playlist_parts(&scripts)?;
        let final_url = Self::merge_playlist_query(&url, token, expires, hd);
        Ok(PlaylistUrl(final_url))
    }
}

#[derive(serde::Deserialize)]
struct SearchResponseBody {
    titles: Vec<SearchHitBody>,
}

#[derive(serde::Deserialize)]
struct SearchHitBody {
    slug: String,
    name: String,
    year: Option<u32>,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(serde::Deserialize)]
struct SeriesInfoBody {
    seasons: Vec<SeasonBody>,
}

#[derive(serde::Deserialize)]
struct SeasonBody {
    number: u32,
    episodes: Vec<EpisodeBody>,
}

#[derive(serde::Deserialize)]
struct EpisodeBody {
    id: String,
    number: f64,
    duration: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_iframe_src_from_title_page() {
        let page = r#"<div><iframe src="https://cdn.example.com/embed/42"></iframe></div>"#;
        let captured = IFRAME_SRC_RE.captures(page).unwrap();
        assert_eq!(&captured[1], "https://cdn.example.com/embed/42");
    }

    #[test]
    fn extracts_master_playlist_url_token_expires_and_hd_flag() {
        let scripts = r#"
            window.masterPlaylist = {url: 'https://cdn.example.com/master.m3u8', token: 'abc123', expires: '1716400000'};
            window.canPlayFHD = true;
        "#;
        let (url, token, expires, hd) = StructuredAdapter::extract_playlist_parts(scripts).unwrap();
        assert_eq!(url, "https://cdn.example.com/master.m3u8");
        assert_eq!(token, Some("abc123".to_string()));
        assert_eq!(expires, Some("1716400000".to_string()));
        assert!(hd);
    }

    #[test]
    fn prefers_streams_array_url_over_master_playlist() {
        let scripts = r#"
            window.streams = [{url: 'https://cdn.example.com/active.m3u8', active: true}];
            window.masterPlaylist = {url: 'https://cdn.example.com/fallback.m3u8'};
        "#;
        let (url, _, _, _) = StructuredAdapter::extract_playlist_parts(scripts).unwrap();
        assert_eq!(url, "https://cdn.example.com/active.m3u8");
    }

    #[test]
    fn merge_adds_missing_params_without_duplicating_existing_ones() {
        let merged = StructuredAdapter::merge_playlist_query(
            "https://cdn.example.com/master.m3u8?quality=720",
            Some("tok".to_string()),
            Some("999".to_string()),
            true,
        );
        assert!(merged.contains("quality=720"));
        assert!(merged.contains("token=tok"));
        assert!(merged.contains("expires=999"));
        assert!(merged.contains("h=1"));
    }

    #[test]
    fn merge_preserves_parameters_already_present() {
        let merged = StructuredAdapter::merge_playlist_query(
            "https://cdn.example.com/master.m3u8?token=existing",
            Some("new-token".to_string()),
            None,
            false,
        );
        assert!(merged.contains("token=existing"));
        assert!(!merged.contains("new-token"));
    }

    #[test]
    fn extraction_fails_cleanly_when_no_pattern_matches() {
        let result = StructuredAdapter::extract_playlist_parts("no playlist info here");
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), "playlist_unavailable");
    }
}
