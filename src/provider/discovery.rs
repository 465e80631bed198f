//! Provider base-URL discovery as an adapter lifecycle concern, rather than
//! a free function with a module cache. Resolution consults a remote
//! directory service first, falls back to a static candidate list, and
//! caches the winning host for the process's lifetime.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Lazily resolves and caches an adapter's mutable host root. One instance
/// lives for the lifetime of its owning adapter.
pub struct BaseUrlDiscovery {
    directory_url: Option<String>,
    static_fallbacks: Vec<String>,
    client: reqwest::Client,
    resolved: OnceCell<String>,
}

impl BaseUrlDiscovery {
    pub fn new(directory_url: Option<String>, static_fallbacks: Vec<String>) -> Self {
        Self {
            directory_url,
            static_fallbacks,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build discovery HTTP client"),
            resolved: OnceCell::new(),
        }
    }

    /// Return the cached base URL, resolving it on first call. Discovery
    /// failure is scoped to this call and surfaces as `ProviderUnavailable`;
    /// it never panics or aborts the process.
    pub async fn resolve(&self) -> CoreResult<&str> {
        self.resolved
            .get_or_try_init(|| async { self.discover().await })
            .await
            .map(|s| s.as_str())
    }

    async fn discover(&self) -> CoreResult<String> {
        if let Some(directory_url) = &self.directory_url {
            if let Ok(resp) = self.client.get(directory_url).send().await {
                if resp.status().is_success() {
                    if let Ok(body) = resp.text().await {
                        let candidate = body.trim();
                        if !candidate.is_empty() {
                            return Ok(candidate.trim_end_matches('/').to_string());
                        }
                    }
                }
            }
        }

        for candidate in &self.static_fallbacks {
            if let Ok(resp) = self.client.head(candidate).send().await {
                if resp.status().is_success() || resp.status().is_redirection() {
                    return Ok(candidate.trim_end_matches('/').to_string());
                }
            }
        }

        Err(CoreError::ProviderUnavailable(
            "no provider base URL could be resolved".to_string(),
        ))
    }
}
