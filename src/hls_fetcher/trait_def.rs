//! `HlsFetcher`: the two-backend fetch contract.

use crate::error::CoreResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single progress update: fraction in [0,1], elapsed seconds, and
/// human-readable size/speed strings as each backend's textual status
/// stream reports them.
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub fraction: f32,
    pub elapsed_secs: f64,
    pub size: String,
    pub speed: String,
}

/// Callback a caller supplies to receive progress updates. Best-effort and
/// rate-limited by the backend (~every 1.5s); callers must not rely on
/// intermediate monotonicity beyond the final fraction = 1.0 call.
pub type ProgressCallback = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// Given a playlist URL and a target directory/base name, produce
/// `<base>.mp4` in the directory, or report a precise failure.
#[async_trait]
pub trait HlsFetcher: Send + Sync {
    /// Fetch and materialize `<output_dir>/<base_name>.mp4`. `duration_hint`
    /// is an optional total-duration hint (seconds) used to turn an
    /// absolute `out_time` into a fraction when the backend doesn't report
    /// one directly.
    async fn fetch(
        &self,
        playlist_url: &str,
        output_dir: &Path,
        base_name: &str,
        duration_hint: Option<f64>,
        on_progress: Option<ProgressCallback>,
    ) -> CoreResult<PathBuf>;
}
