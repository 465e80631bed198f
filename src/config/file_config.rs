//! TOML configuration file shape. Every field here can override its CLI
//! counterpart, mirroring the teacher's `FileConfig` layering.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_dir: Option<String>,
    pub anime_root: Option<String>,
    pub series_root: Option<String>,
    pub film_root: Option<String>,

    pub tick_interval_hours: Option<u64>,
    pub parallelism: Option<usize>,
    pub anime_parallelism_bonus: Option<usize>,

    pub hls_backend: Option<String>,
    pub hls_thread_count: Option<u32>,
    pub hls_timeout_secs: Option<u64>,
    pub hls_retry_count: Option<u32>,
    pub hls_max_speed: Option<String>,
    pub hls_backend_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub temp_dir: Option<String>,

    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    /// Chat front-end authorization identifier. Not used by this binary,
    /// but accepted and carried through so a front-end crate built against
    /// this one shares one config pass.
    pub chat_auth_id: Option<String>,
    /// HTTP API bind address. Out of scope here for the same reason; only
    /// the metrics-only router in this crate listens on a port, and it uses
    /// `metrics_port`, not this field.
    pub http_bind_addr: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
