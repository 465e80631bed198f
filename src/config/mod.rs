//! Configuration surface: `CliConfig` (what `main.rs`'s clap-derived
//! `CliArgs` maps to) layered under an optional `FileConfig` loaded from
//! `--config`, resolved into one `AppConfig`. TOML values override CLI
//! values where present, mirroring the teacher's
//! `CliConfig` → `AppConfig::resolve(cli, file_config)` pipeline.

mod file_config;

pub use file_config::FileConfig;

use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// Which HLS Fetcher backend to construct: one of the two concrete
/// backends, plus an `Auto` mode that probes for the segmented binary at
/// startup and falls back to muxing if it's absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum HlsBackendKind {
    Segmented,
    Muxing,
    Auto,
}

impl Default for HlsBackendKind {
    fn default() -> Self {
        HlsBackendKind::Auto
    }
}

/// CLI arguments that can be overridden by TOML config. Mirrors `CliArgs` in
/// `main.rs` field-for-field.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub anime_root: Option<PathBuf>,
    pub series_root: Option<PathBuf>,
    pub film_root: Option<PathBuf>,

    pub tick_interval_hours: u64,
    pub parallelism: usize,
    pub anime_parallelism_bonus: usize,

    pub hls_backend: HlsBackendKind,
    pub hls_thread_count: u32,
    pub hls_timeout_secs: u64,
    pub hls_retry_count: u32,
    pub hls_max_speed: Option<String>,
    pub hls_backend_path: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub temp_dir: Option<PathBuf>,

    pub metrics_port: u16,
    pub logging_level: String,

    pub chat_auth_id: Option<String>,
    pub http_bind_addr: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            anime_root: None,
            series_root: None,
            film_root: None,
            tick_interval_hours: 24,
            parallelism: 2,
            anime_parallelism_bonus: 1,
            hls_backend: HlsBackendKind::Auto,
            hls_thread_count: 16,
            hls_timeout_secs: 100,
            hls_retry_count: 3,
            hls_max_speed: None,
            hls_backend_path: None,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            temp_dir: None,
            metrics_port: 9091,
            logging_level: "info".to_string(),
            chat_auth_id: None,
            http_bind_addr: None,
        }
    }
}

/// Fully resolved configuration. Required fields (`db_dir`, the three
/// destination roots) are fatal at startup if absent from both CLI and
/// TOML.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub anime_root: PathBuf,
    pub series_root: PathBuf,
    pub film_root: PathBuf,

    pub tick_interval_hours: u64,
    pub parallelism: usize,
    pub anime_parallelism_bonus: usize,

    pub hls_backend: HlsBackendKind,
    pub hls_thread_count: u32,
    pub hls_timeout_secs: u64,
    pub hls_retry_count: u32,
    pub hls_max_speed: Option<String>,
    pub hls_backend_path: Option<PathBuf>,
    pub ffmpeg_path: PathBuf,
    pub temp_dir: PathBuf,

    pub metrics_port: u16,
    pub logging_level: String,

    /// Carried but inert in this crate: the chat UI and HTTP API live
    /// elsewhere.
    pub chat_auth_id: Option<String>,
    pub http_bind_addr: Option<String>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file
    /// config. TOML values override CLI values for each field.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let anime_root = resolve_root(file.anime_root.clone(), cli.anime_root.clone(), "anime-root")?;
        let series_root =
            resolve_root(file.series_root.clone(), cli.series_root.clone(), "series-root")?;
        let film_root = resolve_root(file.film_root.clone(), cli.film_root.clone(), "film-root")?;

        let tick_interval_hours = file.tick_interval_hours.unwrap_or(cli.tick_interval_hours);
        let parallelism = file.parallelism.unwrap_or(cli.parallelism).max(1);
        let anime_parallelism_bonus = file
            .anime_parallelism_bonus
            .unwrap_or(cli.anime_parallelism_bonus);

        let hls_backend = file
            .hls_backend
            .as_deref()
            .and_then(parse_hls_backend)
            .unwrap_or(cli.hls_backend);
        let hls_thread_count = file.hls_thread_count.unwrap_or(cli.hls_thread_count);
        let hls_timeout_secs = file.hls_timeout_secs.unwrap_or(cli.hls_timeout_secs);
        let hls_retry_count = file.hls_retry_count.unwrap_or(cli.hls_retry_count);
        let hls_max_speed = file.hls_max_speed.clone().or_else(|| cli.hls_max_speed.clone());
        let hls_backend_path = file
            .hls_backend_path
            .map(PathBuf::from)
            .or_else(|| cli.hls_backend_path.clone());
        let ffmpeg_path = file
            .ffmpeg_path
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.ffmpeg_path.clone());
        let temp_dir = file
            .temp_dir
            .map(PathBuf::from)
            .or_else(|| cli.temp_dir.clone())
            .unwrap_or_else(std::env::temp_dir);

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let logging_level = file
            .logging_level
            .clone()
            .unwrap_or_else(|| cli.logging_level.clone());

        let chat_auth_id = file.chat_auth_id.clone().or_else(|| cli.chat_auth_id.clone());
        let http_bind_addr = file
            .http_bind_addr
            .clone()
            .or_else(|| cli.http_bind_addr.clone());

        Ok(Self {
            db_dir,
            anime_root,
            series_root,
            film_root,
            tick_interval_hours,
            parallelism,
            anime_parallelism_bonus,
            hls_backend,
            hls_thread_count,
            hls_timeout_secs,
            hls_retry_count,
            hls_max_speed,
            hls_backend_path,
            ffmpeg_path,
            temp_dir,
            metrics_port,
            logging_level,
            chat_auth_id,
            http_bind_addr,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_hours * 3600)
    }
}

fn resolve_root(
    file_value: Option<String>,
    cli_value: Option<PathBuf>,
    flag: &str,
) -> Result<PathBuf> {
    let root = file_value
        .map(PathBuf::from)
        .or(cli_value)
        .ok_or_else(|| anyhow::anyhow!("{flag} must be specified via --{flag} or in config file"))?;
    Ok(root)
}

fn parse_hls_backend(s: &str) -> Option<HlsBackendKind> {
    match s.to_lowercase().as_str() {
        "segmented" => Some(HlsBackendKind::Segmented),
        "muxing" => Some(HlsBackendKind::Muxing),
        "auto" => Some(HlsBackendKind::Auto),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base_cli(db_dir: PathBuf) -> CliConfig {
        CliConfig {
            db_dir: Some(db_dir),
            anime_root: Some(PathBuf::from("/media/anime")),
            series_root: Some(PathBuf::from("/media/series")),
            film_root: Some(PathBuf::from("/media/films")),
            ..Default::default()
        }
    }

    #[test]
    fn resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = base_cli(temp_dir.path().to_path_buf());
        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.anime_root, PathBuf::from("/media/anime"));
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.anime_parallelism_bonus, 1);
        assert_eq!(config.hls_backend, HlsBackendKind::Auto);
        assert_eq!(config.metrics_port, 9091);
    }

    #[test]
    fn toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = base_cli(temp_dir.path().to_path_buf());

        let file_config = FileConfig {
            parallelism: Some(5),
            hls_backend: Some("muxing".to_string()),
            metrics_port: Some(9999),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();
        assert_eq!(config.parallelism, 5);
        assert_eq!(config.hls_backend, HlsBackendKind::Muxing);
        assert_eq!(config.metrics_port, 9999);
        // CLI value used when TOML doesn't specify it.
        assert_eq!(config.anime_root, PathBuf::from("/media/anime"));
    }

    #[test]
    fn missing_db_dir_is_an_error() {
        let cli = CliConfig {
            anime_root: Some(PathBuf::from("/media/anime")),
            series_root: Some(PathBuf::from("/media/series")),
            film_root: Some(PathBuf::from("/media/films")),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("db_dir must be specified"));
    }

    #[test]
    fn missing_destination_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("anime-root"));
    }

    #[test]
    fn nonexistent_db_dir_is_an_error() {
        let cli = base_cli(PathBuf::from("/nonexistent/path/should/not/exist"));
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn tick_interval_converts_hours_to_duration() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = base_cli(temp_dir.path().to_path_buf());
        cli.tick_interval_hours = 2;
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.tick_interval(), std::time::Duration::from_secs(7200));
    }
}
