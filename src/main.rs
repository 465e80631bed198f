use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Import modules from the library crate
use mediahoard_server::background_jobs::{create_scheduler, HookEvent, JobContext};
use mediahoard_server::catalog_store::{CatalogStore, SqliteCatalogStore};
use mediahoard_server::config;
use mediahoard_server::config::HlsBackendKind;
use mediahoard_server::hls_fetcher::{HlsFetcher, MuxingFetcher, SegmentedConfig, SegmentedFetcher};
use mediahoard_server::metrics;
use mediahoard_server::provider::{ProviderAdapter, SimpleAdapter, StructuredAdapter};
use mediahoard_server::reconciliation::{DestinationRoots, ReconciliationService};
use mediahoard_server::scheduler::Scheduler;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing the catalog database and its migration ledger.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Destination root for anime titles.
    #[clap(long, value_parser = parse_path)]
    pub anime_root: Option<PathBuf>,

    /// Destination root for TV series titles.
    #[clap(long, value_parser = parse_path)]
    pub series_root: Option<PathBuf>,

    /// Destination root for film titles.
    #[clap(long, value_parser = parse_path)]
    pub film_root: Option<PathBuf>,

    /// Reconciliation tick interval, in hours.
    #[clap(long, default_value_t = 24)]
    pub tick_interval_hours: u64,

    /// Global download scheduler parallelism bound.
    #[clap(long, default_value_t = 2)]
    pub parallelism: usize,

    /// Extra parallelism layered inside the anime reconciliation path, added
    /// on top of 1 permit for a default total of 3 concurrent anime fetches.
    #[clap(long, default_value_t = 2)]
    pub anime_parallelism_bonus: usize,

    /// Which HLS Fetcher backend to use.
    #[clap(long, value_enum, default_value_t = HlsBackendKind::Auto)]
    pub hls_backend: HlsBackendKind,

    /// Segmented backend worker thread count.
    #[clap(long, default_value_t = 16)]
    pub hls_thread_count: u32,

    /// Per-segment fetch timeout, in seconds.
    #[clap(long, default_value_t = 100)]
    pub hls_timeout_secs: u64,

    /// Segmented backend retry count.
    #[clap(long, default_value_t = 3)]
    pub hls_retry_count: u32,

    /// Optional download speed cap (backend-specific unit, e.g. "2M").
    #[clap(long)]
    pub hls_max_speed: Option<String>,

    /// Override the segmented backend's binary location.
    #[clap(long)]
    pub hls_backend_path: Option<PathBuf>,

    /// Path to the ffmpeg binary used by the muxing fallback backend.
    #[clap(long, default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// Scratch directory for in-progress downloads.
    #[clap(long)]
    pub temp_dir: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Tracing filter directive, e.g. "info" or "mediahoard_server=debug".
    #[clap(long, default_value = "info")]
    pub logging_level: String,

    /// Chat front-end authorization identifier. Accepted and carried
    /// through; this binary doesn't have a chat UI to use it.
    #[clap(long)]
    pub chat_auth_id: Option<String>,

    /// HTTP API bind address. Accepted and carried through; this binary
    /// only exposes the metrics router, on metrics_port.
    #[clap(long)]
    pub http_bind_addr: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            anime_root: args.anime_root.clone(),
            series_root: args.series_root.clone(),
            film_root: args.film_root.clone(),
            tick_interval_hours: args.tick_interval_hours,
            parallelism: args.parallelism,
            anime_parallelism_bonus: args.anime_parallelism_bonus,
            hls_backend: args.hls_backend,
            hls_thread_count: args.hls_thread_count,
            hls_timeout_secs: args.hls_timeout_secs,
            hls_retry_count: args.hls_retry_count,
            hls_max_speed: args.hls_max_speed.clone(),
            hls_backend_path: args.hls_backend_path.clone(),
            ffmpeg_path: args.ffmpeg_path.clone(),
            temp_dir: args.temp_dir.clone(),
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            chat_auth_id: args.chat_auth_id.clone(),
            http_bind_addr: args.http_bind_addr.clone(),
        }
    }
}

const SEGMENTED_BINARY_NAME: &str = "N_m3u8DL-RE";

/// Whether `name` resolves to an executable somewhere on `PATH`. Backs
/// `--hls-backend auto`'s startup probe for the segmented downloader.
fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

/// Construct the HLS Fetcher for the resolved backend selection. `Auto`
/// probes for the segmented binary once, at startup, and falls back to
/// muxing if it's absent; the mode is then fixed for the process lifetime.
fn build_hls_fetcher(app_config: &config::AppConfig) -> Arc<dyn HlsFetcher> {
    let use_segmented = match app_config.hls_backend {
        HlsBackendKind::Segmented => true,
        HlsBackendKind::Muxing => false,
        HlsBackendKind::Auto => {
            let available = app_config
                .hls_backend_path
                .as_ref()
                .map(|p| p.is_file())
                .unwrap_or_else(|| binary_on_path(SEGMENTED_BINARY_NAME));
            if !available {
                info!("segmented HLS backend not found on PATH, falling back to muxing");
            }
            available
        }
    };

    if use_segmented {
        let binary_path = app_config
            .hls_backend_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(SEGMENTED_BINARY_NAME));
        let mut segmented_config = SegmentedConfig::new(binary_path, app_config.temp_dir.clone());
        segmented_config.thread_count = app_config.hls_thread_count;
        segmented_config.retry_count = app_config.hls_retry_count;
        segmented_config.timeout_secs = app_config.hls_timeout_secs;
        segmented_config.max_speed = app_config.hls_max_speed.clone();
        info!("HLS fetcher backend: segmented ({:?})", segmented_config.binary_path);
        Arc::new(SegmentedFetcher::new(segmented_config))
    } else {
        info!("HLS fetcher backend: muxing ({:?})", app_config.ffmpeg_path);
        Arc::new(MuxingFetcher::new(app_config.ffmpeg_path.clone()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  anime_root: {:?}", app_config.anime_root);
    info!("  series_root: {:?}", app_config.series_root);
    info!("  film_root: {:?}", app_config.film_root);
    info!("  parallelism: {}", app_config.parallelism);
    info!("  tick_interval: {:?}", app_config.tick_interval());

    std::fs::create_dir_all(&app_config.anime_root)?;
    std::fs::create_dir_all(&app_config.series_root)?;
    std::fs::create_dir_all(&app_config.film_root)?;
    std::fs::create_dir_all(&app_config.temp_dir)?;

    // Create catalog store (will create DB and run migrations if not present)
    if !app_config.catalog_db_path().exists() {
        info!("Creating new catalog database at {:?}", app_config.catalog_db_path());
    }
    let catalog_store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalogStore::new(app_config.catalog_db_path())?);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let shutdown_token = CancellationToken::new();

    let scheduler = Scheduler::new(app_config.parallelism, shutdown_token.child_token());

    let hls_fetcher = build_hls_fetcher(&app_config);

    let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
        Arc::new(SimpleAdapter::new(None, Vec::new())),
        Arc::new(StructuredAdapter::new(None, Vec::new())),
    ];

    let roots = DestinationRoots {
        anime_root: app_config.anime_root.clone(),
        series_root: app_config.series_root.clone(),
        film_root: app_config.film_root.clone(),
    };

    let (hook_sender, hook_receiver) = tokio::sync::mpsc::channel::<HookEvent>(100);

    let reconciliation_service = Arc::new(ReconciliationService::new(
        adapters,
        hls_fetcher,
        roots,
        app_config.tick_interval(),
        app_config.anime_parallelism_bonus + 1,
        hook_sender,
    ));

    let job_context = JobContext::new(
        shutdown_token.child_token(),
        catalog_store.clone() as Arc<dyn CatalogStore>,
        scheduler.clone(),
    );

    let (mut job_scheduler, job_scheduler_handle) =
        create_scheduler(hook_receiver, shutdown_token.clone(), job_context);

    // Register jobs
    job_scheduler.register_job(reconciliation_service).await;
    info!(
        "Background job scheduler initialized with {} job(s)",
        job_scheduler.job_count().await
    );

    // The handle is currently unused but will be used by a future front-end
    // to trigger on-demand reconciliation ticks.
    let _ = job_scheduler_handle;

    info!("Metrics available at port {}!", app_config.metrics_port);
    let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], app_config.metrics_port));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;

    // Run metrics server and job scheduler concurrently
    tokio::select! {
        result = axum::serve(metrics_listener, metrics::metrics_router()) => {
            info!("Metrics server stopped: {:?}", result);
            shutdown_token.cancel();
            result.map_err(anyhow::Error::from)
        },
        _ = job_scheduler.run() => {
            info!("Job scheduler stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            // Give the scheduler a moment to shut down gracefully
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(())
        }
    }
}
