//! Snow-cover archive fetcher.
//!
//! Keeps a weekly per-pixel snow-cover history for ski-run geometries:
//! - Rasterizes a GeoJSON feature collection onto the VIIRS sinusoidal grid
//! - Finds the weeks each pixel is still missing in the archive
//! - Downloads the needed VNP10A1F granules from NSIDC in parallel
//! - Merges the values back with one write per pixel

mod config;
mod granule;
mod nsidc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use rasterizer::{load_feature_collection, PixelExtractor};
use reconciler::{Reconciler, ReconcilerConfig, RunSummary};
use snow_common::{codes, DateWindow};
use storage::{BackendKind, PixelArchive};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{Overrides, Settings};
use nsidc::NsidcSource;

#[derive(Parser, Debug)]
#[command(name = "snow-fetcher")]
#[command(about = "Fetch VIIRS snow cover data for ski run pixels")]
struct Args {
    /// Path to the runs GeoJSON file (optional with --fill-cache)
    geojson_path: Option<PathBuf>,

    /// Fill missing weeks of pixels already in the archive (no GeoJSON needed)
    #[arg(long)]
    fill_cache: bool,

    /// Storage backend: file, sqlite, postgres, redis or memory [default: file]
    #[arg(long, env = "SNOW_BACKEND")]
    backend: Option<BackendKind>,

    /// Directory for the file and sqlite backends [default: data/snowcover]
    #[arg(long, env = "SNOW_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis connection URL
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// NSIDC product root URL
    #[arg(long, env = "SNOW_SOURCE_URL")]
    source_url: Option<String>,

    /// Earthdata bearer token
    #[arg(long, env = "EARTHDATA_TOKEN", hide_env_values = true)]
    earthdata_token: Option<String>,

    /// YAML settings file (storage and source sections)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of tiles to process (for testing)
    #[arg(long)]
    max_tiles: Option<usize>,

    /// Reset old retryable error codes before processing
    #[arg(long)]
    cleanup_errors: bool,

    /// Reset error codes dated more than this many days ago
    #[arg(long, default_value = "7")]
    cleanup_days: i64,

    /// Also reset 401 codes during cleanup
    #[arg(long)]
    cleanup_other: bool,

    /// Only print archive statistics
    #[arg(long)]
    stats_only: bool,

    /// Maximum parallel downloads per tile
    #[arg(long, default_value = "6")]
    max_workers: usize,

    /// First year to process (default: 2012)
    #[arg(long)]
    from_year: Option<i32>,

    /// Last year to process (default: current year)
    #[arg(long)]
    to_year: Option<i32>,

    /// Pause after each download in milliseconds [default: 500]
    #[arg(long)]
    request_delay_ms: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            backend: self.backend,
            cache_dir: self.cache_dir.clone(),
            database_url: self.database_url.clone(),
            redis_url: self.redis_url.clone(),
            source_url: self.source_url.clone(),
            request_delay_ms: self.request_delay_ms,
            token: self.earthdata_token.clone(),
        }
    }

    fn log_level(&self) -> Level {
        if self.verbose {
            return Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    /// Cells dated before this day are reset by `--cleanup-errors`.
    fn cleanup_cutoff(&self, today: NaiveDate) -> Result<NaiveDate> {
        if self.cleanup_days < 0 {
            bail!("--cleanup-days must not be negative");
        }
        Duration::try_days(self.cleanup_days)
            .and_then(|days| today.checked_sub_signed(days))
            .ok_or_else(|| anyhow!("--cleanup-days {} is out of range", self.cleanup_days))
    }

    /// Check arguments before touching storage or the network.
    fn validate(&self, today: NaiveDate) -> Result<DateWindow> {
        if self.fill_cache {
            if self.geojson_path.is_some() {
                warn!("geojson_path is ignored with --fill-cache");
            }
        } else {
            let path = self
                .geojson_path
                .as_ref()
                .ok_or_else(|| anyhow!("geojson_path is required unless using --fill-cache"))?;
            if !path.exists() {
                bail!("Input file not found: {}", path.display());
            }
        }

        self.cleanup_cutoff(today)?;

        let window = DateWindow::from_years(self.from_year, self.to_year, today)?;
        ReconcilerConfig {
            max_workers: self.max_workers,
            max_tiles: self.max_tiles,
        }
        .validate()?;

        Ok(window)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => {
            info!("Processing completed successfully");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!("Processing finished with errors");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "Processing failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let today = Utc::now().date_naive();
    let window = args.validate(today)?;

    let settings = Settings::load_optional(args.config.as_deref())?;
    let overrides = args.overrides();
    let backend_config = settings.backend_config(&overrides);

    info!(
        backend = %backend_config.kind,
        cache_dir = %backend_config.cache_dir.display(),
        start = %window.start,
        end = %window.end,
        "Starting snow-cover fetcher"
    );

    let backend = backend_config
        .connect()
        .await
        .with_context(|| format!("Failed to open {} backend", backend_config.kind))?;
    let archive = PixelArchive::new(backend);

    if args.stats_only {
        let stats = archive.stats().await.context("Failed to read archive statistics")?;
        println!("Cache Statistics:");
        println!("{}", stats);
        return Ok(true);
    }

    if args.cleanup_errors {
        let cutoff = args.cleanup_cutoff(today)?;
        let mut cleanup_codes = vec![codes::RECENT_MISSING];
        if args.cleanup_other {
            cleanup_codes.push(codes::OTHER);
        }
        info!(%cutoff, codes = ?cleanup_codes, "Cleaning up old error codes");
        archive
            .cleanup_stale_retryable(cutoff, &cleanup_codes)
            .await
            .context("Error code cleanup failed")?;
    }

    let reader = granule::default_reader().ok_or_else(|| {
        anyhow!("this build cannot read granules; rebuild with --features hdf5")
    })?;
    let source = Arc::new(NsidcSource::new(settings.source_config(&overrides), reader)?);

    let engine = Reconciler::new(
        archive,
        source,
        ReconcilerConfig {
            max_workers: args.max_workers,
            max_tiles: args.max_tiles,
        },
    );

    let summary = if args.fill_cache {
        info!("Starting fill-cache run");
        engine.run_fill_cache(&window).await?
    } else {
        let path = args
            .geojson_path
            .as_ref()
            .ok_or_else(|| anyhow!("geojson_path is required unless using --fill-cache"))?;
        info!(path = %path.display(), "Starting fetch run");

        let collection = load_feature_collection(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let report = PixelExtractor::default().extract(&collection);
        info!(
            features = report.features.len(),
            skipped = report.skipped,
            pixels = report.pixels.len(),
            tiles = report.tile_count(),
            "Extracted pixels"
        );

        engine.run(&report.by_tile(), &window).await?
    };

    log_summary(&summary);
    Ok(summary.is_success())
}

fn log_summary(summary: &RunSummary) {
    info!(
        tiles = summary.tiles_processed,
        processed_weeks = summary.stats.processed_weeks,
        pixels_updated = summary.stats.pixels_updated,
        cells_written = summary.stats.cells_written,
        errors = summary.stats.errors,
        failed_saves = summary.stats.failed_saves,
        failed_loads = summary.stats.failed_loads,
        "Total statistics"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::DEFAULT_CACHE_DIR;
    use test_utils::{fixtures, temp_test_dir, write_fixture};

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["snow-fetcher"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    fn today() -> NaiveDate {
        fixtures::dates::date(fixtures::dates::TODAY)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--fill-cache"]);
        assert_eq!(args.max_workers, 6);
        assert_eq!(args.cleanup_days, 7);
        assert_eq!(args.log_level(), Level::INFO);
        assert!(args.backend.is_none());
        assert_eq!(
            Settings::default().backend_config(&args.overrides()).cache_dir,
            PathBuf::from(DEFAULT_CACHE_DIR)
        );
    }

    #[test]
    fn test_backend_flag() {
        let args = parse(&["--fill-cache", "--backend", "sqlite", "-v"]);
        assert_eq!(args.backend, Some(BackendKind::Sqlite));
        assert_eq!(args.log_level(), Level::DEBUG);
        assert!(Args::try_parse_from(["snow-fetcher", "--backend", "ftp"]).is_err());
    }

    #[test]
    fn test_geojson_required_without_fill_cache() {
        let args = parse(&[]);
        assert!(args.validate(today()).is_err());

        let args = parse(&["/nonexistent/runs.geojson"]);
        let err = args.validate(today()).unwrap_err();
        assert!(err.to_string().contains("Input file not found"));
    }

    #[test]
    fn test_validate_window() {
        let dir = temp_test_dir();
        let path = write_fixture(dir.path(), "runs.geojson", fixtures::geojson::VERBIER_RUNS);
        let path = path.to_str().unwrap();

        let window = parse(&[path, "--from-year", "2023"]).validate(today()).unwrap();
        assert_eq!(window.start, fixtures::dates::date("2023-01-01"));
        assert_eq!(window.end, today());

        assert!(parse(&[path, "--from-year", "2011"]).validate(today()).is_err());
        assert!(parse(&[path, "--to-year", "2025"]).validate(today()).is_err());
        assert!(parse(&[path, "--from-year", "2020", "--to-year", "2019"])
            .validate(today())
            .is_err());
        assert!(parse(&[path, "--max-workers", "0"]).validate(today()).is_err());
    }

    #[test]
    fn test_cleanup_cutoff_bounds() {
        let args = parse(&["--fill-cache", "--cleanup-days", "30"]);
        assert_eq!(
            args.cleanup_cutoff(today()).unwrap(),
            fixtures::dates::date("2024-05-16")
        );

        let args = parse(&["--fill-cache", "--cleanup-days", "0"]);
        assert_eq!(args.cleanup_cutoff(today()).unwrap(), today());

        for days in ["-1", "9223372036854775807", "3000000000"] {
            let flag = format!("--cleanup-days={days}");
            let args = parse(&["--fill-cache", &flag]);
            assert!(args.cleanup_cutoff(today()).is_err(), "{days}");
            assert!(args.validate(today()).is_err(), "{days}");
        }
    }
}
