//! NSIDC DAAC tile source for VIIRS VNP10A1F granules.
//!
//! Granules are published in one directory per day. The exact file name
//! carries a production timestamp, so it is looked up in the directory
//! listing before downloading. Each granule is downloaded into a scratch
//! directory owned by the source, read, and deleted again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use futures::StreamExt;
use reconciler::{SourceError, TileDataSource};
use reqwest::{Client, RequestBuilder, StatusCode};
use snow_common::{PixelPos, TileId, WeekObservation};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};

use crate::granule::GranuleReader;

pub const DEFAULT_BASE_URL: &str = "https://n5eil01u.ecs.nsidc.org/VIIRS/VNP10A1F.002";

#[derive(Debug, Clone)]
pub struct NsidcConfig {
    /// Product root; day directories live directly below it.
    pub base_url: String,
    /// Pause after every download.
    pub request_delay: Duration,
    /// Earthdata bearer token.
    pub token: Option<String>,
    pub listing_timeout: Duration,
    pub download_timeout: Duration,
}

impl Default for NsidcConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_delay: Duration::from_millis(500),
            token: None,
            listing_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
        }
    }
}

/// File name prefix of a tile's granule, e.g. `VNP10A1F.A2024001.h18v04`.
pub fn granule_prefix(tile: TileId, date: NaiveDate) -> String {
    format!(
        "VNP10A1F.A{}{:03}.h{:02}v{:02}",
        date.year(),
        date.ordinal(),
        tile.h(),
        tile.v()
    )
}

/// Day directory holding the granules for `date`.
pub fn directory_url(base_url: &str, date: NaiveDate) -> String {
    format!(
        "{}/{}/",
        base_url.trim_end_matches('/'),
        date.format("%Y.%m.%d")
    )
}

/// First `.h5` link in a directory listing whose name starts with `prefix`.
pub fn find_granule(listing: &str, prefix: &str) -> Option<String> {
    listing
        .split("href=\"")
        .skip(1)
        .filter_map(|rest| rest.split('"').next())
        .find(|name| name.starts_with(prefix) && name.ends_with(".h5"))
        .map(str::to_string)
}

/// Downloads granules from NSIDC and extracts the requested pixels.
pub struct NsidcSource {
    client: Client,
    config: NsidcConfig,
    reader: Arc<dyn GranuleReader>,
    scratch: TempDir,
}

impl NsidcSource {
    /// Create the source and its scratch directory. The directory is removed
    /// when the source is dropped.
    pub fn new(config: NsidcConfig, reader: Arc<dyn GranuleReader>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;

        let scratch = tempfile::Builder::new()
            .prefix("viirs_")
            .tempdir()
            .context("Failed to create scratch directory")?;

        info!(
            base_url = %config.base_url,
            reader = reader.name(),
            scratch = %scratch.path().display(),
            "NSIDC source ready"
        );

        Ok(Self {
            client,
            config,
            reader,
            scratch,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    fn get(&self, url: &str, timeout: Duration) -> RequestBuilder {
        let request = self.client.get(url).timeout(timeout);
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Name and URL of the granule for a tile and date.
    async fn locate(&self, tile: TileId, date: NaiveDate) -> Result<(String, String), SourceError> {
        let dir_url = directory_url(&self.config.base_url, date);
        let prefix = granule_prefix(tile, date);

        let response = self
            .get(&dir_url, self.config.listing_timeout)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("listing {}: {}", dir_url, e)))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(SourceError::Unavailable(format!("no directory {}", dir_url)))
            }
            status => {
                warn!(url = %dir_url, status = %status, "Unexpected listing status");
                return Err(SourceError::Unavailable(format!(
                    "listing {} returned {}",
                    dir_url, status
                )));
            }
        }

        let listing = response
            .text()
            .await
            .map_err(|e| SourceError::Unavailable(format!("listing {}: {}", dir_url, e)))?;

        let filename = find_granule(&listing, &prefix)
            .ok_or_else(|| SourceError::Unavailable(format!("{} not published", prefix)))?;
        let url = format!("{}{}", dir_url, filename);
        Ok((filename, url))
    }

    /// Stream a granule into the scratch directory.
    async fn download(&self, url: &str, filename: &str) -> Result<PathBuf, SourceError> {
        let path = self.scratch.path().join(filename);
        info!(file = %filename, "Downloading granule");

        match self.stream_to_file(url, &path).await {
            Ok(bytes) => {
                debug!(file = %filename, bytes, "Download complete");
                Ok(path)
            }
            Err(e) => {
                tokio::fs::remove_file(&path).await.ok();
                Err(e)
            }
        }
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<u64, SourceError> {
        let unavailable = |e: String| SourceError::Unavailable(format!("{}: {}", url, e));

        let response = self
            .get(url, self.config.download_timeout)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            error!(url = %url, "Authentication failed, check the Earthdata token");
        }
        if !status.is_success() {
            return Err(unavailable(status.to_string()));
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| unavailable(e.to_string()))?;
            file.write_all(&chunk).await.map_err(|e| unavailable(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| unavailable(e.to_string()))?;

        Ok(written)
    }
}

#[async_trait]
impl TileDataSource for NsidcSource {
    #[instrument(skip_all, fields(tile = %tile, date = %date, pixels = pixels.len()))]
    async fn fetch(
        &self,
        tile: TileId,
        date: NaiveDate,
        pixels: &[PixelPos],
    ) -> Result<HashMap<PixelPos, WeekObservation>, SourceError> {
        let (filename, url) = self.locate(tile, date).await?;
        let path = self.download(&url, &filename).await?;

        if !self.config.request_delay.is_zero() {
            tokio::time::sleep(self.config.request_delay).await;
        }

        let reader = Arc::clone(&self.reader);
        let read_path = path.clone();
        let grid = tokio::task::spawn_blocking(move || reader.read(&read_path)).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Could not delete granule");
        }

        match grid {
            Ok(Ok(grid)) => Ok(grid.observations(pixels)),
            Ok(Err(e)) => Err(SourceError::Failed(format!("{}: {}", filename, e))),
            Err(e) => Err(SourceError::Failed(format!(
                "{}: reader task failed: {}",
                filename, e
            ))),
        }
    }

    fn name(&self) -> &str {
        "nsidc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::granule::{GranuleError, GranuleGrid};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    struct NeverRead;

    impl GranuleReader for NeverRead {
        fn read(&self, _path: &Path) -> Result<GranuleGrid, GranuleError> {
            Err(GranuleError::Open("not expected".to_string()))
        }

        fn name(&self) -> &'static str {
            "never"
        }
    }

    #[test]
    fn test_granule_prefix() {
        let tile: TileId = "h18v04".parse().unwrap();
        assert_eq!(granule_prefix(tile, date("2024-01-01")), "VNP10A1F.A2024001.h18v04");
        assert_eq!(granule_prefix(tile, date("2024-12-30")), "VNP10A1F.A2024365.h18v04");

        let tile: TileId = "h08v11".parse().unwrap();
        assert_eq!(granule_prefix(tile, date("2019-03-05")), "VNP10A1F.A2019064.h08v11");
    }

    #[test]
    fn test_directory_url() {
        assert_eq!(
            directory_url(DEFAULT_BASE_URL, date("2024-01-08")),
            "https://n5eil01u.ecs.nsidc.org/VIIRS/VNP10A1F.002/2024.01.08/"
        );
        assert_eq!(
            directory_url("http://mirror/", date("2024-01-08")),
            "http://mirror/2024.01.08/"
        );
    }

    #[test]
    fn test_find_granule_in_listing() {
        let listing = r#"
<a href="../">Parent</a>
<a href="VNP10A1F.A2024008.h18v03.002.2024010101010.h5">h18v03</a>
<a href="VNP10A1F.A2024008.h18v04.002.2024010123456.h5.xml">xml</a>
<a href="VNP10A1F.A2024008.h18v04.002.2024010123456.h5">h18v04</a>
"#;
        assert_eq!(
            find_granule(listing, "VNP10A1F.A2024008.h18v04").as_deref(),
            Some("VNP10A1F.A2024008.h18v04.002.2024010123456.h5")
        );
        assert_eq!(find_granule(listing, "VNP10A1F.A2024008.h19v04"), None);
        assert_eq!(find_granule("", "VNP10A1F"), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = NsidcConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_delay: Duration::ZERO,
            listing_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let source = NsidcSource::new(config, Arc::new(NeverRead)).unwrap();
        let tile: TileId = "h18v04".parse().unwrap();

        let result = source
            .fetch(tile, date("2024-01-01"), &[PixelPos::new(1, 1)])
            .await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let source = NsidcSource::new(NsidcConfig::default(), Arc::new(NeverRead)).unwrap();
        let scratch = source.scratch_dir().to_path_buf();
        assert!(scratch.is_dir());

        drop(source);
        assert!(!scratch.exists());
    }
}
