use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client;

use crate::config::MigrationConfig;
use crate::error::DataError;
use crate::runtime::ResolvedPaths;
use crate::store::{ImageAsset, Store};

/// Fetches remote images into the media directory and registers them in the
/// store. Assets are deduplicated by filename: a second reference to an
/// already-stored filename returns the stored row without touching the
/// network.
pub struct ImageResolver {
    client: Client,
    media_dir: PathBuf,
}

impl ImageResolver {
    pub fn new(config: &MigrationConfig, paths: &ResolvedPaths) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent())
            .timeout(Duration::from_millis(config.http_timeout_ms()))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            media_dir: paths.media_dir.clone(),
        })
    }

    /// Resolve `url` to a stored asset, downloading on first sight.
    ///
    /// Returns `Ok(None)` when no filename can be derived from the URL or
    /// when the fetch fails; both are reported and the caller keeps the
    /// original reference. A payload that is not a decodable image is an
    /// error, since silently storing it would corrupt every later reference
    /// to the same filename.
    pub fn resolve(&self, store: &Store, url: &str) -> Result<Option<ImageAsset>> {
        let Some(filename) = filename_from_url(url) else {
            println!("no filename in image URL: skipping {url}");
            return Ok(None);
        };

        if let Some(existing) = store.image_by_title(&filename)? {
            return Ok(Some(existing));
        }

        println!("downloading {url}");
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(err) => {
                println!("fetch failed for {url}: {err}");
                return Ok(None);
            }
        };
        if !response.status().is_success() {
            println!("fetch failed for {url}: HTTP {}", response.status());
            return Ok(None);
        }
        let payload = response
            .bytes()
            .with_context(|| format!("failed to read response body from {url}"))?;

        let format = image::guess_format(&payload)
            .ok()
            .map(|f| format!("{f:?}").to_ascii_lowercase());
        image::load_from_memory(&payload).map_err(|err| DataError::ImageDecode {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

        let target = self.media_dir.join(&filename);
        fs::write(&target, &payload)
            .with_context(|| format!("failed to write {}", target.display()))?;

        let byte_len =
            i64::try_from(payload.len()).context("payload length does not fit into i64")?;
        let asset = store.create_image(
            &filename,
            &format!("media/{filename}"),
            byte_len,
            format.as_deref(),
        )?;
        Ok(Some(asset))
    }
}

/// Decoded filename taken from the last non-empty path segment of `url`.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed
        .path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let decoded = decoded.trim();
    // decoding can reintroduce separators (%2F); a name that could leave
    // the media directory is unusable
    if decoded.is_empty()
        || decoded == "."
        || decoded == ".."
        || decoded.contains('/')
        || decoded.contains('\\')
    {
        None
    } else {
        Some(decoded.to_string())
    }
}
