//! Source fetching and decoding

use crate::{
    error::{BgFillError, Result},
    types::{Bitmap, ImageSource},
};
use reqwest::Client;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default request timeout for remote sources
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches source bytes and decodes them into an RGBA bitmap
///
/// Every failure, from an unreachable host to a corrupt file, surfaces as
/// `BgFillError::Decode`. Sources are read once with no retry.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    client: Client,
}

impl ImageLoader {
    /// Create a loader with the default request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a loader with a custom request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BgFillError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client })
    }

    /// Fetch and decode a source
    ///
    /// In-memory sources are decoded in place on the calling task; fetched
    /// bytes are decoded on the blocking pool.
    ///
    /// # Errors
    /// - `Decode` when the fetch fails or the bytes are not an image
    pub async fn load(&self, source: &ImageSource) -> Result<Bitmap> {
        match self.fetch(source).await? {
            Cow::Borrowed(bytes) => decode_bytes(bytes),
            Cow::Owned(bytes) => {
                log::debug!("Fetched {} bytes from {}", bytes.len(), source);
                decode_in_background(bytes).await
            },
        }
    }

    /// Decode bytes handed over by the caller on the blocking pool
    ///
    /// # Errors
    /// - `Decode` if the bytes are empty or not a supported image
    pub async fn load_bytes(&self, bytes: Vec<u8>) -> Result<Bitmap> {
        decode_in_background(bytes).await
    }

    /// Fetch raw bytes for a source without decoding
    ///
    /// `Bytes` sources are borrowed, never copied.
    ///
    /// # Errors
    /// - `Decode` on network errors, non-success status, unreadable files or unsupported schemes
    pub async fn fetch<'a>(&self, source: &'a ImageSource) -> Result<Cow<'a, [u8]>> {
        match source {
            ImageSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
            ImageSource::Path(path) => read_file(path).await.map(Cow::Owned),
            ImageSource::Url(url) => {
                let lower = url.to_ascii_lowercase();
                if lower.starts_with("http://") || lower.starts_with("https://") {
                    self.fetch_http(url).await.map(Cow::Owned)
                } else if let Some(path) = file_url_path(url) {
                    read_file(&path).await.map(Cow::Owned)
                } else {
                    Err(BgFillError::decode(format!(
                        "Unsupported URL scheme in '{}'",
                        url
                    )))
                }
            },
        }
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgFillError::decode(format!("Failed to fetch '{}': {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BgFillError::decode(format!(
                "Failed to fetch '{}': HTTP {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BgFillError::decode(format!("Failed to read body of '{}': {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

/// Decode bytes into a bitmap on the current thread
///
/// # Errors
/// - `Decode` if the bytes are empty or not a supported image
pub fn decode_bytes(bytes: &[u8]) -> Result<Bitmap> {
    if bytes.is_empty() {
        return Err(BgFillError::decode("Source is empty"));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| BgFillError::decode(format!("Failed to decode image: {}", e)))?;
    Bitmap::new(image.to_rgba8())
}

async fn decode_in_background(bytes: Vec<u8>) -> Result<Bitmap> {
    tokio::task::spawn_blocking(move || decode_bytes(&bytes))
        .await
        .map_err(|e| BgFillError::decode(format!("Decode task failed: {}", e)))?
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| BgFillError::decode(format!("Failed to read '{}': {}", path.display(), e)))
}

fn file_url_path(url: &str) -> Option<PathBuf> {
    let scheme = url.get(..7)?;
    if !scheme.eq_ignore_ascii_case("file://") {
        return None;
    }
    let rest = url.get(7..)?;
    // file://localhost/tmp/a.png and file:///tmp/a.png both name /tmp/a.png
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    Some(PathBuf::from(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_path() {
        assert_eq!(
            file_url_path("file:///tmp/a.png"),
            Some(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(
            file_url_path("FILE://localhost/tmp/a.png"),
            Some(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(file_url_path("ftp://host/a.png"), None);
        assert_eq!(file_url_path("file:"), None);
    }

    #[test]
    fn test_decode_bytes_rejects_garbage() {
        assert!(matches!(decode_bytes(&[]), Err(BgFillError::Decode(_))));
        assert!(matches!(
            decode_bytes(b"definitely not an image"),
            Err(BgFillError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_decode_error() {
        let loader = ImageLoader::new().unwrap();
        let result = loader
            .load(&ImageSource::Url("ftp://example.com/a.png".to_string()))
            .await;
        assert!(matches!(result, Err(BgFillError::Decode(_))));
    }

    #[tokio::test]
    async fn test_missing_file_is_decode_error() {
        let loader = ImageLoader::new().unwrap();
        let result = loader
            .load(&ImageSource::Path(PathBuf::from("/nonexistent/bgfill/input.png")))
            .await;
        assert!(matches!(result, Err(BgFillError::Decode(_))));
    }
}
