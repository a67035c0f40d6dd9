//! Logo artwork served by the proxy at `/logo.jpg`.
//!
//! The logo is an immutable [`Bytes`] snapshot: relay workers clone the
//! current snapshot, setters swap in a new one. A reader never observes a
//! partially written image.
//!
//! Sources, all normalised to a 300x300 JPEG except [`ArtworkStore::set_logo`]:
//!
//! 1. Any decodable image (`set_logo_image`)
//! 2. A file on disk (`load_logo_file`)
//! 3. A remote URL (`set_logo_from_url`)
//!
//! A failed update leaves the previous logo in place.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use parking_lot::RwLock;
use reqwest::Client;
use thiserror::Error;

use crate::protocol_constants::{LOGO_JPEG_QUALITY, LOGO_SIZE_PX};

/// Timeout for downloading a logo from a URL.
pub const LOGO_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ArtworkError {
    #[error("logo data is empty")]
    Empty,

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("logo download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("logo download returned HTTP {0}")]
    DownloadStatus(u16),
}

/// Decodes `data`, scales it to the fixed logo size and re-encodes it as JPEG.
pub fn prepare_logo(data: &[u8]) -> Result<Bytes, ArtworkError> {
    if data.is_empty() {
        return Err(ArtworkError::Empty);
    }

    let img = image::load_from_memory(data)?;
    let resized = if img.width() != LOGO_SIZE_PX || img.height() != LOGO_SIZE_PX {
        img.resize_exact(LOGO_SIZE_PX, LOGO_SIZE_PX, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut output = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut output, LOGO_JPEG_QUALITY);
    rgb.write_with_encoder(encoder)?;

    Ok(Bytes::from(output.into_inner()))
}

/// Holds the current logo snapshot.
#[derive(Debug, Default)]
pub struct ArtworkStore {
    logo: RwLock<Option<Bytes>>,
}

impl ArtworkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot, if any.
    #[must_use]
    pub fn logo(&self) -> Option<Bytes> {
        self.logo.read().clone()
    }

    #[must_use]
    pub fn has_logo(&self) -> bool {
        self.logo.read().is_some()
    }

    /// Installs already-encoded JPEG bytes verbatim.
    pub fn set_logo(&self, jpeg: impl Into<Bytes>) -> Result<(), ArtworkError> {
        let jpeg = jpeg.into();
        if jpeg.is_empty() {
            return Err(ArtworkError::Empty);
        }
        log::info!("[Artwork] Logo set ({} bytes)", jpeg.len());
        *self.logo.write() = Some(jpeg);
        Ok(())
    }

    /// Scales and re-encodes any supported image, then installs it.
    pub fn set_logo_image(&self, data: &[u8]) -> Result<(), ArtworkError> {
        let jpeg = prepare_logo(data)?;
        log::info!(
            "[Artwork] Logo prepared: {} bytes in, {} bytes out",
            data.len(),
            jpeg.len()
        );
        *self.logo.write() = Some(jpeg);
        Ok(())
    }

    pub fn load_logo_file(&self, path: &Path) -> Result<(), ArtworkError> {
        let data = std::fs::read(path).map_err(|source| ArtworkError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::info!("[Artwork] Loading logo from {}", path.display());
        self.set_logo_image(&data)
    }

    /// Downloads an image and installs it.
    pub async fn set_logo_from_url(&self, client: &Client, url: &str) -> Result<(), ArtworkError> {
        log::info!("[Artwork] Downloading logo from {}", url);

        let response = client
            .get(url)
            .timeout(LOGO_DOWNLOAD_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("[Artwork] Logo download failed: HTTP {}", status);
            return Err(ArtworkError::DownloadStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        self.set_logo_image(&body)
    }

    pub fn clear(&self) {
        *self.logo.write() = None;
    }
}
