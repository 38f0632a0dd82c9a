//! Image archiving and thumbnail generation.
//!
//! Raw images are stored under the archive directory at a path derived from the
//! post id; each gets a thumbnail next to it with [`THUMBNAIL_SUFFIX`] inserted
//! before the extension.

use std::ffi::OsStr;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{THUMBNAIL_JPEG_QUALITY, THUMBNAIL_SUFFIX};

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[source] ImageError),
    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] ImageError),
    #[error("post id {0:?} cannot be used as a file name")]
    UnsafePostId(String),
    #[error("thumbnail task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AssetError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Counts reported by [`regenerate_thumbnails`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerateReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Where the raw image for a post is stored.
///
/// The file is named after the post id and keeps the URL's extension when it
/// looks like one (1 to 5 ASCII alphanumerics).
///
/// # Errors
///
/// Returns [`AssetError::UnsafePostId`] unless the id is made of ASCII
/// alphanumerics, `-` and `_`, so the file always lands inside `archive_dir`.
pub fn archive_path(archive_dir: &Path, post_id: &str, image_url: &str) -> Result<PathBuf, AssetError> {
    let safe = !post_id.is_empty()
        && post_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !safe {
        return Err(AssetError::UnsafePostId(post_id.to_string()));
    }

    Ok(match url_extension(image_url) {
        Some(ext) => archive_dir.join(format!("{post_id}.{ext}")),
        None => archive_dir.join(post_id),
    })
}

fn url_extension(image_url: &str) -> Option<String> {
    let url = url::Url::parse(image_url).ok()?;
    let file_name = url.path_segments()?.next_back()?;
    let (_, ext) = file_name.rsplit_once('.')?;
    let valid = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Thumbnail path for a raw asset: `123.png` becomes `123_thumb.png`.
#[must_use]
pub fn thumbnail_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(OsStr::to_str).unwrap_or_default();
    let file_name = match path.extension().and_then(OsStr::to_str) {
        Some(ext) => format!("{stem}{THUMBNAIL_SUFFIX}.{ext}"),
        None => format!("{stem}{THUMBNAIL_SUFFIX}"),
    };
    path.with_file_name(file_name)
}

fn is_thumbnail(path: &Path) -> bool {
    path.file_stem()
        .and_then(OsStr::to_str)
        .is_some_and(|stem| stem.ends_with(THUMBNAIL_SUFFIX))
}

/// Download a post's image into the archive directory and thumbnail it.
///
/// When the thumbnail cannot be produced the raw file is removed again, so a
/// stored `local_image_path` always has a thumbnail beside it.
///
/// # Errors
///
/// Returns an error if the download, decode, encode or a file write fails.
pub async fn download_image(
    client: &reqwest::Client,
    image_url: &str,
    post_id: &str,
    archive_dir: &Path,
    max_px: u32,
) -> Result<PathBuf, AssetError> {
    let path = archive_path(archive_dir, post_id, image_url)?;

    tokio::fs::create_dir_all(archive_dir)
        .await
        .map_err(|e| AssetError::io(archive_dir, e))?;

    let response = client
        .get(image_url)
        .send()
        .await
        .map_err(|source| AssetError::Download {
            url: image_url.to_string(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(AssetError::Status {
            url: image_url.to_string(),
            status: response.status(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| AssetError::Download {
            url: image_url.to_string(),
            source,
        })?;

    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| AssetError::io(&path, e))?;

    if let Err(e) = create_thumbnail(&path, max_px).await {
        if let Err(remove_err) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), "Failed to remove undecodable asset: {remove_err}");
        }
        return Err(e);
    }

    debug!(post_id = %post_id, path = %path.display(), bytes = bytes.len(), "Archived image");
    Ok(path)
}

/// Archive a post's image, returning its local path.
///
/// Failures are logged and yield `None`; the post is stored either way.
pub async fn archive_post_image(
    client: &reqwest::Client,
    image_url: &str,
    post_id: &str,
    archive_dir: &Path,
    max_px: u32,
) -> Option<String> {
    match download_image(client, image_url, post_id, archive_dir, max_px).await {
        Ok(path) => Some(path.to_string_lossy().into_owned()),
        Err(e) => {
            warn!(post_id = %post_id, url = %image_url, "Storing post without image: {e}");
            None
        }
    }
}

/// Create (or overwrite) the thumbnail for a raw asset.
///
/// # Errors
///
/// Returns an error if the file cannot be read, decoded, encoded or written.
pub async fn create_thumbnail(path: &Path, max_px: u32) -> Result<PathBuf, AssetError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| AssetError::io(path, e))?;

    let encoded = tokio::task::spawn_blocking(move || render_thumbnail(&data, max_px)).await??;

    let thumb_path = thumbnail_path(path);
    tokio::fs::write(&thumb_path, encoded)
        .await
        .map_err(|e| AssetError::io(&thumb_path, e))?;

    Ok(thumb_path)
}

/// Decode an image, fit it into a `max_px` square and re-encode it.
///
/// PNG sources stay PNG; JPEG sources and every other format are written as JPEG.
///
/// # Errors
///
/// Returns an error if the image cannot be decoded or encoded.
pub fn render_thumbnail(data: &[u8], max_px: u32) -> Result<Vec<u8>, AssetError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AssetError::Decode(ImageError::IoError(e)))?;
    let format = reader.format();
    let image = reader.decode().map_err(AssetError::Decode)?;

    let thumbnail = shrink_to_fit(image, max_px);

    let mut out = Cursor::new(Vec::new());
    match format {
        Some(ImageFormat::Png) => thumbnail.write_with_encoder(PngEncoder::new(&mut out)),
        _ => DynamicImage::ImageRgb8(thumbnail.to_rgb8()).write_with_encoder(
            JpegEncoder::new_with_quality(&mut out, THUMBNAIL_JPEG_QUALITY),
        ),
    }
    .map_err(AssetError::Encode)?;

    Ok(out.into_inner())
}

/// Scale down so the longest edge is at most `max_px`, keeping the aspect ratio.
/// Images already inside the box are left as they are.
fn shrink_to_fit(image: DynamicImage, max_px: u32) -> DynamicImage {
    if image.width() <= max_px && image.height() <= max_px {
        return image;
    }
    image.resize(max_px, max_px, FilterType::Lanczos3)
}

/// Rebuild thumbnails for every raw asset in the archive directory.
///
/// Files that are themselves thumbnails are ignored. Unless `force` is set,
/// assets that already have a thumbnail are skipped.
///
/// # Errors
///
/// Returns an error if the archive directory cannot be read.
pub async fn regenerate_thumbnails(
    archive_dir: &Path,
    max_px: u32,
    force: bool,
) -> anyhow::Result<RegenerateReport> {
    info!(dir = %archive_dir.display(), force, "Regenerating thumbnails");

    let mut entries = tokio::fs::read_dir(archive_dir)
        .await
        .with_context(|| format!("Failed to read archive directory: {}", archive_dir.display()))?;

    let mut report = RegenerateReport::default();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() || is_thumbnail(&path) {
            continue;
        }

        if !force && tokio::fs::try_exists(thumbnail_path(&path)).await.unwrap_or(false) {
            report.skipped += 1;
            continue;
        }

        match create_thumbnail(&path, max_px).await {
            Ok(_) => report.processed += 1,
            Err(e) => {
                warn!(path = %path.display(), "Failed to create thumbnail: {e}");
                report.failed += 1;
            }
        }
    }

    info!(
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        "Thumbnail regeneration complete"
    );

    Ok(report)
}
