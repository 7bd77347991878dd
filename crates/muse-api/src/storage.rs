use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use image::{DynamicImage, ImageFormat};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// 20 MB upload limit for images
pub const MAX_IMAGE_SIZE: usize = 20 * 1024 * 1024;

const PROFILES_DIR: &str = "profiles";
const LOCKED_DIR: &str = "locked";
const BLURRED_DIR: &str = "blurred";

/// Longest edge of the blurred preview, in pixels.
const PREVIEW_MAX_EDGE: u32 = 960;
const PREVIEW_BLUR_SIGMA: f32 = 18.0;
const PREVIEW_DARKEN: i32 = -40;

/// Keys of a stored original and its blurred preview.
#[derive(Debug, Clone)]
pub struct StoredPhoto {
    pub original_key: String,
    pub blurred_key: String,
}

/// Uploaded assets on the local filesystem. Keys are paths relative to the
/// root, e.g. `blurred/<uuid>.jpg`, and are only ever generated here.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [PROFILES_DIR, LOCKED_DIR, BLURRED_DIR] {
            tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    /// Store an original under `locked/` and a blurred, darkened preview
    /// under `blurred/`.
    pub async fn save_photo(&self, bytes: Vec<u8>) -> Result<StoredPhoto, ApiError> {
        check_size(&bytes)?;
        let format = detect_format(&bytes)?;

        let (bytes, preview) = process_image(bytes, move |bytes| render_preview(bytes, format)).await?;

        let id = Uuid::new_v4();
        let original_key = format!("{}/{}.{}", LOCKED_DIR, id, extension(format));
        let blurred_key = format!("{}/{}.jpg", BLURRED_DIR, id);

        self.write(&original_key, &bytes).await?;
        if let Err(e) = self.write(&blurred_key, &preview).await {
            self.delete(&original_key).await;
            return Err(e);
        }
        debug!("Stored photo assets {} and {}", original_key, blurred_key);

        Ok(StoredPhoto {
            original_key,
            blurred_key,
        })
    }

    pub async fn save_profile_photo(&self, bytes: Vec<u8>) -> Result<String, ApiError> {
        check_size(&bytes)?;
        let format = detect_format(&bytes)?;
        // Served as-is, so it has to decode cleanly
        let (bytes, _) = process_image(bytes, move |bytes| {
            image::load_from_memory_with_format(bytes, format)?;
            Ok(())
        })
        .await?;
        let key = format!("{}/{}.{}", PROFILES_DIR, Uuid::new_v4(), extension(format));
        self.write(&key, &bytes).await?;
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, ApiError> {
        let path = self.root.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ApiError::NotFound("Image file not found".into()))
            }
            Err(e) => Err(ApiError::Internal(
                anyhow::Error::new(e).context(format!("reading {}", path.display())),
            )),
        }
    }

    /// Remove an asset. A missing file is logged, not an error.
    pub async fn delete(&self, key: &str) {
        let path = self.root.join(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Deleted asset {}", key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Asset {} was already gone", key);
            }
            Err(e) => warn!("Failed to delete asset {}: {}", key, e),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ApiError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn check_size(bytes: &[u8]) -> Result<(), ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::Validation("No image file provided".into()));
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::Validation("Image is too large".into()));
    }
    Ok(())
}

fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ApiError> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => Ok(format),
        _ => Err(ApiError::Validation("Only JPEG, PNG and WebP images are accepted".into())),
    }
}

fn extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        _ => "jpg",
    }
}

/// Run CPU-bound image work off the runtime, handing the bytes back.
/// Images that fail to decode are a validation error.
async fn process_image<T, F>(bytes: Vec<u8>, work: F) -> Result<(Vec<u8>, T), ApiError>
where
    F: FnOnce(&[u8]) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (bytes, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = work(&bytes);
        (bytes, outcome)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow!("image processing task failed"))
    })?;
    let value = outcome.map_err(|e| ApiError::Validation(format!("Could not process image: {}", e)))?;
    Ok((bytes, value))
}

fn render_preview(bytes: &[u8], format: ImageFormat) -> anyhow::Result<Vec<u8>> {
    let image = image::load_from_memory_with_format(bytes, format)?;
    let image = if image.width().max(image.height()) > PREVIEW_MAX_EDGE {
        image.thumbnail(PREVIEW_MAX_EDGE, PREVIEW_MAX_EDGE)
    } else {
        image
    };
    let preview = image.blur(PREVIEW_BLUR_SIGMA).brighten(PREVIEW_DARKEN);

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(preview.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}
