//! Uploaded media storage.
//!
//! Files are content-addressed by SHA-256 under `MEDIA_DIR` and served from
//! `/media/files/`.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{
    count_media_by_file, delete_media, get_media, insert_media, media_in_pending_post, Database,
    Media, MediaKind, NewMedia,
};
use crate::error::{ServiceError, ServiceResult, ValidationError};

/// URL path prefix uploaded files are served under.
pub const FILES_ROUTE: &str = "/media/files";

#[derive(Clone)]
pub struct MediaStore {
    db: Database,
    config: Arc<Config>,
}

impl MediaStore {
    #[must_use]
    pub fn new(db: Database, config: Arc<Config>) -> Self {
        Self { db, config }
    }

    #[must_use]
    pub fn media_dir(&self) -> &Path {
        &self.config.media_dir
    }

    /// Store an upload and record it for `owner`.
    ///
    /// The content type is the declared one unless it is missing or generic,
    /// in which case it is guessed from the file name.
    pub async fn store(
        &self,
        owner: &str,
        original_name: Option<&str>,
        declared_type: Option<&str>,
        data: &[u8],
        now: DateTime<Utc>,
    ) -> ServiceResult<Media> {
        if data.is_empty() {
            return Err(ValidationError::invalid("file", "upload is empty").into());
        }
        if data.len() > self.config.max_upload_bytes {
            return Err(ValidationError::invalid(
                "file",
                format!(
                    "upload is {} bytes, the limit is {}",
                    data.len(),
                    self.config.max_upload_bytes
                ),
            )
            .into());
        }

        let content_type = resolve_content_type(original_name, declared_type);
        let kind = media_kind(&content_type).ok_or_else(|| {
            ValidationError::invalid("file", format!("unsupported media type {content_type}"))
        })?;

        let file_name = format!(
            "{}.{}",
            content_hash(data),
            extension(original_name, &content_type)
        );
        self.write_file(&file_name, data).await?;

        let (width, height) = match kind {
            MediaKind::Image => image_dimensions(data).map_or((None, None), |(w, h)| {
                (Some(i64::from(w)), Some(i64::from(h)))
            }),
            MediaKind::Video => (None, None),
        };

        let new = NewMedia {
            owner: owner.to_string(),
            kind,
            url: format!("{}{FILES_ROUTE}/{file_name}", self.config.public_base_url),
            file_name,
            thumbnail_url: None,
            width,
            height,
            size_bytes: i64::try_from(data.len()).unwrap_or(i64::MAX),
            content_type,
        };
        let id = insert_media(self.db.pool(), &new, now).await?;

        info!(
            media_id = id,
            owner,
            kind = ?new.kind,
            size_bytes = new.size_bytes,
            file = %new.file_name,
            "Media stored"
        );

        get_media(self.db.pool(), id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("media {id}")))
    }

    /// Delete media that no unfinished or retryable post still needs.
    pub async fn delete(&self, owner: &str, media_id: i64) -> ServiceResult<()> {
        let media = get_media(self.db.pool(), media_id)
            .await?
            .filter(|m| m.owner == owner)
            .ok_or_else(|| ServiceError::not_found(format!("media {media_id}")))?;

        if media_in_pending_post(self.db.pool(), media_id).await? {
            return Err(ServiceError::conflict(
                "media is attached to a post that has not been published yet",
            ));
        }

        let mut conn = self.db.pool().acquire().await.map_err(anyhow::Error::from)?;
        delete_media(&mut conn, media_id).await?;
        drop(conn);

        if count_media_by_file(self.db.pool(), &media.file_name).await? == 0 {
            let path = self.file_path(&media.file_name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed media file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), "Failed to remove media file: {e}"),
            }
        }

        info!(media_id, owner, "Media deleted");
        Ok(())
    }

    fn file_path(&self, file_name: &str) -> PathBuf {
        self.config.media_dir.join(file_name)
    }

    async fn write_file(&self, file_name: &str, data: &[u8]) -> ServiceResult<()> {
        let path = self.file_path(file_name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Media file already stored");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.media_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create media directory: {}",
                    self.config.media_dir.display()
                )
            })?;
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write media file: {}", path.display()))?;
        Ok(())
    }
}

/// Compute the SHA-256 of an upload as lowercase hex.
fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn resolve_content_type(original_name: Option<&str>, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_lowercase(),
        _ => original_name
            .map(|name| mime_guess::from_path(name).first_or_octet_stream().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

fn media_kind(content_type: &str) -> Option<MediaKind> {
    if content_type.starts_with("image/") {
        Some(MediaKind::Image)
    } else if content_type.starts_with("video/") {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// File extension for a stored upload, preferring the uploaded name's.
fn extension(original_name: Option<&str>, content_type: &str) -> String {
    original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(content_type)
                .and_then(|exts| exts.first())
                .map(|ext| (*ext).to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Width and height of an image, when its format can be decoded.
fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut out = Vec::new();
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out
    }

    #[test]
    fn test_declared_type_wins_over_name() {
        assert_eq!(
            resolve_content_type(Some("a.png"), Some("image/jpeg")),
            "image/jpeg"
        );
        assert_eq!(
            resolve_content_type(Some("clip.mp4"), Some("application/octet-stream")),
            "video/mp4"
        );
        assert_eq!(
            resolve_content_type(None, None),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(media_kind("image/png"), Some(MediaKind::Image));
        assert_eq!(media_kind("video/mp4"), Some(MediaKind::Video));
        assert_eq!(media_kind("application/pdf"), None);
    }

    #[test]
    fn test_extension_sanitized() {
        assert_eq!(extension(Some("Photo.JPG"), "image/jpeg"), "jpg");
        assert_eq!(extension(Some("../../etc/x.p/ng"), "image/png"), "png");
        assert_eq!(extension(None, "application/x-unknown-thing"), "bin");
    }

    #[test]
    fn test_image_dimensions_from_png() {
        assert_eq!(image_dimensions(&png(3, 2)), Some((3, 2)));
        assert_eq!(image_dimensions(b"not an image"), None);
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
