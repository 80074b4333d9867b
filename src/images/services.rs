use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::upload::{UploadedFile, NOT_AN_IMAGE};
use crate::{error::AppError, state::AppState, storage::StorageClient};

pub const JPEG_QUALITY: u8 = 90;
pub const AVATAR_SIZE: u32 = 500;
pub const PRESIGN_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Memes,
    Users,
}

impl Folder {
    pub fn key(self, file: &str) -> String {
        match self {
            Self::Memes => format!("memes/{file}"),
            Self::Users => format!("users/{file}"),
        }
    }

    /// Prefix of every file uploaded for `owner` into this folder.
    pub fn owner_prefix(self, owner: Uuid) -> String {
        match self {
            Self::Memes => format!("meme-{owner}-"),
            Self::Users => format!("user-{owner}-"),
        }
    }
}

/// A re-encoded JPEG waiting to be written to storage.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub filename: String,
    pub key: String,
    pub body: Bytes,
}

fn encode_jpeg(raw: &[u8], fill: Option<(u32, u32)>) -> Result<Vec<u8>, AppError> {
    let img = image::load_from_memory(raw).map_err(|e| {
        warn!(error = %e, "undecodable upload");
        AppError::bad_request(NOT_AN_IMAGE)
    })?;
    let img = match fill {
        Some((w, h)) => img.resize_to_fill(w, h, FilterType::Lanczos3),
        None => img,
    };
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .context("encode jpeg")?;
    Ok(out)
}

/// Decodes, optionally crops to `fill`, and re-encodes as JPEG off the async runtime.
pub async fn to_jpeg(raw: Bytes, fill: Option<(u32, u32)>) -> Result<Bytes, AppError> {
    tokio::task::spawn_blocking(move || encode_jpeg(&raw, fill))
        .await
        .context("image task panicked")?
        .map(Bytes::from)
}

fn millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// `user-<id>-<millis>.jpeg`, 500×500.
pub async fn process_avatar(user_id: Uuid, file: &UploadedFile) -> Result<ProcessedImage, AppError> {
    let filename = format!("{}{}.jpeg", Folder::Users.owner_prefix(user_id), millis());
    let body = to_jpeg(file.bytes.clone(), Some((AVATAR_SIZE, AVATAR_SIZE))).await?;
    Ok(ProcessedImage { key: Folder::Users.key(&filename), filename, body })
}

/// `meme-<userId>-<millis>-<i>.jpeg`, original dimensions.
pub async fn process_meme_images<'a>(
    user_id: Uuid,
    files: impl Iterator<Item = &'a UploadedFile>,
) -> Result<Vec<ProcessedImage>, AppError> {
    let prefix = Folder::Memes.owner_prefix(user_id);
    let stamp = millis();
    let mut out = Vec::new();
    for (i, file) in files.enumerate() {
        let filename = format!("{prefix}{stamp}-{i}.jpeg");
        let body = to_jpeg(file.bytes.clone(), None).await?;
        out.push(ProcessedImage { key: Folder::Memes.key(&filename), filename, body });
    }
    Ok(out)
}

#[instrument(skip_all, fields(count = images.len()))]
pub async fn store_all(state: &AppState, images: &[ProcessedImage]) -> anyhow::Result<()> {
    for img in images {
        state
            .storage
            .put_object(&img.key, img.body.clone(), "image/jpeg")
            .await
            .with_context(|| format!("put_object {}", img.key))?;
    }
    Ok(())
}

/// Deletes `owner`'s files in the background; failures are only logged.
/// Names that were not uploaded for `owner` (the shared default avatar, other
/// users' files) are left alone.
pub fn remove_later(state: &AppState, folder: Folder, owner: Uuid, files: Vec<String>) {
    let prefix = folder.owner_prefix(owner);
    let (files, foreign): (Vec<String>, Vec<String>) =
        files.into_iter().partition(|f| f.starts_with(&prefix));
    if !foreign.is_empty() {
        debug!(%owner, ?foreign, "not removing files of another owner");
    }
    if files.is_empty() {
        return;
    }
    let storage: Arc<dyn StorageClient> = state.storage.clone();
    tokio::spawn(async move {
        for file in files {
            let key = folder.key(&file);
            if let Err(e) = storage.delete_object(&key).await {
                warn!(error = %e, %key, "could not remove old image");
            }
        }
    });
}

pub async fn presign(state: &AppState, folder: Folder, file: &str) -> anyhow::Result<String> {
    let key = folder.key(file);
    state
        .storage
        .presign_get(&key, PRESIGN_TTL_SECS)
        .await
        .with_context(|| format!("presign url for {key}"))
}
