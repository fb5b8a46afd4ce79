//! Local storage of accepted media.
//!
//! Accepted files land in date-bucketed folders under the configured media
//! root (`YYYY.MM.DD/<kind>_<uuid>.<ext>`); the returned path is relative
//! to the root and is what gets recorded in the content store.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    fn prefix(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// Folder name for a capture date.
pub fn date_bucket(date: NaiveDate) -> String {
    date.format("%Y.%m.%d").to_string()
}

/// Write media bytes under the date bucket and return the relative path.
pub fn store_media(root: &Path, bytes: &[u8], date: NaiveDate, kind: MediaKind) -> Result<String> {
    let bucket = date_bucket(date);
    let folder = root.join(&bucket);
    std::fs::create_dir_all(&folder)
        .with_context(|| format!("Failed to create media folder: {}", folder.display()))?;

    let filename = format!(
        "{}_{}.{}",
        kind.prefix(),
        Uuid::new_v4(),
        kind.default_extension()
    );
    let path = folder.join(&filename);
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write media file: {}", path.display()))?;

    Ok(format!("{}/{}", bucket, filename))
}
