//! Persistence committer.
//!
//! Takes a previewed draft session and produces one durable parent row
//! plus its ordered media children, atomically. Media downloads are
//! independent best-effort steps: a failed item is logged and omitted,
//! never aborting the commit. A duplicate deterministic id aborts before
//! any write and is surfaced as its own condition, since the remedy
//! (change the title) differs from a generic retry.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::media::{self, MediaKind};
use crate::models::NewsRecord;
use crate::session::{DraftSession, MediaItem};
use crate::store;
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum CommitError {
    /// A record with the same slugified title and capture date already
    /// exists. Changing the title is the remedy; nothing was written.
    #[error("a record with id '{0}' already exists")]
    Duplicate(String),
    /// The transaction failed and was rolled back entirely.
    #[error("content store failure: {0}")]
    Store(anyhow::Error),
}

/// Outcome of a successful commit, used for confirmation messages and the
/// reviewer announcement.
#[derive(Debug, Clone)]
pub struct CommittedDraft {
    pub id: String,
    pub title: String,
    pub short_summary: String,
    pub image_count: usize,
    pub video_count: usize,
    pub submitted_by: i64,
}

pub struct Committer {
    pool: SqlitePool,
    transport: Arc<dyn Transport>,
    media_root: PathBuf,
    category: String,
}

impl Committer {
    pub fn new(
        pool: SqlitePool,
        transport: Arc<dyn Transport>,
        media_root: PathBuf,
        category: String,
    ) -> Self {
        Self {
            pool,
            transport,
            media_root,
            category,
        }
    }

    /// Persist the finalized draft. On success the session can be
    /// discarded; on failure nothing was written and the session stays
    /// retryable.
    pub async fn commit(&self, session: &DraftSession) -> Result<CommittedDraft, CommitError> {
        let generated = session
            .generated
            .as_ref()
            .ok_or_else(|| CommitError::Store(anyhow::anyhow!("no generated content to commit")))?;

        // Capture date and location were resolved once and cached on the
        // session; generation and commit read the same values.
        let capture = &session.resolved;

        let id = news_id(&generated.title, capture.date);
        if store::exists(&self.pool, &id)
            .await
            .map_err(CommitError::Store)?
        {
            return Err(CommitError::Duplicate(id));
        }

        let images = self
            .fetch_media(&session.images, capture.date, MediaKind::Image)
            .await;
        let videos = self
            .fetch_media(&session.videos, capture.date, MediaKind::Video)
            .await;

        let record = NewsRecord {
            id: id.clone(),
            title: generated.title.clone(),
            short_description: generated.short_summary.clone(),
            full_description: generated.full_body.clone(),
            date: capture.date.format("%d.%m.%Y").to_string(),
            year: capture.date.format("%Y").to_string(),
            category: self.category.clone(),
            status: "draft".to_string(),
            location: capture.location.clone(),
            submitted_by: session.actor,
        };

        store::insert_draft(&self.pool, &record, &images, &videos)
            .await
            .map_err(CommitError::Store)?;

        Ok(CommittedDraft {
            id,
            title: record.title,
            short_summary: record.short_description,
            image_count: images.len(),
            video_count: videos.len(),
            submitted_by: session.actor,
        })
    }

    /// Download and store each media item independently. Failed items are
    /// omitted; the survivors keep their arrival order, which becomes the
    /// gapless child ordering.
    async fn fetch_media(
        &self,
        items: &[MediaItem],
        date: NaiveDate,
        kind: MediaKind,
    ) -> Vec<String> {
        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            let bytes = match self.transport.download(&item.external_ref).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file_ref = %item.external_ref, "media download failed, item omitted: {e:#}");
                    continue;
                }
            };
            match media::store_media(&self.media_root, &bytes, date, kind) {
                Ok(path) => stored.push(path),
                Err(e) => {
                    warn!(file_ref = %item.external_ref, "media store failed, item omitted: {e:#}");
                }
            }
        }
        stored
    }
}

/// Slug for the deterministic id: lowercase, alphanumerics (Latin and
/// Cyrillic) only, whitespace collapsed to single hyphens, at most 50
/// characters.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.to_lowercase().chars() {
        if c.is_whitespace() || c == '-' {
            if !slug.is_empty() && !slug.ends_with('-') {
                slug.push('-');
            }
        } else if c.is_ascii_alphanumeric() || ('а'..='я').contains(&c) || c == 'ё' {
            slug.push(c);
        }
    }
    let truncated: String = slug.chars().take(50).collect();
    truncated.trim_matches('-').to_string()
}

/// Deterministic content id: `YYYY.MM.DD-<slug>`.
pub fn news_id(title: &str, date: NaiveDate) -> String {
    let slug = slugify(title);
    let prefix = date.format("%Y.%m.%d").to_string();
    if slug.is_empty() {
        prefix
    } else {
        format!("{}-{}", prefix, slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 12).unwrap()
    }

    #[test]
    fn test_slugify_latin() {
        assert_eq!(slugify("Clinic Opens New Wing!"), "clinic-opens-new-wing");
    }

    #[test]
    fn test_slugify_cyrillic() {
        assert_eq!(slugify("Мастер-класс по биопсии"), "мастер-класс-по-биопсии");
    }

    #[test]
    fn test_slugify_collapses_and_trims() {
        assert_eq!(slugify("  a   b  "), "a-b");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_slugify_truncates_to_50_chars() {
        let long = "word ".repeat(30);
        let slug = slugify(&long);
        assert!(slug.chars().count() <= 50);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_news_id_shape() {
        assert_eq!(
            news_id("Clinic Opens", date()),
            "2024.05.12-clinic-opens"
        );
        // A title with no usable characters degrades to the date alone.
        assert_eq!(news_id("???", date()), "2024.05.12");
    }

    #[test]
    fn test_news_id_is_deterministic() {
        assert_eq!(news_id("Same Title", date()), news_id("Same Title", date()));
    }
}
