//! Content-store access.
//!
//! The durable side of the pipeline: one parent row per committed draft
//! plus ordered media children, written in a single transaction. After
//! commit, rows are only ever touched by the approval router (status
//! transitions and rejection deletes).

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{NewsRecord, NewsSummary};

/// Insert the parent record and its ordered children atomically.
/// Rolls back entirely on any error.
pub async fn insert_draft(
    pool: &SqlitePool,
    record: &NewsRecord,
    images: &[String],
    videos: &[String],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO news (id, title, short_description, full_description, date, year, category, status, location, submitted_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.title)
    .bind(&record.short_description)
    .bind(&record.full_description)
    .bind(&record.date)
    .bind(&record.year)
    .bind(&record.category)
    .bind(&record.status)
    .bind(&record.location)
    .bind(record.submitted_by)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    for (ord, url) in images.iter().enumerate() {
        sqlx::query("INSERT INTO news_images (news_id, image_url, ord) VALUES (?, ?, ?)")
            .bind(&record.id)
            .bind(url)
            .bind(ord as i64)
            .execute(&mut *tx)
            .await?;
    }

    for (ord, url) in videos.iter().enumerate() {
        sqlx::query("INSERT INTO news_videos (news_id, video_url, ord) VALUES (?, ?, ?)")
            .bind(&record.id)
            .bind(url)
            .bind(ord as i64)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Pre-insert existence check for the deterministic id.
pub async fn exists(pool: &SqlitePool, id: &str) -> Result<bool> {
    let found: Option<String> = sqlx::query_scalar("SELECT id FROM news WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Resolve a possibly-truncated id: exact match first, then the shortest
/// id the fragment is a prefix of.
pub async fn resolve_id(pool: &SqlitePool, fragment: &str) -> Result<Option<NewsSummary>> {
    let row: Option<(String, String, String, String, i64)> = sqlx::query_as(
        "SELECT id, title, date, status, submitted_by FROM news WHERE id = ?",
    )
    .bind(fragment)
    .fetch_optional(pool)
    .await?;

    let row = match row {
        Some(row) => Some(row),
        None => {
            sqlx::query_as(
                "SELECT id, title, date, status, submitted_by FROM news WHERE id LIKE ? ESCAPE '\\' ORDER BY LENGTH(id) ASC LIMIT 1",
            )
            .bind(format!("{}%", like_escape(fragment)))
            .fetch_optional(pool)
            .await?
        }
    };

    Ok(row.map(|(id, title, date, status, submitted_by)| NewsSummary {
        id,
        title,
        date,
        status,
        submitted_by,
    }))
}

/// Escape LIKE wildcards in an id fragment. Slug ids never contain them,
/// but decoded tokens are untrusted input.
fn like_escape(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub async fn set_status(pool: &SqlitePool, id: &str, status: &str) -> Result<()> {
    sqlx::query("UPDATE news SET status = ? WHERE id = ?")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove the parent and all child rows atomically.
pub async fn delete_record(pool: &SqlitePool, id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM news_images WHERE news_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM news_videos WHERE news_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM news WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Most recent records first, for listings and curation menus.
pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<NewsSummary>> {
    let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
        "SELECT id, title, date, status, submitted_by FROM news ORDER BY created_at DESC, date DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, title, date, status, submitted_by)| NewsSummary {
            id,
            title,
            date,
            status,
            submitted_by,
        })
        .collect())
}

/// Stored image paths for a record, in commit order.
pub async fn list_images(pool: &SqlitePool, id: &str) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT image_url, ord FROM news_images WHERE news_id = ? ORDER BY ord ASC")
            .bind(id)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

/// Stored video paths for a record, in commit order.
pub async fn list_videos(pool: &SqlitePool, id: &str) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT video_url, ord FROM news_videos WHERE news_id = ? ORDER BY ord ASC")
            .bind(id)
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape("2024.05.12-plain"), "2024.05.12-plain");
        assert_eq!(like_escape("a%b_c"), "a\\%b\\_c");
    }
}
