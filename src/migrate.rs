use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Parent record. `id` is the deterministic slug id, not a surrogate key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            short_description TEXT NOT NULL,
            full_description TEXT NOT NULL,
            date TEXT NOT NULL,
            year TEXT NOT NULL,
            category TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            location TEXT,
            submitted_by INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Ordered media children. `ord` is the gapless 0-based position of the
    // successfully stored item at commit time.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news_images (
            news_id TEXT NOT NULL,
            image_url TEXT NOT NULL,
            ord INTEGER NOT NULL,
            FOREIGN KEY (news_id) REFERENCES news(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS news_videos (
            news_id TEXT NOT NULL,
            video_url TEXT NOT NULL,
            ord INTEGER NOT NULL,
            FOREIGN KEY (news_id) REFERENCES news(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_news_images_news_id ON news_images(news_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_news_videos_news_id ON news_videos(news_id)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_news_created_at ON news(created_at DESC)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
