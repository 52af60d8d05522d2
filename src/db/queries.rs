use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{ErrorLogRecord, NewErrorLog, NewPostRecord, PostRecord, ThemeCount};

// ========== Posts ==========

/// Insert a post record, returning its ID.
pub async fn insert_post(pool: &SqlitePool, post: &NewPostRecord) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO posts (theme_id, caption, image_prompt, image_ref,
                           similarity_report, weather_json, status, error_message)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&post.theme_id)
    .bind(&post.caption)
    .bind(&post.image_prompt)
    .bind(&post.image_ref)
    .bind(&post.similarity_report)
    .bind(&post.weather_json)
    .bind(post.status.as_str())
    .bind(&post.error_message)
    .execute(pool)
    .await
    .context("Failed to insert post")?;

    Ok(result.last_insert_rowid())
}

/// Get a post by ID.
pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<PostRecord>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Most recent posts regardless of theme or status, newest first.
pub async fn get_recent_posts(pool: &SqlitePool, limit: i64) -> Result<Vec<PostRecord>> {
    sqlx::query_as("SELECT * FROM posts ORDER BY created_at DESC, id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to fetch recent posts")
}

/// Captions of the most recent successful posts for one theme, newest first.
///
/// This feeds the similarity-avoidance check, so failed posts are excluded.
pub async fn recent_successful_captions(
    pool: &SqlitePool,
    theme_id: &str,
    limit: i64,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r"
        SELECT caption FROM posts
        WHERE theme_id = ? AND status = 'success'
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        ",
    )
    .bind(theme_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch recent captions")?;

    Ok(rows.into_iter().map(|(caption,)| caption).collect())
}

/// Count posts by status.
pub async fn count_posts_by_status(pool: &SqlitePool, status: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE status = ?")
        .bind(status)
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;
    Ok(row.0)
}

/// Per-theme success/failure counts, most active themes first.
pub async fn count_posts_by_theme(pool: &SqlitePool) -> Result<Vec<ThemeCount>> {
    sqlx::query_as(
        r"
        SELECT theme_id,
               SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS success_count,
               SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed_count
        FROM posts
        GROUP BY theme_id
        ORDER BY COUNT(*) DESC
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to count posts by theme")
}

// ========== Error logs ==========

/// Append an error log entry, returning its ID.
pub async fn insert_error_log(pool: &SqlitePool, entry: &NewErrorLog) -> Result<i64> {
    let result = sqlx::query(
        r"
        INSERT INTO error_logs (stage, attempt, message, prompt_excerpt)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(&entry.stage)
    .bind(entry.attempt)
    .bind(&entry.message)
    .bind(&entry.prompt_excerpt)
    .execute(pool)
    .await
    .context("Failed to insert error log")?;

    Ok(result.last_insert_rowid())
}

/// Most recent error log entries, newest first.
pub async fn get_recent_error_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<ErrorLogRecord>> {
    sqlx::query_as("SELECT * FROM error_logs ORDER BY created_at DESC, id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to fetch error logs")
}
