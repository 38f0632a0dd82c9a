use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Post, PostRow, ThreadReplyCount};

// ========== Reads ==========

/// Get every stored post id.
pub async fn get_all_post_ids(pool: &SqlitePool) -> Result<HashSet<String>> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM posts")
        .fetch_all(pool)
        .await
        .context("Failed to fetch post ids")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Get a post by its board-assigned id.
pub async fn get_post(pool: &SqlitePool, id: &str) -> Result<Option<PostRow>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Get all posts of a thread, original post first, then replies by id.
pub async fn get_posts_by_thread(pool: &SqlitePool, thread_id: &str) -> Result<Vec<PostRow>> {
    sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE thread_id = ?
        ORDER BY is_original_post DESC, CAST(id AS INTEGER), id
        ",
    )
    .bind(thread_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch posts by thread")
}

/// Get the stored reply count of a thread's original post.
///
/// Returns `None` when the thread has no stored original post.
pub async fn get_thread_reply_count(pool: &SqlitePool, thread_id: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT reply_count FROM posts WHERE id = ? AND is_original_post = 1")
            .bind(thread_id)
            .fetch_optional(pool)
            .await
            .context("Failed to fetch thread reply count")?;

    Ok(row.map(|(count,)| count))
}

/// Get the stored reply count of every original post.
pub async fn get_original_post_reply_counts(pool: &SqlitePool) -> Result<Vec<ThreadReplyCount>> {
    sqlx::query_as(
        "SELECT id, thread_id, reply_count FROM posts WHERE is_original_post = 1 ORDER BY id",
    )
        .fetch_all(pool)
        .await
        .context("Failed to fetch original post reply counts")
}

/// Count stored replies per thread id.
pub async fn count_replies_by_thread(pool: &SqlitePool) -> Result<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r"
        SELECT thread_id, COUNT(*)
        FROM posts
        WHERE is_original_post = 0
        GROUP BY thread_id
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to count replies by thread")?;

    Ok(rows.into_iter().collect())
}

// ========== Writes ==========

/// Insert a post, or replace the stored row with the same id.
pub async fn upsert_post(pool: &SqlitePool, post: &Post) -> Result<()> {
    let content = post.content();

    sqlx::query(
        r"
        INSERT INTO posts (
            id, thread_id, is_original_post, title, author, created_at, body,
            remote_image_url, local_image_path, reply_count
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            thread_id = excluded.thread_id,
            is_original_post = excluded.is_original_post,
            title = excluded.title,
            author = excluded.author,
            created_at = excluded.created_at,
            body = excluded.body,
            remote_image_url = excluded.remote_image_url,
            local_image_path = excluded.local_image_path,
            reply_count = excluded.reply_count,
            scraped_at = datetime('now')
        ",
    )
    .bind(&content.id)
    .bind(&content.thread_id)
    .bind(post.is_original())
    .bind(post.title())
    .bind(&content.author)
    .bind(content.created_at.to_rfc3339())
    .bind(&content.body)
    .bind(&content.remote_image_url)
    .bind(&content.local_image_path)
    .bind(post.reply_count())
    .execute(pool)
    .await
    .context("Failed to upsert post")?;

    Ok(())
}

/// Set the reply count of an original post.
///
/// Returns `true` when a row was updated.
pub async fn update_reply_count(pool: &SqlitePool, id: &str, reply_count: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE posts SET reply_count = ? WHERE id = ? AND is_original_post = 1")
        .bind(reply_count)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update reply count")?;

    Ok(result.rows_affected() > 0)
}
