//! Integration tests for database operations.

use board_archiver::db::{
    count_replies_by_thread, get_all_post_ids, get_original_post_reply_counts, get_post,
    get_posts_by_thread, get_thread_reply_count, update_reply_count, upsert_post, Database,
    OriginalPost, Post, PostContent, ReplyPost,
};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn content(id: &str, thread_id: &str) -> PostContent {
    PostContent {
        id: id.to_string(),
        thread_id: thread_id.to_string(),
        author: "Anonymous".to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap(),
        body: format!("body of {id}"),
        remote_image_url: None,
        local_image_path: None,
    }
}

fn original(id: &str, reply_count: i64) -> Post {
    Post::Original(OriginalPost {
        content: content(id, id),
        title: format!("Thread {id}"),
        reply_count,
    })
}

fn reply(id: &str, thread_id: &str) -> Post {
    Post::Reply(ReplyPost {
        content: content(id, thread_id),
    })
}

#[tokio::test]
async fn test_upsert_and_get_post() {
    let (db, _temp_dir) = setup_db().await;

    upsert_post(db.pool(), &original("100", 0))
        .await
        .expect("Failed to upsert post");

    let row = get_post(db.pool(), "100")
        .await
        .expect("Failed to get post")
        .expect("Post not found");

    assert_eq!(row.thread_id, "100");
    assert!(row.is_original_post);
    assert_eq!(row.title.as_deref(), Some("Thread 100"));
    assert_eq!(row.author.as_deref(), Some("Anonymous"));
    assert_eq!(row.created_at, "2024-03-05T14:30:00+00:00");
    assert_eq!(row.local_image_path, None);
}

#[tokio::test]
async fn test_upsert_replaces_instead_of_duplicating() {
    let (db, _temp_dir) = setup_db().await;

    upsert_post(db.pool(), &original("100", 0)).await.unwrap();
    upsert_post(db.pool(), &original("100", 4)).await.unwrap();

    let ids = get_all_post_ids(db.pool()).await.unwrap();
    assert_eq!(ids.len(), 1);

    let row = get_post(db.pool(), "100").await.unwrap().unwrap();
    assert_eq!(row.reply_count, 4);
}

#[tokio::test]
async fn test_reply_rows_have_no_title_or_count() {
    let (db, _temp_dir) = setup_db().await;

    upsert_post(db.pool(), &reply("101", "100")).await.unwrap();

    let row = get_post(db.pool(), "101").await.unwrap().unwrap();
    assert!(!row.is_original_post);
    assert_eq!(row.title, None);
    assert_eq!(row.reply_count, 0);
    assert_eq!(row.thread_id, "100");
}

#[tokio::test]
async fn test_thread_reply_count_queries() {
    let (db, _temp_dir) = setup_db().await;

    upsert_post(db.pool(), &original("100", 5)).await.unwrap();
    upsert_post(db.pool(), &reply("101", "100")).await.unwrap();
    upsert_post(db.pool(), &reply("102", "100")).await.unwrap();
    upsert_post(db.pool(), &original("200", 0)).await.unwrap();

    assert_eq!(get_thread_reply_count(db.pool(), "100").await.unwrap(), Some(5));
    // Replies are not threads.
    assert_eq!(get_thread_reply_count(db.pool(), "101").await.unwrap(), None);
    assert_eq!(get_thread_reply_count(db.pool(), "999").await.unwrap(), None);

    let counts = count_replies_by_thread(db.pool()).await.unwrap();
    assert_eq!(counts.get("100"), Some(&2));
    assert_eq!(counts.get("200"), None);

    let originals: Vec<(String, String, i64)> = get_original_post_reply_counts(db.pool())
        .await
        .unwrap()
        .into_iter()
        .map(|row| (row.id, row.thread_id, row.reply_count))
        .collect();
    assert_eq!(
        originals,
        vec![
            ("100".to_string(), "100".to_string(), 5),
            ("200".to_string(), "200".to_string(), 0)
        ]
    );
}

#[tokio::test]
async fn test_update_reply_count_only_touches_original_posts() {
    let (db, _temp_dir) = setup_db().await;

    upsert_post(db.pool(), &original("100", 0)).await.unwrap();
    upsert_post(db.pool(), &reply("101", "100")).await.unwrap();

    assert!(update_reply_count(db.pool(), "100", 1).await.unwrap());
    assert!(!update_reply_count(db.pool(), "101", 9).await.unwrap());
    assert!(!update_reply_count(db.pool(), "missing", 9).await.unwrap());

    assert_eq!(get_thread_reply_count(db.pool(), "100").await.unwrap(), Some(1));
    assert_eq!(get_post(db.pool(), "101").await.unwrap().unwrap().reply_count, 0);
}

#[tokio::test]
async fn test_posts_by_thread_lists_original_first() {
    let (db, _temp_dir) = setup_db().await;

    upsert_post(db.pool(), &reply("110", "100")).await.unwrap();
    upsert_post(db.pool(), &reply("102", "100")).await.unwrap();
    upsert_post(db.pool(), &original("100", 2)).await.unwrap();

    let ids: Vec<String> = get_posts_by_thread(db.pool(), "100")
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(ids, vec!["100", "102", "110"]);
}

#[tokio::test]
async fn test_reopening_database_keeps_rows() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.sqlite");

    {
        let db = Database::new(&db_path).await.unwrap();
        upsert_post(db.pool(), &original("100", 0)).await.unwrap();
    }

    let db = Database::new(&db_path).await.unwrap();
    assert!(get_all_post_ids(db.pool()).await.unwrap().contains("100"));
}
