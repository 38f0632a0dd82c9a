use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post row as stored in the `posts` table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRow {
    pub id: String,
    pub thread_id: String,
    pub is_original_post: bool,
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_at: String,
    pub body: Option<String>,
    pub remote_image_url: Option<String>,
    pub local_image_path: Option<String>,
    pub reply_count: i64,
    pub scraped_at: String,
}

/// Stored reply count of one original post.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ThreadReplyCount {
    pub id: String,
    pub thread_id: String,
    pub reply_count: i64,
}

/// Fields shared by original posts and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostContent {
    /// Board-assigned id, unique across all threads.
    pub id: String,
    pub thread_id: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub body: String,
    pub remote_image_url: Option<String>,
    pub local_image_path: Option<String>,
}

/// The post that opens a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPost {
    pub content: PostContent,
    pub title: String,
    pub reply_count: i64,
}

/// A reply within a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPost {
    pub content: PostContent,
}

/// A post ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Post {
    Original(OriginalPost),
    Reply(ReplyPost),
}

impl Post {
    #[must_use]
    pub fn content(&self) -> &PostContent {
        match self {
            Self::Original(op) => &op.content,
            Self::Reply(reply) => &reply.content,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.content().id
    }

    #[must_use]
    pub fn is_original(&self) -> bool {
        matches!(self, Self::Original(_))
    }

    /// Title column value; replies have none.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        match self {
            Self::Original(op) => Some(op.title.as_str()),
            Self::Reply(_) => None,
        }
    }

    /// Reply-count column value; always zero for replies.
    #[must_use]
    pub fn reply_count(&self) -> i64 {
        match self {
            Self::Original(op) => op.reply_count,
            Self::Reply(_) => 0,
        }
    }
}
