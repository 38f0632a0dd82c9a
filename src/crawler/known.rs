//! Per-run snapshot of the post ids already in the store.

use std::collections::HashSet;

use tracing::{error, info};

use crate::db::{get_all_post_ids, Database};

/// Ids of every post persisted at the start of a run, plus those stored during it.
///
/// Built fresh for each run and passed through the stages by reference; it is
/// never kept between runs.
#[derive(Debug, Clone, Default)]
pub struct KnownIdSet {
    ids: HashSet<String>,
}

impl KnownIdSet {
    /// Load all stored post ids.
    ///
    /// A store error is logged and yields an empty set: every catalog entry then
    /// counts as new and the upsert keeps re-stored rows from duplicating.
    pub async fn load(db: &Database) -> Self {
        match get_all_post_ids(db.pool()).await {
            Ok(ids) => {
                info!(known_posts = ids.len(), "Loaded known post ids");
                Self { ids }
            }
            Err(e) => {
                error!("Failed to load known post ids: {e:#}");
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Record a post stored during this run.
    pub fn insert(&mut self, id: impl Into<String>) {
        self.ids.insert(id.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for KnownIdSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}
