//! Forum search backends.

pub mod discourse;
pub mod keywords;

pub use discourse::DiscourseClient;

use crate::ForumHit;
use crate::error::SearchError;
use std::future::Future;

/// Full-text search over the community forum.
pub trait ForumSearch: Send + Sync + 'static {
    /// Up to `limit` hits for `query`, most relevant first.
    fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ForumHit>, SearchError>> + Send;
}
