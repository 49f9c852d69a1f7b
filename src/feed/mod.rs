//! Feed boundary: normalized entries and the source that yields them.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

pub use http::HttpFeed;

/// One normalized feed entry. Read-only input to matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub author: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: String::new(),
            author: String::new(),
            link: String::new(),
            published: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }
}

/// Anything that can produce the current batch of feed entries.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fetch and parse the feed. An empty feed is `Ok(vec![])`.
    async fn fetch_entries(&self) -> Result<Vec<Entry>, FetchError>;
}
