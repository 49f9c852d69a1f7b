//! HTTP RSS/Atom source backed by `reqwest` and `feed-rs`.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::FetchError;
use crate::feed::{Entry, FeedSource};

/// Some feed hosts reject non-browser agents.
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Feed fetched over HTTP(S) on every poll cycle.
pub struct HttpFeed {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            timeout,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_entries(&self) -> Result<Vec<Entry>, FetchError> {
        let resp = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let entries = parse_feed(&body)?;
        debug!(url = %self.url, count = entries.len(), "Fetched feed");
        Ok(entries)
    }
}

/// Parse an RSS/Atom document into normalized entries.
pub fn parse_feed(body: &[u8]) -> Result<Vec<Entry>, FetchError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let entries = feed
        .entries
        .into_iter()
        .map(|item| {
            let link = item
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            let id = if item.id.trim().is_empty() {
                link.clone()
            } else {
                item.id.trim().to_string()
            };
            let title = item.title.map(|t| strip_html(&t.content)).unwrap_or_default();
            let summary = item
                .summary
                .map(|t| t.content)
                .or_else(|| item.content.and_then(|c| c.body))
                .map(|s| strip_html(&s))
                .unwrap_or_default();
            let author = item
                .authors
                .first()
                .map(|p| strip_html(&p.name))
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "unknown".to_string());

            Entry {
                id,
                title,
                summary,
                author,
                link,
                published: item.published.or(item.updated),
            }
        })
        .collect();

    Ok(entries)
}

/// Remove markup and surrounding whitespace.
pub fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, "").trim().to_string()
}
