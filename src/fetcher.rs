use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound for any single request, whatever the caller's context says.
const CLIENT_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = concat!("gator/", env!("CARGO_PKG_VERSION"), " (RSS Aggregator)");

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,

    #[error("fetch deadline exceeded")]
    DeadlineExceeded,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(StatusCode),

    #[error("failed to parse feed: {0}")]
    Parse(String),
}

impl FetchError {
    /// True when the caller's context stopped the fetch rather than the
    /// remote end failing it.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, FetchError::Cancelled | FetchError::DeadlineExceeded)
    }
}

/// Cancellation and deadline for a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl FetchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires after `timeout`. A timeout too large to
    /// represent as an instant never expires.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: deadline_after(timeout),
        }
    }

    /// A context that is also cancelled whenever `parent` is.
    pub fn child_of(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: deadline_after(timeout),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Fail if the context is already done.
    pub fn check(&self) -> Result<(), FetchError> {
        if self.token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(FetchError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the context finishes first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        self.check()?;

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(FetchError::Cancelled),
            _ = wait_for(self.deadline) => Err(FetchError::DeadlineExceeded),
            result = fut => result,
        }
    }
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    pub description: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Publication date exactly as the feed wrote it.
    pub pub_date: String,
}

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        USER_AGENT
    }

    /// Download and decode one feed. A single attempt; retrying is up to
    /// the caller.
    pub async fn fetch(&self, ctx: &FetchContext, url: &str) -> Result<ParsedFeed, FetchError> {
        let body = ctx.run(self.download(url)).await?;
        debug!("Downloaded {} bytes from {}", body.len(), url);
        parse_feed(&body)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Decode an RSS document, falling back to `feed-rs` for Atom and other
/// syndication formats.
pub fn parse_feed(body: &[u8]) -> Result<ParsedFeed, FetchError> {
    match rss::Channel::read_from(body) {
        Ok(channel) => Ok(from_channel(&channel)),
        Err(rss_err) => match feed_rs::parser::parse(body) {
            Ok(feed) => Ok(from_syndication(feed)),
            Err(_) => Err(FetchError::Parse(rss_err.to_string())),
        },
    }
}

fn from_channel(channel: &rss::Channel) -> ParsedFeed {
    let items = channel
        .items()
        .iter()
        .map(|item| FeedItem {
            title: item.title().unwrap_or_default().to_string(),
            link: item.link().unwrap_or_default().to_string(),
            description: item.description().unwrap_or_default().to_string(),
            pub_date: item.pub_date().unwrap_or_default().to_string(),
        })
        .collect();

    ParsedFeed {
        title: channel.title().to_string(),
        link: channel.link().to_string(),
        description: channel.description().to_string(),
        items,
    }
}

fn from_syndication(feed: feed_rs::model::Feed) -> ParsedFeed {
    let items = feed
        .entries
        .into_iter()
        .map(|entry| FeedItem {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .unwrap_or_default(),
            pub_date: entry
                .published
                .or(entry.updated)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default(),
        })
        .collect();

    ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: feed.links.first().map(|l| l.href.clone()).unwrap_or_default(),
        description: feed.description.map(|d| d.content).unwrap_or_default(),
        items,
    }
}
