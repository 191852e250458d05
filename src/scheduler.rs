//! Periodic feed scraping.
//!
//! Each tick takes the feed that has waited longest, stamps it as fetched
//! before touching the network, then downloads and ingests it. A failing
//! feed only costs its own tick; it comes round again after every other
//! feed has had a turn.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{Database, Feed};
use crate::error::{Error, Result};
use crate::fetcher::{FetchContext, Fetcher};
use crate::ingest::{IngestReport, Ingestor};

/// Default bound on a single feed download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct TickReport {
    pub feed: Feed,
    pub report: IngestReport,
}

pub struct Scheduler {
    db: Arc<Database>,
    fetcher: Fetcher,
    ingestor: Ingestor,
    fetch_timeout: Duration,
    tick_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, fetcher: Fetcher) -> Self {
        Self {
            ingestor: Ingestor::new(db.clone()),
            db,
            fetcher,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Scrape the next due feed. Calls never overlap; a second caller waits
    /// for the first to finish.
    pub async fn scrape_next(&self, ctx: &FetchContext) -> Result<TickReport> {
        let _guard = self.tick_lock.lock().await;
        self.scrape_locked(ctx).await
    }

    /// Caller must hold `tick_lock`.
    async fn scrape_locked(&self, ctx: &FetchContext) -> Result<TickReport> {
        let feed = self
            .db
            .get_next_feed_to_fetch()
            .await?
            .ok_or(Error::NoFeeds)?;
        debug!("Selected feed {} ({})", feed.id, feed.name);

        self.db.mark_feed_fetched(feed.id, Utc::now()).await?;

        info!("Fetching feed: {} ({})", feed.name, feed.url);
        let parsed = match self.fetcher.fetch(ctx, &feed.url).await {
            Ok(parsed) => parsed,
            Err(e) => {
                self.record_outcome(&feed, Some(&e.to_string())).await;
                return Err(e.into());
            }
        };

        match self.ingestor.ingest(&feed, &parsed).await {
            Ok(report) => {
                self.record_outcome(&feed, None).await;
                Ok(TickReport { feed, report })
            }
            Err(e) => {
                self.record_outcome(&feed, Some(&e.to_string())).await;
                Err(e.into())
            }
        }
    }

    async fn record_outcome(&self, feed: &Feed, error: Option<&str>) {
        if let Err(e) = self.db.record_fetch_result(feed.id, error).await {
            warn!("Failed to record fetch result for '{}': {}", feed.name, e);
        }
    }

    /// One scheduler tick. Failures are logged, never returned. The fetch
    /// deadline starts once the tick holds the lock.
    pub async fn tick(&self, shutdown: &CancellationToken) -> Option<TickReport> {
        let _guard = self.tick_lock.lock().await;
        let ctx = FetchContext::child_of(shutdown, self.fetch_timeout);

        match self.scrape_locked(&ctx).await {
            Ok(tick) => Some(tick),
            Err(Error::NoFeeds) => {
                info!("No feeds to fetch");
                None
            }
            Err(Error::Fetch(e)) if e.is_cancellation() => {
                warn!("Feed fetch aborted: {}", e);
                None
            }
            Err(e) => {
                error!("Feed scrape failed: {}", e);
                None
            }
        }
    }

    /// Tick every `period` until `shutdown` is cancelled. The first tick
    /// runs immediately.
    pub async fn run(&self, period: Duration, shutdown: CancellationToken) -> Result<()> {
        if period.is_zero() {
            return Err(Error::Usage("interval must be greater than zero".to_string()));
        }

        info!("Collecting feeds every {:?}", period);
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopped");
                    return Ok(());
                }
                _ = timer.tick() => {
                    self.tick(&shutdown).await;
                }
            }
        }
    }
}
