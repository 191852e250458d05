//! Turning fetched feed items into stored posts.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dates::parse_pub_date;
use crate::db::{Database, Feed, NewPost, StoreError};
use crate::fetcher::ParsedFeed;

/// What happened to the items of one fetched feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Items present in the fetched feed.
    pub total: usize,
    /// Items that reached the store, new or not.
    pub processed: usize,
    pub inserted: usize,
    /// Items whose url was already stored.
    pub duplicates: usize,
    /// Items dropped because their date could not be parsed.
    pub skipped: usize,
}

pub struct Ingestor {
    db: Arc<Database>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Store every item of `parsed` as a post of `feed`.
    ///
    /// Items with an unparsable date are skipped and items already stored
    /// are left alone; any other store failure stops the batch.
    pub async fn ingest(&self, feed: &Feed, parsed: &ParsedFeed) -> Result<IngestReport, StoreError> {
        let mut report = IngestReport {
            total: parsed.items.len(),
            ..Default::default()
        };

        for item in &parsed.items {
            let published_at = match parse_pub_date(&item.pub_date) {
                Ok(dt) => dt,
                Err(e) => {
                    warn!("Skipping item '{}' from '{}': {}", item.title, feed.name, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let post = NewPost {
                feed_id: feed.id,
                title: &item.title,
                url: &item.link,
                description: &item.description,
                published_at,
            };

            match self.db.create_post(&post).await {
                Ok(_) => report.inserted += 1,
                Err(e) if e.is_duplicate() => {
                    debug!("Post already stored: {}", item.link);
                    report.duplicates += 1;
                }
                Err(e) => return Err(e),
            }
            report.processed += 1;
        }

        info!(
            "Processed {} of {} items from '{}' ({} new, {} skipped)",
            report.processed, report.total, feed.name, report.inserted, report.skipped
        );
        Ok(report)
    }
}
