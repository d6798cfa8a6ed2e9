use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use crate::db::Database;
use crate::models::Feed;

const USER_AGENT: &str = concat!("raspberryio/", env!("CARGO_PKG_VERSION"));
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a polling run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    pub items: usize,
}

/// Pulls approved feeds directly, for hubs that missed an update or feeds
/// that have no hub.
pub struct FeedSyncer {
    db: Database,
    client: Client,
}

impl FeedSyncer {
    pub fn new(db: Database) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { db, client })
    }

    /// Fetches every approved, non-defunct feed. One broken feed does not stop the run.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let feeds = self.db.get_active_approved_feeds()?;
        let mut report = SyncReport::default();

        for feed in &feeds {
            match self.sync_feed(feed).await {
                Ok(count) => {
                    report.synced += 1;
                    report.items += count;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(feed = %feed.feed_url, error = %e, "Failed to sync feed");
                }
            }
        }

        tracing::info!(
            synced = report.synced,
            failed = report.failed,
            items = report.items,
            "Feed sync finished"
        );
        Ok(report)
    }

    pub async fn sync_feed(&self, feed: &Feed) -> Result<usize> {
        let body = self
            .client
            .get(&feed.feed_url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        super::ingest(&self.db, feed, &body)
    }
}
