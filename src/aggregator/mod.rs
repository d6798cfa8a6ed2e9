//! Feed ingestion: parsing feed documents and storing their entries.
//!
//! Entries arrive either pushed by a hub (see [`crate::push`]) or pulled by
//! [`FeedSyncer`]. Both paths end in [`ingest`].

mod parser;
mod sync;

pub use parser::parse_feed;
pub use sync::{FeedSyncer, SyncReport};

use anyhow::Result;

use crate::db::Database;
use crate::models::{Feed, ParsedItem};

/// Parses a feed document and upserts every entry into `feed`.
///
/// Returns the number of entries stored.
pub fn ingest(db: &Database, feed: &Feed, body: &[u8]) -> Result<usize> {
    let items = parse_feed(body)?;
    store_items(db, feed, &items)
}

pub fn store_items(db: &Database, feed: &Feed, items: &[ParsedItem]) -> Result<usize> {
    for item in items {
        db.upsert_feed_item(feed.id, item)?;
    }
    tracing::debug!(feed = %feed.feed_url, items = items.len(), "Stored feed entries");
    Ok(items.len())
}
