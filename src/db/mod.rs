mod community;
mod projects;
mod schema;
mod subscriptions;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::*;

const FEED_COLUMNS: &str = "id, title, feed_url, public_url, is_defunct, approval_status, feed_type_id, owner_id, created_at";

const ITEM_WITH_FEED_SELECT: &str =
    "SELECT i.id, i.feed_id, i.title, i.link, i.summary, i.date_modified, i.guid,
            f.title, f.public_url, f.approval_status
     FROM feed_items i JOIN feeds f ON f.id = i.feed_id";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("io", "raspberry", "raspberryio")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Self::open(dirs.data_dir().join("raspberryio.db"))
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        schema::run_migrations(&self.conn())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    // ============================================================
    // Feed type operations
    // ============================================================

    pub fn get_all_feed_types(&self) -> Result<Vec<FeedType>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, slug, can_self_add, created_at FROM feed_types ORDER BY name",
        )?;

        let types = stmt
            .query_map([], feed_type_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(types)
    }

    pub fn get_feed_type(&self, id: Uuid) -> Result<Option<FeedType>> {
        let conn = self.conn();
        let feed_type = conn
            .query_row(
                "SELECT id, name, slug, can_self_add, created_at FROM feed_types WHERE id = ?",
                [id.to_string()],
                feed_type_from_row,
            )
            .optional()?;
        Ok(feed_type)
    }

    pub fn get_feed_type_by_slug(&self, slug: &str) -> Result<Option<FeedType>> {
        let conn = self.conn();
        let feed_type = conn
            .query_row(
                "SELECT id, name, slug, can_self_add, created_at FROM feed_types WHERE slug = ?",
                [slug],
                feed_type_from_row,
            )
            .optional()?;
        Ok(feed_type)
    }

    pub fn create_feed_type(&self, input: CreateFeedTypeInput) -> Result<FeedType> {
        require_non_blank(&input.name, "name")?;
        require_non_blank(&input.slug, "slug")?;

        if self.get_feed_type_by_slug(&input.slug)?.is_some() {
            return Err(ValidationError::DuplicateSlug(input.slug).into());
        }

        let conn = self.conn();
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO feed_types (id, name, slug, can_self_add, created_at) VALUES (?, ?, ?, ?, ?)",
            (
                id.to_string(),
                &input.name,
                &input.slug,
                input.can_self_add,
                fmt_datetime(now),
            ),
        )?;

        Ok(FeedType {
            id,
            name: input.name,
            slug: input.slug,
            can_self_add: input.can_self_add,
            created_at: now,
        })
    }

    /// Deletes the feed type together with its feeds and their items.
    pub fn delete_feed_type(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM feed_types WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Feed operations
    // ============================================================

    pub fn get_feed(&self, id: Uuid) -> Result<Option<Feed>> {
        let conn = self.conn();
        let feed = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"),
                [id.to_string()],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    pub fn get_feed_by_url(&self, feed_url: &str) -> Result<Option<Feed>> {
        let conn = self.conn();
        let feed = conn
            .query_row(
                &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE feed_url = ?"),
                [feed_url],
                feed_from_row,
            )
            .optional()?;
        Ok(feed)
    }

    pub fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds("ORDER BY title", rusqlite::params![])
    }

    pub fn get_feeds_by_status(&self, status: ApprovalStatus) -> Result<Vec<Feed>> {
        self.query_feeds("WHERE approval_status = ? ORDER BY title", [status.code()])
    }

    pub fn get_pending_feeds(&self) -> Result<Vec<Feed>> {
        self.get_feeds_by_status(ApprovalStatus::Pending)
    }

    /// Approved feeds that are not defunct: the ones worth fetching.
    pub fn get_active_approved_feeds(&self) -> Result<Vec<Feed>> {
        self.query_feeds(
            "WHERE approval_status = ? AND is_defunct = 0 ORDER BY title",
            [ApprovalStatus::Approved.code()],
        )
    }

    fn query_feeds<P: rusqlite::Params>(&self, clause: &str, params: P) -> Result<Vec<Feed>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {FEED_COLUMNS} FROM feeds {clause}"))?;
        let feeds = stmt
            .query_map(params, feed_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(feeds)
    }

    pub fn create_feed(&self, input: CreateFeedInput) -> Result<Feed> {
        require_non_blank(&input.title, "title")?;
        require_non_blank(&input.feed_url, "feed_url")?;

        if self.get_feed_type(input.feed_type_id)?.is_none() {
            return Err(ValidationError::FeedTypeNotFound(input.feed_type_id.to_string()).into());
        }
        if self.get_feed_by_url(&input.feed_url)?.is_some() {
            return Err(ValidationError::DuplicateFeedUrl(input.feed_url).into());
        }

        let conn = self.conn();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let status = input.approval_status.unwrap_or(ApprovalStatus::Pending);

        conn.execute(
            "INSERT INTO feeds (id, title, feed_url, public_url, is_defunct, approval_status, feed_type_id, owner_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                &input.title,
                &input.feed_url,
                &input.public_url,
                input.is_defunct,
                status.code(),
                input.feed_type_id.to_string(),
                input.owner_id.map(|u| u.to_string()),
                fmt_datetime(now),
            ),
        )?;

        Ok(Feed {
            id,
            title: input.title,
            feed_url: input.feed_url,
            public_url: input.public_url,
            is_defunct: input.is_defunct,
            approval_status: status,
            feed_type_id: input.feed_type_id,
            owner_id: input.owner_id,
            created_at: now,
        })
    }

    /// Submits a feed on behalf of a user. The feed waits for moderation.
    pub fn self_add_feed(
        &self,
        feed_type_slug: &str,
        owner_id: Uuid,
        input: SelfAddFeedInput,
    ) -> Result<Feed> {
        let feed_type = self
            .get_feed_type_by_slug(feed_type_slug)?
            .ok_or_else(|| ValidationError::FeedTypeNotFound(feed_type_slug.to_string()))?;

        if !feed_type.can_self_add {
            return Err(ValidationError::SelfAddNotAllowed(feed_type.slug).into());
        }

        self.create_feed(CreateFeedInput {
            title: input.title,
            feed_url: input.feed_url,
            public_url: input.public_url,
            feed_type_id: feed_type.id,
            is_defunct: false,
            approval_status: Some(ApprovalStatus::Pending),
            owner_id: Some(owner_id),
        })
    }

    pub fn update_feed(&self, id: Uuid, input: UpdateFeedInput) -> Result<Option<Feed>> {
        let Some(existing) = self.get_feed(id)? else {
            return Ok(None);
        };

        if let Some(url) = &input.feed_url {
            require_non_blank(url, "feed_url")?;
            if *url != existing.feed_url && self.get_feed_by_url(url)?.is_some() {
                return Err(ValidationError::DuplicateFeedUrl(url.clone()).into());
            }
        }
        if let Some(feed_type_id) = input.feed_type_id {
            if self.get_feed_type(feed_type_id)?.is_none() {
                return Err(ValidationError::FeedTypeNotFound(feed_type_id.to_string()).into());
            }
        }

        let feed = Feed {
            title: input.title.unwrap_or(existing.title),
            feed_url: input.feed_url.unwrap_or(existing.feed_url),
            public_url: input.public_url.unwrap_or(existing.public_url),
            is_defunct: input.is_defunct.unwrap_or(existing.is_defunct),
            approval_status: input.approval_status.unwrap_or(existing.approval_status),
            feed_type_id: input.feed_type_id.unwrap_or(existing.feed_type_id),
            ..existing
        };

        let conn = self.conn();
        conn.execute(
            "UPDATE feeds SET title = ?, feed_url = ?, public_url = ?, is_defunct = ?, approval_status = ?, feed_type_id = ?
             WHERE id = ?",
            (
                &feed.title,
                &feed.feed_url,
                &feed.public_url,
                feed.is_defunct,
                feed.approval_status.code(),
                feed.feed_type_id.to_string(),
                id.to_string(),
            ),
        )?;

        Ok(Some(feed))
    }

    pub fn set_approval_status(&self, id: Uuid, status: ApprovalStatus) -> Result<Option<Feed>> {
        self.update_feed(
            id,
            UpdateFeedInput {
                approval_status: Some(status),
                ..Default::default()
            },
        )
    }

    pub fn delete_feed(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM feeds WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Feed item operations
    // ============================================================

    /// Inserts the item, or refreshes the stored copy when its guid is known.
    pub fn upsert_feed_item(&self, feed_id: Uuid, item: &ParsedItem) -> Result<FeedItem> {
        let conn = self.conn();

        conn.execute(
            "INSERT INTO feed_items (id, feed_id, title, link, summary, date_modified, guid)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(guid) DO UPDATE SET
                title = excluded.title,
                link = excluded.link,
                summary = excluded.summary,
                date_modified = excluded.date_modified",
            (
                Uuid::new_v4().to_string(),
                feed_id.to_string(),
                &item.title,
                &item.link,
                &item.summary,
                fmt_datetime(item.date_modified),
                &item.guid,
            ),
        )?;

        let stored = conn.query_row(
            "SELECT id, feed_id, title, link, summary, date_modified, guid FROM feed_items WHERE guid = ?",
            [&item.guid],
            feed_item_from_row,
        )?;

        Ok(stored)
    }

    pub fn get_feed_items(&self, feed_id: Uuid) -> Result<Vec<FeedItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, feed_id, title, link, summary, date_modified, guid
             FROM feed_items WHERE feed_id = ? ORDER BY date_modified DESC",
        )?;

        let items = stmt
            .query_map([feed_id.to_string()], feed_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Every item of every feed of the type, whatever the feed's status.
    pub fn get_feed_type_items(&self, feed_type_id: Uuid) -> Result<Vec<FeedItemWithFeed>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{ITEM_WITH_FEED_SELECT} WHERE f.feed_type_id = ? ORDER BY i.date_modified DESC"
        ))?;

        let items = stmt
            .query_map([feed_type_id.to_string()], item_with_feed_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Publicly visible items of one feed type, newest first.
    pub fn get_approved_items_by_type(
        &self,
        feed_type_id: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<FeedItemWithFeed>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{ITEM_WITH_FEED_SELECT}
             WHERE f.feed_type_id = ? AND f.approval_status = ? AND f.is_defunct = 0
             ORDER BY i.date_modified DESC LIMIT ?"
        ))?;

        let items = stmt
            .query_map(
                (
                    feed_type_id.to_string(),
                    ApprovalStatus::Approved.code(),
                    sql_limit(limit),
                ),
                item_with_feed_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// Publicly visible items across all feed types, newest first.
    pub fn get_approved_items(&self, limit: Option<u32>) -> Result<Vec<FeedItemWithFeed>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{ITEM_WITH_FEED_SELECT}
             WHERE f.approval_status = ? AND f.is_defunct = 0
             ORDER BY i.date_modified DESC LIMIT ?"
        ))?;

        let items = stmt
            .query_map(
                (ApprovalStatus::Approved.code(), sql_limit(limit)),
                item_with_feed_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn require_non_blank(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Blank(field).into());
    }
    Ok(())
}

/// SQLite treats a negative LIMIT as unbounded.
fn sql_limit(limit: Option<u32>) -> i64 {
    limit.map(i64::from).unwrap_or(-1)
}

fn feed_type_from_row(row: &Row<'_>) -> rusqlite::Result<FeedType> {
    Ok(FeedType {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        slug: row.get(2)?,
        can_self_add: row.get(3)?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: parse_uuid(row.get::<_, String>(0)?),
        title: row.get(1)?,
        feed_url: row.get(2)?,
        public_url: row.get(3)?,
        is_defunct: row.get(4)?,
        approval_status: parse_status(5, row.get::<_, String>(5)?)?,
        feed_type_id: parse_uuid(row.get::<_, String>(6)?),
        owner_id: row.get::<_, Option<String>>(7)?.map(parse_uuid),
        created_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

fn feed_item_from_row(row: &Row<'_>) -> rusqlite::Result<FeedItem> {
    Ok(FeedItem {
        id: parse_uuid(row.get::<_, String>(0)?),
        feed_id: parse_uuid(row.get::<_, String>(1)?),
        title: row.get(2)?,
        link: row.get(3)?,
        summary: row.get(4)?,
        date_modified: parse_datetime(row.get::<_, String>(5)?),
        guid: row.get(6)?,
    })
}

fn item_with_feed_from_row(row: &Row<'_>) -> rusqlite::Result<FeedItemWithFeed> {
    Ok(FeedItemWithFeed {
        item: feed_item_from_row(row)?,
        feed_title: row.get(7)?,
        feed_public_url: row.get(8)?,
        feed_approval_status: parse_status(9, row.get::<_, String>(9)?)?,
    })
}

fn parse_status(idx: usize, code: String) -> rusqlite::Result<ApprovalStatus> {
    ApprovalStatus::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(ValidationError::UnknownApprovalStatus(code)),
        )
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

/// Fixed-width UTC timestamps so that string order matches time order.
fn fmt_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
