use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bucket of feeds, e.g. "Community blogs" or "Project updates".
///
/// When `can_self_add` is set, logged-in users may submit feeds of this type
/// themselves. Such feeds start out pending approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedType {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub can_self_add: bool,
    pub created_at: DateTime<Utc>,
}

/// Moderation state of a feed. Only approved feeds are publicly visible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Denied,
    Pending,
}

impl ApprovalStatus {
    /// Single-letter code stored in the database.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Approved => "A",
            Self::Denied => "D",
            Self::Pending => "P",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "A" => Some(Self::Approved),
            "D" => Some(Self::Denied),
            "P" => Some(Self::Pending),
            _ => None,
        }
    }

    /// Parses the lowercase name used in query strings.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// An external blog tracked for aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: Uuid,
    pub title: String,
    /// URL of the RSS/Atom document. Unique across feeds.
    pub feed_url: String,
    /// Human-facing site of the blog.
    pub public_url: String,
    /// Set when the blog no longer publishes; hides it like a denial would.
    pub is_defunct: bool,
    pub approval_status: ApprovalStatus,
    pub feed_type_id: Uuid,
    /// User who submitted the feed through self-add, if any.
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    /// Approved and still alive.
    pub fn is_public(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved && !self.is_defunct
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// One entry of a feed. `guid` is globally unique; redelivered entries update in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub date_modified: DateTime<Utc>,
    pub guid: String,
}

/// A feed item together with the feed it came from, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItemWithFeed {
    #[serde(flatten)]
    pub item: FeedItem,
    pub feed_title: String,
    pub feed_public_url: String,
    pub feed_approval_status: ApprovalStatus,
}

/// An entry as read from a feed document, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    pub date_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeedTypeInput {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub can_self_add: bool,
}

/// Input for creating a feed from the moderation API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFeedInput {
    pub title: String,
    pub feed_url: String,
    pub public_url: String,
    pub feed_type_id: Uuid,
    #[serde(default)]
    pub is_defunct: bool,
    /// Defaults to `Pending`.
    pub approval_status: Option<ApprovalStatus>,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFeedInput {
    pub title: Option<String>,
    pub feed_url: Option<String>,
    pub public_url: Option<String>,
    pub is_defunct: Option<bool>,
    pub approval_status: Option<ApprovalStatus>,
    pub feed_type_id: Option<Uuid>,
}

/// What a user submits when adding their own blog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfAddFeedInput {
    pub title: String,
    pub feed_url: String,
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetApprovalInput {
    pub approval_status: ApprovalStatus,
}
