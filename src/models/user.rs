use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered member. The password hash stays in the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetActiveInput {
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberInput {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
}

/// `user_id` follows `target_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Follow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub target_id: Uuid,
    pub started_at: DateTime<Utc>,
}

pub const VERB_STARTED_FOLLOWING: &str = "started following";

/// An activity stream entry: `actor` did `verb` to `target`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_username: String,
    pub verb: String,
    pub target_id: Option<Uuid>,
    pub target_username: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Public profile page data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub followers_count: u64,
    pub following_count: u64,
}

/// Which side of the follow graph to list on a profile.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Followers,
    Following,
}

impl Relationship {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "followers" => Some(Self::Followers),
            "following" => Some(Self::Following),
            _ => None,
        }
    }
}
