use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something a member built with a Pi. Drafts are only visible to the owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_username: String,
    pub title: String,
    pub slug: String,
    /// One-paragraph teaser shown in listings.
    pub tease: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_visible_to(&self, user_id: Option<Uuid>) -> bool {
        self.published || user_id == Some(self.owner_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectInput {
    pub title: String,
    /// Lowercase letters, digits and hyphens; unique across projects.
    pub slug: String,
    #[serde(default)]
    pub tease: String,
    #[serde(default)]
    pub published: bool,
}

/// Partial update. Absent fields are left unchanged; the slug is fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectInput {
    pub title: Option<String>,
    pub tease: Option<String>,
    pub published: Option<bool>,
}
