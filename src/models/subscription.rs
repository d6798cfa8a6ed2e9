use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A PubSubHubbub subscription of one topic (feed URL) at one hub.
///
/// The record is created before the hub is contacted so that its id can be
/// embedded in the callback URL. It becomes `verified` once the hub has
/// confirmed intent with a matching `verify_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub hub: String,
    pub topic: String,
    pub verify_token: String,
    /// HMAC key the hub signs content notifications with.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub lease_expiration: Option<DateTime<Utc>>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lease_expiration, Some(expires) if expires <= now)
    }
}
