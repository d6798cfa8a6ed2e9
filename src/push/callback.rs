use anyhow::Result;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;
use uuid::Uuid;

use crate::aggregator;
use crate::db::Database;

/// Query parameters of a hub's verification request.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.lease_seconds")]
    pub lease_seconds: Option<String>,
}

/// Confirms (or refuses) a subscription change the hub asks about.
///
/// Returns the challenge to echo back, or `None` when the request does not
/// match a subscription we asked for.
pub fn verify_intent(db: &Database, id: Uuid, params: &VerifyParams) -> Result<Option<String>> {
    let Some(subscription) = db.get_subscription(id)? else {
        return Ok(None);
    };

    let (Some(mode), Some(topic), Some(challenge)) =
        (&params.mode, &params.topic, &params.challenge)
    else {
        return Ok(None);
    };

    if *topic != subscription.topic
        || params.verify_token.as_deref() != Some(subscription.verify_token.as_str())
    {
        tracing::warn!(%id, "Hub verification does not match subscription");
        return Ok(None);
    }

    match mode.as_str() {
        "subscribe" => {
            let lease = params
                .lease_seconds
                .as_deref()
                .and_then(|s| s.trim().parse().ok());
            db.mark_subscription_verified(id, lease)?;
            tracing::info!(%id, topic = %topic, ?lease, "Subscription verified");
        }
        "unsubscribe" => {
            db.delete_subscription(id)?;
            tracing::info!(%id, topic = %topic, "Unsubscription verified");
        }
        other => {
            tracing::warn!(%id, mode = other, "Unknown hub.mode");
            return Ok(None);
        }
    }

    Ok(Some(challenge.clone()))
}

/// What became of a content notification. All of these are acknowledged
/// with 200 so that the hub does not retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Stored(usize),
    BadSignature,
    UnknownFeed,
    Malformed,
}

/// Handles a hub's content notification for subscription `id`.
///
/// Returns `None` for an unknown subscription.
pub fn receive_content(
    db: &Database,
    id: Uuid,
    signature: Option<&str>,
    body: &[u8],
) -> Result<Option<Delivery>> {
    let Some(subscription) = db.get_subscription(id)? else {
        return Ok(None);
    };

    if let Some(secret) = &subscription.secret {
        if !verify_signature(secret, body, signature) {
            tracing::warn!(%id, "Dropping notification with invalid signature");
            return Ok(Some(Delivery::BadSignature));
        }
    }

    let Some(feed) = db.get_feed_by_url(&subscription.topic)? else {
        tracing::warn!(%id, topic = %subscription.topic, "Notification for a topic with no feed");
        return Ok(Some(Delivery::UnknownFeed));
    };

    match aggregator::parse_feed(body) {
        Ok(items) => {
            let stored = aggregator::store_items(db, &feed, &items)?;
            tracing::info!(feed = %feed.feed_url, items = stored, "Stored pushed entries");
            Ok(Some(Delivery::Stored(stored)))
        }
        Err(e) => {
            tracing::warn!(feed = %feed.feed_url, error = %e, "Pushed document is not a feed");
            Ok(Some(Delivery::Malformed))
        }
    }
}

/// Checks an `X-Hub-Signature: <algo>=<hex>` header against the body.
///
/// Hubs implementing PubSubHubbub 0.3 sign with `sha1=`; newer ones use
/// `sha256=`. Anything else is refused.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some((algorithm, expected_hex)) = header.and_then(|h| h.trim().split_once('=')) else {
        return false;
    };

    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };

    let key = secret.as_bytes();
    let verified = match algorithm {
        "sha1" => Hmac::<Sha1>::new_from_slice(key).map(|mut mac| {
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        }),
        "sha256" => Hmac::<Sha256>::new_from_slice(key).map(|mut mac| {
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        }),
        other => {
            tracing::warn!(algorithm = other, "Unsupported signature algorithm");
            return false;
        }
    };

    verified.unwrap_or(false)
}
