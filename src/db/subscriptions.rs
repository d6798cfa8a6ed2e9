use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Row};
use uuid::Uuid;

use super::{fmt_datetime, parse_datetime, parse_uuid, Database};
use crate::auth;
use crate::models::Subscription;

const SUBSCRIPTION_COLUMNS: &str =
    "id, hub, topic, verify_token, secret, lease_expiration, verified, created_at";

impl Database {
    // ============================================================
    // PubSubHubbub subscriptions
    // ============================================================

    /// Returns the subscription for `(hub, topic)` with a fresh verify token.
    ///
    /// A re-subscription keeps the id (and so the callback URL) but rotates
    /// the token, so only the latest request to the hub can be confirmed.
    pub fn get_or_create_subscription(
        &self,
        hub: &str,
        topic: &str,
        secret: Option<&str>,
    ) -> Result<Subscription> {
        let conn = self.conn();
        let verify_token = auth::generate_token();

        conn.execute(
            "INSERT INTO subscriptions (id, hub, topic, verify_token, secret, verified, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)
             ON CONFLICT(hub, topic) DO UPDATE SET
                verify_token = excluded.verify_token,
                secret = excluded.secret",
            (
                Uuid::new_v4().to_string(),
                hub,
                topic,
                &verify_token,
                secret,
                fmt_datetime(Utc::now()),
            ),
        )?;

        let subscription = conn.query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE hub = ? AND topic = ?"),
            (hub, topic),
            subscription_from_row,
        )?;

        Ok(subscription)
    }

    pub fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        let conn = self.conn();
        let subscription = conn
            .query_row(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?"),
                [id.to_string()],
                subscription_from_row,
            )
            .optional()?;
        Ok(subscription)
    }

    pub fn get_subscriptions_by_topic(&self, topic: &str) -> Result<Vec<Subscription>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE topic = ? ORDER BY created_at"
        ))?;

        let subscriptions = stmt
            .query_map([topic], subscription_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subscriptions)
    }

    /// Records the hub's confirmation. Without a lease the subscription never expires.
    pub fn mark_subscription_verified(
        &self,
        id: Uuid,
        lease_seconds: Option<u64>,
    ) -> Result<Option<Subscription>> {
        let lease_expiration = lease_seconds
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|lease| Utc::now().checked_add_signed(lease))
            .map(fmt_datetime);

        {
            let conn = self.conn();
            conn.execute(
                "UPDATE subscriptions SET verified = 1, lease_expiration = ? WHERE id = ?",
                (lease_expiration, id.to_string()),
            )?;
        }

        self.get_subscription(id)
    }

    pub fn delete_subscription(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let rows = conn.execute("DELETE FROM subscriptions WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: parse_uuid(row.get::<_, String>(0)?),
        hub: row.get(1)?,
        topic: row.get(2)?,
        verify_token: row.get(3)?,
        secret: row.get(4)?,
        lease_expiration: row.get::<_, Option<String>>(5)?.map(parse_datetime),
        verified: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}
