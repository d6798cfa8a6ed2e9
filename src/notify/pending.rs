use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;

use super::{Mailer, OutgoingEmail};
use crate::config::Config;
use crate::db::Database;
use crate::models::Feed;

pub const PENDING_SUBJECT: &str = "Feeds pending approval";

/// Tells the feed approvers that feeds are waiting for moderation.
pub struct PendingApprovalNotifier {
    db: Database,
    mailer: Arc<dyn Mailer>,
    config: Arc<Config>,
}

impl PendingApprovalNotifier {
    pub fn new(db: Database, mailer: Arc<dyn Mailer>, config: Arc<Config>) -> Self {
        Self { db, mailer, config }
    }

    /// Sends at most one email, addressed to every approver at once.
    ///
    /// Returns the number of emails sent: 0 when nothing is pending or no
    /// approver has an address, 1 otherwise.
    pub async fn run(&self) -> Result<usize> {
        let pending = self.db.get_pending_feeds()?;
        if pending.is_empty() {
            tracing::info!("No feeds pending approval");
            return Ok(0);
        }

        let recipients = self
            .db
            .get_group_member_emails(&self.config.feed_approvers_group)?;
        if recipients.is_empty() {
            tracing::warn!(
                group = %self.config.feed_approvers_group,
                pending = pending.len(),
                "Feeds are pending approval but no approver has an email address"
            );
            return Ok(0);
        }

        let email = OutgoingEmail {
            to: recipients,
            subject: format!("{}{}", self.config.email.subject_prefix, PENDING_SUBJECT),
            body: render_pending_email(&pending, &self.config.site_url),
        };

        tracing::info!(
            pending = pending.len(),
            recipients = email.to.len(),
            "Sending pending approval email"
        );
        self.mailer.send(email).await?;
        Ok(1)
    }
}

pub fn render_pending_email(feeds: &[Feed], site_url: &str) -> String {
    let mut body = String::new();
    let noun = if feeds.len() == 1 { "feed is" } else { "feeds are" };
    let _ = writeln!(body, "{} {} waiting for approval:", feeds.len(), noun);
    let _ = writeln!(body);

    for feed in feeds {
        let _ = writeln!(body, "* {}", feed);
        let _ = writeln!(body, "  Feed: {}", feed.feed_url);
        let _ = writeln!(body, "  Site: {}", feed.public_url);
    }

    let _ = writeln!(body);
    let _ = writeln!(body, "Review them at {}/admin/feeds?status=pending", site_url);
    body
}
