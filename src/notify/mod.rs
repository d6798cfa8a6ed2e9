//! Outbound email and the pending-approval notification.

mod mailer;
mod pending;

pub use mailer::{MailError, Mailer, MemoryMailer, OutgoingEmail, SmtpMailer};
pub use pending::{render_pending_email, PendingApprovalNotifier};
