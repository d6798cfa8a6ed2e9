//! Runtime settings loaded from the environment.
//!
//! Every variable is prefixed with `RASPBERRYIO_`. A `.env` file in the
//! working directory is honoured.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const DEFAULT_SITE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_APPROVERS_GROUP: &str = "feed-approver";
pub const DEFAULT_HUB: &str = "https://superfeedr.com/hubbub";
/// Thirty days, the lease Superfeedr grants by default.
pub const DEFAULT_LEASE_SECONDS: u64 = 2_592_000;
pub const DEFAULT_MODERATION_RATE_LIMIT: u32 = 100;
pub const DEFAULT_LOGIN_ATTEMPT_LIMIT: u32 = 10;

#[derive(Clone, Debug)]
pub struct Config {
    /// SQLite file. `None` means the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Absolute base URL of this site, without trailing slash.
    pub site_url: String,
    /// Members of this group receive pending-approval emails.
    pub feed_approvers_group: String,
    pub email: EmailSettings,
    pub push: PushSettings,
    pub access: AccessSettings,
    pub session_days: i64,
}

#[derive(Clone, Debug)]
pub struct EmailSettings {
    pub from: String,
    pub subject_prefix: String,
    /// Empty host puts the mailer in no-op mode.
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PushSettings {
    pub hub: String,
    /// Superfeedr (id, secret) pair used as Basic auth against the hub.
    pub superfeedr_creds: Option<(String, String)>,
    /// HMAC secret handed to the hub for signed content notifications.
    pub secret: Option<String>,
    pub lease_seconds: u64,
}

/// Who may reach the moderation API, and how hard clients may knock.
#[derive(Clone, Debug)]
pub struct AccessSettings {
    /// Moderator API key. Without one the moderation API is open, which is
    /// only sensible on a private network. With one, feed approvers may also
    /// use their login session.
    pub api_key: Option<String>,
    /// Allowed CORS origins; `None` allows any.
    pub cors_origins: Option<Vec<String>>,
    /// Moderation requests per client per minute, enforced with an API key.
    pub moderation_rate_limit: u32,
    /// Failed logins per client per minute before the form is locked. 0 disables.
    pub login_attempt_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            site_url: DEFAULT_SITE_URL.to_string(),
            feed_approvers_group: DEFAULT_APPROVERS_GROUP.to_string(),
            email: EmailSettings::default(),
            push: PushSettings::default(),
            access: AccessSettings::default(),
            session_days: 14,
        }
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            from: "RaspberryIO <noreply@raspberry.io>".to_string(),
            subject_prefix: "[RaspberryIO] ".to_string(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
        }
    }
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            hub: DEFAULT_HUB.to_string(),
            superfeedr_creds: None,
            secret: None,
            lease_seconds: DEFAULT_LEASE_SECONDS,
        }
    }
}

impl Default for AccessSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            cors_origins: None,
            moderation_rate_limit: DEFAULT_MODERATION_RATE_LIMIT,
            login_attempt_limit: DEFAULT_LOGIN_ATTEMPT_LIMIT,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let superfeedr_creds = match env::var("RASPBERRYIO_SUPERFEEDR_CREDS") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_superfeedr_creds(&raw)?),
            _ => None,
        };

        Ok(Self {
            database_path: env::var("RASPBERRYIO_DATABASE").ok().map(PathBuf::from),
            site_url: env::var("RASPBERRYIO_SITE_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.site_url),
            feed_approvers_group: env::var("RASPBERRYIO_FEED_APPROVERS_GROUP")
                .unwrap_or(defaults.feed_approvers_group),
            email: EmailSettings {
                from: env::var("RASPBERRYIO_EMAIL_FROM").unwrap_or(defaults.email.from),
                subject_prefix: env::var("RASPBERRYIO_EMAIL_SUBJECT_PREFIX")
                    .unwrap_or(defaults.email.subject_prefix),
                smtp_host: env::var("RASPBERRYIO_SMTP_HOST").unwrap_or_default(),
                smtp_port: parse_or("RASPBERRYIO_SMTP_PORT", defaults.email.smtp_port),
                smtp_username: env::var("RASPBERRYIO_SMTP_USERNAME").ok(),
                smtp_password: env::var("RASPBERRYIO_SMTP_PASSWORD").ok(),
            },
            push: PushSettings {
                hub: env::var("RASPBERRYIO_PUSH_HUB").unwrap_or(defaults.push.hub),
                superfeedr_creds,
                secret: env::var("RASPBERRYIO_PUSH_SECRET").ok(),
                lease_seconds: parse_or(
                    "RASPBERRYIO_PUSH_LEASE_SECONDS",
                    defaults.push.lease_seconds,
                ),
            },
            access: AccessSettings {
                api_key: env::var("RASPBERRYIO_API_KEY")
                    .ok()
                    .filter(|key| !key.trim().is_empty()),
                cors_origins: env::var("RASPBERRYIO_CORS_ORIGINS")
                    .ok()
                    .map(|raw| parse_list(&raw)),
                moderation_rate_limit: parse_or(
                    "RASPBERRYIO_RATE_LIMIT",
                    defaults.access.moderation_rate_limit,
                ),
                login_attempt_limit: parse_or(
                    "RASPBERRYIO_LOGIN_ATTEMPTS",
                    defaults.access.login_attempt_limit,
                ),
            },
            session_days: parse_or("RASPBERRYIO_SESSION_DAYS", defaults.session_days),
        })
    }
}

/// Credentials are stored as a JSON array, `["id", "secret"]`.
pub fn parse_superfeedr_creds(raw: &str) -> Result<(String, String)> {
    let pair: Vec<String> =
        serde_json::from_str(raw).context("RASPBERRYIO_SUPERFEEDR_CREDS must be a JSON array")?;
    match pair.as_slice() {
        [id, secret] => Ok((id.clone(), secret.clone())),
        _ => anyhow::bail!("RASPBERRYIO_SUPERFEEDR_CREDS must hold exactly two strings"),
    }
}

/// Comma-separated values, blanks dropped.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring malformed setting");
            default
        }),
        Err(_) => default,
    }
}
