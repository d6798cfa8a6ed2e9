use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::config::PushSettings;
use crate::db::Database;
use crate::models::Subscription;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Hub rejected the request ({0}): {1}")]
    Rejected(StatusCode, String),

    #[error("Subscription storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Credentials to authenticate against `hub_url`.
///
/// Superfeedr is the only hub in use, so its credentials apply to any hub.
pub fn push_credentials(settings: &PushSettings, _hub_url: &str) -> Option<(String, String)> {
    settings.superfeedr_creds.clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Subscribe,
    Unsubscribe,
}

impl Mode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    settings: PushSettings,
    site_url: String,
}

impl HubClient {
    pub fn new(settings: PushSettings, site_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            settings,
            site_url: site_url.into(),
        }
    }

    /// Where the hub reaches us for this subscription.
    pub fn callback_url(&self, subscription: &Subscription) -> String {
        format!("{}/subscriber/{}/", self.site_url, subscription.id)
    }

    /// Requests push delivery of `topic` from `hub` (the configured hub when `None`).
    pub async fn subscribe(
        &self,
        db: &Database,
        topic: &str,
        hub: Option<&str>,
    ) -> Result<Subscription, HubError> {
        let hub = hub.unwrap_or(&self.settings.hub);
        let subscription =
            db.get_or_create_subscription(hub, topic, self.settings.secret.as_deref())?;
        self.send(Mode::Subscribe, &subscription).await?;
        tracing::info!(topic, hub, id = %subscription.id, "Subscription requested");
        Ok(subscription)
    }

    /// Asks the hub to stop. The record is removed once the hub confirms.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), HubError> {
        self.send(Mode::Unsubscribe, subscription).await?;
        tracing::info!(topic = %subscription.topic, id = %subscription.id, "Unsubscription requested");
        Ok(())
    }

    async fn send(&self, mode: Mode, subscription: &Subscription) -> Result<(), HubError> {
        let callback = self.callback_url(subscription);
        let lease = self.settings.lease_seconds.to_string();

        let mut form: Vec<(&str, &str)> = vec![
            ("hub.mode", mode.as_str()),
            ("hub.topic", &subscription.topic),
            ("hub.callback", &callback),
            ("hub.verify", "sync"),
            ("hub.verify", "async"),
            ("hub.verify_token", &subscription.verify_token),
        ];
        if mode == Mode::Subscribe {
            form.push(("hub.lease_seconds", &lease));
            if let Some(secret) = &subscription.secret {
                form.push(("hub.secret", secret));
            }
        }

        let mut request = self.client.post(&subscription.hub).form(&form);
        if let Some((id, secret)) = push_credentials(&self.settings, &subscription.hub) {
            request = request.basic_auth(id, Some(secret));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, hub = %subscription.hub, "Hub rejected {} request", mode.as_str());
            Err(HubError::Rejected(status, body))
        }
    }
}
