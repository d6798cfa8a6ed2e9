//! Access control: who may moderate, and throttles against key and password
//! guessing.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::session::session_token;
use super::AppState;
use crate::config::AccessSettings;

const MINUTE: Duration = Duration::from_secs(60);

/// Fixed-window hit counter per client address.
#[derive(Clone, Debug)]
pub struct Throttle {
    limit: u32,
    window: Duration,
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
}

#[derive(Debug)]
struct Window {
    opened: Instant,
    hits: u32,
}

impl Throttle {
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, MINUTE)
    }

    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts a hit from `ip`. Returns false once the window is used up.
    pub fn hit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().expect("throttle lock poisoned");
        let window = windows.entry(ip).or_insert(Window { opened: now, hits: 0 });

        if now.duration_since(window.opened) >= self.window {
            *window = Window { opened: now, hits: 0 };
        }
        if window.hits >= self.limit {
            return false;
        }
        window.hits += 1;
        true
    }

    /// Whether `ip` used up its window, without counting a hit.
    pub fn is_exhausted(&self, ip: IpAddr) -> bool {
        let windows = self.windows.lock().expect("throttle lock poisoned");
        windows.get(&ip).is_some_and(|window| {
            window.opened.elapsed() < self.window && window.hits >= self.limit
        })
    }

    /// Forgets clients whose window has closed.
    pub fn sweep(&self) {
        let window = self.window;
        let mut windows = self.windows.lock().expect("throttle lock poisoned");
        windows.retain(|_, w| w.opened.elapsed() < window);
    }
}

/// Access rules built from [`AccessSettings`].
#[derive(Clone, Debug)]
pub struct AccessControl {
    api_key: Option<Arc<str>>,
    moderation: Option<Throttle>,
    logins: Option<Throttle>,
}

impl AccessControl {
    pub fn from_settings(settings: &AccessSettings) -> Self {
        let api_key: Option<Arc<str>> = settings.api_key.as_deref().map(Arc::from);
        // An open moderation API is a private deployment; nothing to throttle.
        let moderation = match (&api_key, settings.moderation_rate_limit) {
            (Some(_), limit) if limit > 0 => Some(Throttle::per_minute(limit)),
            _ => None,
        };
        let logins = (settings.login_attempt_limit > 0)
            .then(|| Throttle::per_minute(settings.login_attempt_limit));

        Self {
            api_key,
            moderation,
            logins,
        }
    }

    pub fn throttles(&self) -> Vec<Throttle> {
        self.moderation.iter().chain(&self.logins).cloned().collect()
    }

    pub fn login_locked(&self, ip: IpAddr) -> bool {
        self.logins.as_ref().is_some_and(|t| t.is_exhausted(ip))
    }

    pub fn record_failed_login(&self, ip: IpAddr) {
        if let Some(throttle) = &self.logins {
            throttle.hit(ip);
        }
    }
}

/// Lets a request through to the moderation API when it carries the API
/// key as a bearer token, or the session of a feed approver.
pub async fn require_moderator(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let access = &state.access;
    let ip = client_ip(request.headers());

    if let Some(throttle) = &access.moderation {
        if !throttle.hit(ip) {
            tracing::warn!(%ip, path = %request.uri().path(), "Moderation rate limit exceeded");
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    let Some(api_key) = &access.api_key else {
        return next.run(request).await;
    };

    match identify_moderator(&state, request.headers(), api_key) {
        Ok(Some(moderator)) => {
            tracing::debug!(%moderator, path = %request.uri().path(), "Moderation request");
            next.run(request).await
        }
        Ok(None) => {
            tracing::warn!(%ip, path = %request.uri().path(), "Refused moderation request");
            (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer realm=\"moderation\"")],
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Moderator lookup failed: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Name to log for the moderator behind `headers`, if any.
fn identify_moderator(
    state: &AppState,
    headers: &HeaderMap,
    api_key: &str,
) -> anyhow::Result<Option<String>> {
    if bearer_token(headers) == Some(api_key) {
        return Ok(Some("api-key".to_string()));
    }

    let Some(token) = session_token(headers) else {
        return Ok(None);
    };
    let Some(user) = state.db.get_session_user(token)? else {
        return Ok(None);
    };

    if state
        .db
        .is_group_member(&state.config.feed_approvers_group, user.id)?
    {
        Ok(Some(user.username))
    } else {
        Ok(None)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Client address as reported by the reverse proxy, localhost otherwise.
pub(crate) fn client_ip(headers: &HeaderMap) -> IpAddr {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());
    let real_ip = headers.get("X-Real-IP").and_then(|v| v.to_str().ok());

    forwarded
        .into_iter()
        .chain(real_ip)
        .find_map(|raw| raw.trim().parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}
