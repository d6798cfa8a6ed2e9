use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::auth::{self, SESSION_COOKIE};
use crate::models::User;

pub const LOGIN_PATH: &str = "/accounts/login/";

/// The logged-in member. Requests without a live session are redirected to
/// the login page with `next` pointing back at the original path.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Err(login_redirect(parts));
        };

        match state.db.get_session_user(token) {
            Ok(Some(user)) => Ok(CurrentUser(user)),
            Ok(None) => Err(login_redirect(parts)),
            Err(e) => {
                tracing::error!("Session lookup failed: {}", e);
                Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response())
            }
        }
    }
}

/// `Option<CurrentUser>` lets anonymous visitors through as `None`.
impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        let Some(token) = session_token(&parts.headers) else {
            return Ok(None);
        };

        state
            .db
            .get_session_user(token)
            .map(|user| user.map(CurrentUser))
            .map_err(|e| {
                tracing::error!("Session lookup failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            })
    }
}

pub(crate) fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| auth::cookie_value(raw, SESSION_COOKIE))
        .filter(|token| !token.is_empty())
}

fn login_redirect(parts: &Parts) -> Response {
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let next: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
    found(&format!("{LOGIN_PATH}?next={next}"))
}

/// A plain 302 redirect, which is what browsers and the login form expect.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
