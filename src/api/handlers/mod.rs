use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::client_ip;
use super::session::{found, session_token};
use super::{AppState, CurrentUser};
use crate::auth::SESSION_COOKIE;
use crate::error::ValidationError;
use crate::models::*;
use crate::notify::PendingApprovalNotifier;
use crate::pagination::{paginate, Page, PageQuery};
use crate::push::{self, Delivery, HubError, VerifyParams};
use crate::syndication::{self, Channel, FEED_TYPE_LIMIT, FIREHOSE_LIMIT, RSS_CONTENT_TYPE};

pub const FEED_ITEMS_PER_PAGE: usize = 25;
pub const USERS_PER_PAGE: usize = 20;
pub const PROJECTS_PER_PAGE: usize = 20;

pub const INVALID_LOGIN: &str = "Invalid username or password";
pub const TOO_MANY_LOGINS: &str = "Too many failed logins, try again in a minute";
const DEFAULT_LOGIN_REDIRECT: &str = "/dashboard/";

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
///
/// `ValidationError`s are domain rule violations whose message is safe to
/// show, so they come back as 400. Anything else is a generic 500.
fn internal_error(e: anyhow::Error) -> (StatusCode, String) {
    if let Some(validation) = e.downcast_ref::<ValidationError>() {
        tracing::warn!("Validation error: {}", validation);
        return (StatusCode::BAD_REQUEST, validation.to_string());
    }

    tracing::error!("Internal error: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

fn not_found(what: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("{} not found", what))
}

fn hub_error(e: HubError) -> (StatusCode, String) {
    match e {
        HubError::Storage(e) => internal_error(e),
        other => {
            tracing::warn!("Hub request failed: {}", other);
            (StatusCode::BAD_GATEWAY, other.to_string())
        }
    }
}

fn find_user(state: &AppState, username: &str) -> ApiResult<User> {
    state
        .db
        .get_user_by_username(username)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("User"))
}

fn find_feed_type(state: &AppState, slug: &str) -> ApiResult<FeedType> {
    state
        .db
        .get_feed_type_by_slug(slug)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Feed type"))
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Aggregator
// ============================================================

pub async fn list_feed_types(State(state): State<AppState>) -> ApiResult<Json<Vec<FeedType>>> {
    state
        .db
        .get_all_feed_types()
        .map(Json)
        .map_err(internal_error)
}

#[derive(Debug, Serialize)]
pub struct FeedListResponse {
    pub feed_type: FeedType,
    #[serde(flatten)]
    pub page: Page<FeedItemWithFeed>,
}

pub async fn feed_list(
    State(state): State<AppState>,
    Path(feed_type_slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<FeedListResponse>> {
    let feed_type = find_feed_type(&state, &feed_type_slug)?;
    let items = state
        .db
        .get_approved_items_by_type(feed_type.id, None)
        .map_err(internal_error)?;

    Ok(Json(FeedListResponse {
        feed_type,
        page: paginate(items, query.requested(), FEED_ITEMS_PER_PAGE),
    }))
}

pub async fn add_feed(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(feed_type_slug): Path<String>,
    Json(input): Json<SelfAddFeedInput>,
) -> ApiResult<(StatusCode, Json<Feed>)> {
    find_feed_type(&state, &feed_type_slug)?;

    let feed = state
        .db
        .self_add_feed(&feed_type_slug, user.id, input)
        .map_err(internal_error)?;
    tracing::info!(feed = %feed.feed_url, owner = %user.username, "Feed submitted for approval");
    Ok((StatusCode::CREATED, Json(feed)))
}

// ============================================================
// RSS
// ============================================================

fn rss_response(channel: &Channel, items: &[FeedItemWithFeed]) -> ApiResult<Response> {
    let xml = syndication::render_rss(channel, items).map_err(internal_error)?;
    Ok(([(header::CONTENT_TYPE, RSS_CONTENT_TYPE)], xml).into_response())
}

pub async fn feed_type_rss(
    State(state): State<AppState>,
    Path(feed_type_slug): Path<String>,
) -> ApiResult<Response> {
    let feed_type = find_feed_type(&state, &feed_type_slug)?;
    let items = state
        .db
        .get_approved_items_by_type(feed_type.id, Some(FEED_TYPE_LIMIT))
        .map_err(internal_error)?;
    rss_response(&Channel::for_feed_type(&feed_type, &state.config.site_url), &items)
}

pub async fn firehose_rss(State(state): State<AppState>) -> ApiResult<Response> {
    let items = state
        .db
        .get_approved_items(Some(FIREHOSE_LIMIT))
        .map_err(internal_error)?;
    rss_response(&Channel::firehose(&state.config.site_url), &items)
}

// ============================================================
// PubSubHubbub subscriber
// ============================================================

pub async fn verify_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<VerifyParams>,
) -> ApiResult<String> {
    push::verify_intent(&state.db, id, &params)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Subscription"))
}

pub async fn receive_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("X-Hub-Signature")
        .and_then(|v| v.to_str().ok());

    match push::receive_content(&state.db, id, signature, &body).map_err(internal_error)? {
        Some(Delivery::Stored(count)) => {
            tracing::debug!(%id, count, "Notification processed");
            Ok(StatusCode::OK)
        }
        // Acknowledged so the hub does not retry
        Some(_) => Ok(StatusCode::OK),
        None => Err(not_found("Subscription")),
    }
}

// ============================================================
// Profiles and activity
// ============================================================

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<User>>> {
    let users = state.db.get_active_users().map_err(internal_error)?;
    Ok(Json(paginate(users, query.requested(), USERS_PER_PAGE)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<UserProfile>> {
    state
        .db
        .get_profile(&username)
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found("User"))
}

#[derive(Debug, Serialize)]
pub struct RelatedUsersResponse {
    pub user: User,
    pub relationship: Relationship,
    #[serde(flatten)]
    pub page: Page<User>,
}

pub async fn related_users(
    State(state): State<AppState>,
    Path((username, relationship)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<RelatedUsersResponse>> {
    let relationship =
        Relationship::from_str(&relationship).ok_or_else(|| not_found("Relationship"))?;
    let user = find_user(&state, &username)?;
    let users = state
        .db
        .get_related_users(user.id, relationship)
        .map_err(internal_error)?;

    Ok(Json(RelatedUsersResponse {
        user,
        relationship,
        page: paginate(users, query.requested(), USERS_PER_PAGE),
    }))
}

pub async fn actor_actions(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<Action>>> {
    let user = find_user(&state, &username)?;
    state
        .db
        .get_actor_actions(user.id)
        .map(Json)
        .map_err(internal_error)
}

pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<Action>>> {
    state
        .db
        .get_dashboard_actions(user.id)
        .map(Json)
        .map_err(internal_error)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowResponse {
    pub following: bool,
    pub following_since: Option<chrono::DateTime<chrono::Utc>>,
    pub followers_count: u64,
}

fn follow_state(state: &AppState, user: &User, target: &User) -> ApiResult<Json<FollowResponse>> {
    let follow = state
        .db
        .get_follow(user.id, target.id)
        .map_err(internal_error)?;
    Ok(Json(FollowResponse {
        following: follow.is_some(),
        following_since: follow.map(|f| f.started_at),
        followers_count: state.db.count_followers(target.id).map_err(internal_error)?,
    }))
}

pub async fn follow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<Json<FollowResponse>> {
    let target = find_user(&state, &username)?;
    if state.db.follow(user.id, target.id).map_err(internal_error)? {
        tracing::info!(user = %user.username, target = %target.username, "Started following");
    }
    follow_state(&state, &user, &target)
}

pub async fn unfollow(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(username): Path<String>,
) -> ApiResult<Json<FollowResponse>> {
    let target = find_user(&state, &username)?;
    state
        .db
        .unfollow(user.id, target.id)
        .map_err(internal_error)?;
    follow_state(&state, &user, &target)
}

// ============================================================
// Projects
// ============================================================

/// A project the viewer may see. Drafts of other members read as missing.
fn find_project(state: &AppState, slug: &str, viewer: Option<&User>) -> ApiResult<Project> {
    state
        .db
        .get_project_by_slug(slug)
        .map_err(internal_error)?
        .filter(|project| project.is_visible_to(viewer.map(|u| u.id)))
        .ok_or_else(|| not_found("Project"))
}

/// A project the viewer may change: 404 when hidden, 403 when not theirs.
fn find_own_project(state: &AppState, slug: &str, user: &User) -> ApiResult<Project> {
    let project = find_project(state, slug, Some(user))?;
    if project.owner_id != user.id {
        tracing::warn!(user = %user.username, project = %project.slug, "Refused edit of another member's project");
        return Err((
            StatusCode::FORBIDDEN,
            "Only the owner may change this project".to_string(),
        ));
    }
    Ok(project)
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Project>>> {
    let projects = state.db.get_published_projects().map_err(internal_error)?;
    Ok(Json(paginate(projects, query.requested(), PROJECTS_PER_PAGE)))
}

pub async fn create_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<CreateProjectInput>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state
        .db
        .create_project(user.id, input)
        .map_err(internal_error)?;
    tracing::info!(project = %project.slug, owner = %user.username, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    viewer: Option<CurrentUser>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Project>> {
    let viewer = viewer.map(|CurrentUser(user)| user);
    find_project(&state, &slug, viewer.as_ref()).map(Json)
}

pub async fn update_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
    Json(input): Json<UpdateProjectInput>,
) -> ApiResult<Json<Project>> {
    let project = find_own_project(&state, &slug, &user)?;
    state
        .db
        .update_project(&project.slug, input)
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found("Project"))
}

pub async fn delete_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    let project = find_own_project(&state, &slug, &user)?;
    state
        .db
        .delete_project(project.id)
        .map_err(internal_error)?;
    tracing::info!(project = %project.slug, owner = %user.username, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// A member's projects; their own drafts are included when they look.
pub async fn user_projects(
    State(state): State<AppState>,
    viewer: Option<CurrentUser>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<Project>>> {
    let owner = find_user(&state, &username)?;
    let own = viewer.is_some_and(|CurrentUser(user)| user.id == owner.id);
    state
        .db
        .get_user_projects(owner.id, own)
        .map(Json)
        .map_err(internal_error)
}

// ============================================================
// Accounts
// ============================================================

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

/// Only same-site paths are honoured as a post-login destination.
///
/// Browsers treat `\` like `/`, so `/\host` is as off-site as `//host`.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if is_local_path(path) => path,
        _ => DEFAULT_LOGIN_REDIRECT,
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.chars().any(|c| c.is_control() || c == '\\')
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    let ip = client_ip(&headers);
    if state.access.login_locked(ip) {
        tracing::warn!(%ip, username = %form.username, "Login refused after repeated failures");
        return Err((StatusCode::TOO_MANY_REQUESTS, TOO_MANY_LOGINS.to_string()));
    }

    let Some(user) = state
        .db
        .authenticate(&form.username, &form.password)
        .map_err(internal_error)?
    else {
        state.access.record_failed_login(ip);
        tracing::info!(%ip, username = %form.username, "Failed login");
        return Ok(Json(serde_json::json!({ "error": INVALID_LOGIN })).into_response());
    };

    let ttl = chrono::Duration::days(state.config.session_days);
    let token = state
        .db
        .create_login_session(user.id, ttl)
        .map_err(internal_error)?;

    let cookie = format!(
        "{SESSION_COOKIE}={token}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        ttl.num_seconds()
    );
    let mut response = found(safe_next(form.next.as_deref()));
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie.parse().map_err(|_| {
            internal_error(anyhow::anyhow!("Session cookie is not a valid header value"))
        })?,
    );
    tracing::info!(username = %user.username, "Logged in");
    Ok(response)
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = session_token(&headers) {
        state
            .db
            .delete_login_session(token)
            .map_err(internal_error)?;
    }

    let expired = format!("{SESSION_COOKIE}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0");
    let mut response = found("/");
    response.headers_mut().insert(
        header::SET_COOKIE,
        expired.parse().map_err(|_| {
            internal_error(anyhow::anyhow!("Session cookie is not a valid header value"))
        })?,
    );
    Ok(response)
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUserInput>,
) -> ApiResult<(StatusCode, Json<User>)> {
    state
        .db
        .create_user(input)
        .map(|u| (StatusCode::CREATED, Json(u)))
        .map_err(internal_error)
}

// ============================================================
// Admin: feeds
// ============================================================

#[derive(Debug, Deserialize)]
pub struct FeedFilter {
    pub status: Option<String>,
}

pub async fn admin_list_feeds(
    State(state): State<AppState>,
    Query(filter): Query<FeedFilter>,
) -> ApiResult<Json<Vec<Feed>>> {
    let feeds = match filter.status.as_deref() {
        None | Some("") => state.db.get_all_feeds(),
        Some(name) => {
            let status = ApprovalStatus::from_name(name).ok_or_else(|| {
                internal_error(ValidationError::UnknownApprovalStatus(name.to_string()).into())
            })?;
            state.db.get_feeds_by_status(status)
        }
    };
    feeds.map(Json).map_err(internal_error)
}

pub async fn admin_create_feed(
    State(state): State<AppState>,
    Json(input): Json<CreateFeedInput>,
) -> ApiResult<(StatusCode, Json<Feed>)> {
    state
        .db
        .create_feed(input)
        .map(|f| (StatusCode::CREATED, Json(f)))
        .map_err(internal_error)
}

pub async fn admin_update_feed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateFeedInput>,
) -> ApiResult<Json<Feed>> {
    state
        .db
        .update_feed(id, input)
        .map_err(internal_error)?
        .map(Json)
        .ok_or_else(|| not_found("Feed"))
}

pub async fn admin_delete_feed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.db.delete_feed(id).map_err(internal_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Feed"))
    }
}

pub async fn admin_set_approval(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<SetApprovalInput>,
) -> ApiResult<Json<Feed>> {
    let feed = state
        .db
        .set_approval_status(id, input.approval_status)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Feed"))?;
    tracing::info!(feed = %feed.feed_url, status = ?feed.approval_status, "Approval status changed");
    Ok(Json(feed))
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeInput {
    pub hub: Option<String>,
}

pub async fn admin_subscribe_feed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    input: Option<Json<SubscribeInput>>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let feed = state
        .db
        .get_feed(id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Feed"))?;
    let hub = input.and_then(|Json(input)| input.hub);

    state
        .hub
        .subscribe(&state.db, &feed.feed_url, hub.as_deref())
        .await
        .map(|s| (StatusCode::ACCEPTED, Json(s)))
        .map_err(hub_error)
}

// ============================================================
// Admin: feed types
// ============================================================

pub async fn admin_create_feed_type(
    State(state): State<AppState>,
    Json(input): Json<CreateFeedTypeInput>,
) -> ApiResult<(StatusCode, Json<FeedType>)> {
    state
        .db
        .create_feed_type(input)
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(internal_error)
}

pub async fn admin_delete_feed_type(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<StatusCode> {
    let feed_type = find_feed_type(&state, &slug)?;
    if state
        .db
        .delete_feed_type(feed_type.id)
        .map_err(internal_error)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Feed type"))
    }
}

// ============================================================
// Admin: users and groups
// ============================================================

pub async fn admin_create_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUserInput>,
) -> ApiResult<(StatusCode, Json<User>)> {
    state
        .db
        .create_user(input)
        .map(|u| (StatusCode::CREATED, Json(u)))
        .map_err(internal_error)
}

pub async fn admin_set_user_active(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(input): Json<SetActiveInput>,
) -> ApiResult<Json<User>> {
    let user = find_user(&state, &username)?;
    state
        .db
        .set_user_active(user.id, input.is_active)
        .map_err(internal_error)?;

    Ok(Json(User {
        is_active: input.is_active,
        ..user
    }))
}

pub async fn admin_add_group_member(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<GroupMemberInput>,
) -> ApiResult<Json<Group>> {
    let user = find_user(&state, &input.username)?;
    state
        .db
        .add_user_to_group(&name, user.id)
        .map(Json)
        .map_err(internal_error)
}

// ============================================================
// Admin: notifications
// ============================================================

pub async fn admin_notify_pending(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let notifier =
        PendingApprovalNotifier::new(state.db.clone(), state.mailer.clone(), state.config.clone());
    let sent = notifier.run().await.map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "sent": sent })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_become_bad_request() {
        let (status, msg) = internal_error(ValidationError::CannotFollowSelf.into());
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(msg, "Users cannot follow themselves");
    }

    #[test]
    fn other_errors_are_hidden() {
        let (status, msg) = internal_error(anyhow::anyhow!("disk I/O error at /var/db"));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(msg, "Internal server error");
    }

    #[test]
    fn next_must_be_a_local_path() {
        assert_eq!(safe_next(Some("/users/")), "/users/");
        assert_eq!(safe_next(Some("//evil.example/")), DEFAULT_LOGIN_REDIRECT);
        assert_eq!(safe_next(Some("https://evil.example/")), DEFAULT_LOGIN_REDIRECT);
        assert_eq!(safe_next(None), DEFAULT_LOGIN_REDIRECT);
    }

    #[test]
    fn next_rejects_backslash_and_control_tricks() {
        assert_eq!(safe_next(Some("/\\evil.example/")), DEFAULT_LOGIN_REDIRECT);
        assert_eq!(safe_next(Some("/users\\..\\x")), DEFAULT_LOGIN_REDIRECT);
        assert_eq!(safe_next(Some("/\t/evil.example/")), DEFAULT_LOGIN_REDIRECT);
        assert_eq!(safe_next(Some("/users/\r\nSet-Cookie: x=1")), DEFAULT_LOGIN_REDIRECT);
        assert_eq!(safe_next(Some("/users/?page=2")), "/users/?page=2");
    }
}
