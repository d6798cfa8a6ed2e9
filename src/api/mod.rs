mod handlers;
mod middleware;
mod session;

use std::sync::Arc;

use axum::{
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::AllowOrigin, cors::CorsLayer, trace::TraceLayer};

use crate::config::{AccessSettings, Config};
use crate::db::Database;
use crate::notify::Mailer;
use crate::push::HubClient;

pub use middleware::{AccessControl, Throttle};
pub use session::{CurrentUser, LOGIN_PATH};

/// Everything handlers need, shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
    pub hub: HubClient,
    pub access: AccessControl,
}

impl AppState {
    pub fn new(db: Database, config: Config, mailer: Arc<dyn Mailer>) -> Self {
        let hub = HubClient::new(config.push.clone(), config.site_url.clone());
        let access = AccessControl::from_settings(&config.access);
        Self {
            db,
            config: Arc::new(config),
            mailer,
            hub,
            access,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        // Aggregator
        .route("/community/blogs/", get(handlers::list_feed_types))
        .route("/community/blogs/{feed_type_slug}/", get(handlers::feed_list))
        .route("/community/blogs/{feed_type_slug}/add/", post(handlers::add_feed))
        .route("/rss/community/blogs/firehose/", get(handlers::firehose_rss))
        .route("/rss/community/blogs/{feed_type_slug}/", get(handlers::feed_type_rss))
        // PubSubHubbub callbacks
        .route(
            "/subscriber/{id}/",
            get(handlers::verify_subscription).post(handlers::receive_notification),
        )
        // Profiles and activity
        .route("/users/", get(handlers::list_users))
        .route("/dashboard/", get(handlers::dashboard))
        .route("/accounts/profile/{username}/", get(handlers::get_profile))
        .route("/accounts/profile/{username}/actions/", get(handlers::actor_actions))
        .route("/accounts/profile/{username}/projects/", get(handlers::user_projects))
        .route("/accounts/profile/{username}/follow/", post(handlers::follow))
        .route("/accounts/profile/{username}/unfollow/", post(handlers::unfollow))
        .route(
            "/accounts/profile/{username}/{relationship}/",
            get(handlers::related_users),
        )
        // Projects
        .route(
            "/projects/",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{slug}/",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        // Accounts
        .route("/accounts/login/", post(handlers::login))
        .route("/accounts/logout/", post(handlers::logout))
        .route("/accounts/register/", post(handlers::register))
        // Health
        .route("/health", get(handlers::health));

    let admin = Router::new()
        .route("/feeds", get(handlers::admin_list_feeds).post(handlers::admin_create_feed))
        .route(
            "/feeds/{id}",
            put(handlers::admin_update_feed).delete(handlers::admin_delete_feed),
        )
        .route("/feeds/{id}/approval", put(handlers::admin_set_approval))
        .route("/feeds/{id}/subscribe", post(handlers::admin_subscribe_feed))
        .route("/feed-types", post(handlers::admin_create_feed_type))
        .route("/feed-types/{slug}", delete(handlers::admin_delete_feed_type))
        .route("/users", post(handlers::admin_create_user))
        .route("/users/{username}/active", put(handlers::admin_set_user_active))
        .route("/groups/{name}/members", post(handlers::admin_add_group_member))
        .route("/notify-pending", post(handlers::admin_notify_pending))
        .layer(from_fn_with_state(state.clone(), middleware::require_moderator));

    Router::new()
        .merge(public)
        .nest("/admin", admin)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.access)),
        )
        .with_state(state)
}

fn cors_layer(access: &AccessSettings) -> CorsLayer {
    match &access.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(origins))
        }
        None => CorsLayer::permissive(),
    }
}
