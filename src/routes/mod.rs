use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod attachments;
pub mod auth;
pub mod categories;
pub mod comments;
pub mod health;
pub mod tickets;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let tickets_routes = Router::new()
        .route("/", get(tickets::list_tickets).post(tickets::create_ticket))
        .route("/stats", get(tickets::ticket_stats))
        .route(
            "/:id",
            get(tickets::get_ticket)
                .put(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
        .route(
            "/:id/comments",
            get(tickets::list_ticket_comments).post(tickets::create_ticket_comment),
        )
        .route("/:id/attachments", post(attachments::upload_attachment));

    let comments_routes = Router::new().route(
        "/:id",
        put(comments::update_comment).delete(comments::delete_comment),
    );

    let categories_routes = Router::new()
        .route(
            "/",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/:id",
            put(categories::update_category).delete(categories::delete_category),
        );

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/agents", get(users::list_agents))
        .route(
            "/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        );

    let attachments_routes = Router::new().route(
        "/:id",
        get(attachments::download_attachment).delete(attachments::delete_attachment),
    );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/tickets", tickets_routes)
        .nest("/api/comments", comments_routes)
        .nest("/api/categories", categories_routes)
        .nest("/api/users", users_routes)
        .nest("/api/attachments", attachments_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 32))
}
