use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tracing::debug;

use muse_gateway::connection;

use crate::auth::{self, AppState};
use crate::error::ApiError;
use crate::middleware::{optional_auth, require_admin, require_auth, resolve_user};
use crate::storage::MAX_IMAGE_SIZE;
use crate::{admin, chat, invitations, models, payments, photos};

/// The whole HTTP surface. Routes sharing a path but not an auth policy
/// live in separate routers and are merged at the end.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/admin-register", post(auth::admin_register))
        .route("/auth/check_invitation/{email}/{code}", get(invitations::check_invitation))
        .route(
            "/payments/create_signup_payment_intent",
            post(payments::create_signup_payment_intent),
        )
        .route(
            "/payments/create_photo_payment_intent",
            post(payments::create_photo_payment_intent),
        )
        .route(
            "/payments/create_signup_payment_complete",
            post(payments::create_signup_payment_complete),
        )
        .route(
            "/payments/create_photo_payment_complete",
            post(payments::create_photo_payment_complete),
        )
        .route("/payments/checkout/photo/{photo_id}", post(payments::checkout_photo))
        .route("/payments/checkout/signup", post(payments::checkout_signup))
        .route("/payments/webhook", post(payments::webhook))
        .route("/payments/verify/{session_id}", get(payments::verify_payment))
        .route("/payments/check_status/{email}/{photo_id}", get(payments::check_status))
        .route("/models", get(models::list_models))
        .route("/gateway", get(ws_upgrade));

    let viewer_routes = Router::new()
        .route("/models/{id}", get(models::get_model))
        .route("/models/{id}/photos", get(photos::list_photos))
        .route("/models/{id}/photos/{photo_id}", get(photos::get_photo))
        .route_layer(from_fn_with_state(state.clone(), optional_auth));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/invite", post(invitations::invite))
        .route("/auth/invitations", get(invitations::list_mine))
        .route("/models/{id}", put(models::update_profile))
        .route(
            "/models/{id}/profile-photo",
            post(models::upload_profile_photo)
                .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE))
                .delete(models::delete_profile_photo),
        )
        .route("/models/{id}/update-password", post(models::update_password))
        .route(
            "/models/{id}/photos",
            post(photos::upload_photo).layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE)),
        )
        .route(
            "/models/{id}/photos/{photo_id}",
            put(photos::update_photo).delete(photos::delete_photo),
        )
        .route("/photos/{photo_id}/original", get(photos::get_original))
        .route("/visitors/me/unlocked-photos", get(photos::my_unlocked_photos))
        .route("/chat/conversations", get(chat::list_conversations))
        .route(
            "/chat/conversations/{id}",
            get(chat::get_conversation)
                .post(chat::start_conversation)
                .delete(chat::delete_conversation),
        )
        .route("/chat/messages", post(chat::send_message))
        .route("/chat/messages/read", post(chat::mark_read))
        .route("/chat/messages/unread", get(chat::unread_count))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route("/admin/models", get(admin::list_models))
        .route("/admin/models/{id}", delete(admin::delete_model))
        .route("/admin/models/{id}/photos", get(admin::list_model_photos))
        .route("/admin/visitors", get(admin::list_visitors).post(admin::create_visitor))
        .route("/admin/visitors/{id}", delete(admin::delete_visitor))
        .route(
            "/admin/invitations",
            get(admin::list_invitations).post(admin::create_invitation),
        )
        .route("/admin/invitations/{id}", delete(admin::delete_invitation))
        .route("/admin/donations", get(admin::list_donations))
        .route("/admin/statistics", get(admin::statistics))
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let uploads = state.storage.root().to_path_buf();

    Router::new()
        .merge(public_routes)
        .merge(viewer_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .nest_service("/uploads/profiles", ServeDir::new(uploads.join("profiles")))
        .nest_service("/uploads/blurred", ServeDir::new(uploads.join("blurred")))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    #[serde(default)]
    pub token: String,
}

/// GET /gateway?token=... The token is checked before the upgrade so a bad
/// one gets a plain 401 instead of a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let user = resolve_user(&state, &query.token).await?;
    debug!("Gateway upgrade for {}", user.username);

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, db, user.id, user.username)
    }))
}
