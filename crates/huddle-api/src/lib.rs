pub mod error;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod reactions;
pub mod rooms;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, patch, post},
};

use huddle_db::directory::{ProfileDirectory, SocialGraph};
use huddle_gateway::Gateway;
use huddle_gateway::auth::IdentityVerifier;
use huddle_gateway::presence::PresenceTracker;
use huddle_gateway::registry::Registry;
use huddle_gateway::store::ChatStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: ChatStore,
    pub registry: Registry,
    pub presence: PresenceTracker,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub graph: Arc<dyn SocialGraph>,
    pub profiles: Arc<dyn ProfileDirectory>,
}

impl AppStateInner {
    /// REST state sharing the gateway's registry, store and presence, so
    /// writes made over HTTP fan out to live sockets.
    pub fn new(
        gateway: &Gateway,
        graph: Arc<dyn SocialGraph>,
        profiles: Arc<dyn ProfileDirectory>,
    ) -> Self {
        Self {
            store: gateway.store.clone(),
            registry: gateway.registry.clone(),
            presence: gateway.presence.clone(),
            verifier: gateway.verifier.clone(),
            graph,
            profiles,
        }
    }
}

/// All authenticated REST routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/rooms", get(rooms::list_rooms))
        .route("/rooms/direct", post(rooms::create_direct_room))
        .route("/rooms/group", post(rooms::create_group_room))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/rooms/{room_id}/read", post(messages::mark_read))
        .route("/rooms/{room_id}/participants", post(rooms::add_participant))
        .route("/rooms/{room_id}/participants/me", delete(rooms::leave_room))
        .route("/rooms/{room_id}/preferences", patch(rooms::update_preferences))
        .route("/rooms/{room_id}/archive", post(rooms::archive_room))
        .route(
            "/messages/{message_id}",
            get(messages::get_message)
                .patch(messages::edit_message)
                .delete(messages::delete_message),
        )
        .route("/messages/{message_id}/reactions", post(reactions::add_reaction))
        .route(
            "/messages/{message_id}/reactions/{emoji}",
            delete(reactions::remove_reaction),
        )
        .route("/presence/{user_id}", get(presence::get_presence))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
