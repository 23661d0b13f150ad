pub mod config;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use huddle_api::{AppStateInner, routes};
use huddle_db::Database;
use huddle_gateway::auth::JwtVerifier;
use huddle_gateway::connection;
use huddle_gateway::presence::PresenceTracker;
use huddle_gateway::registry::Registry;
use huddle_gateway::store::ChatStore;
use huddle_gateway::Gateway;

use crate::config::Config;

/// Wire the store, registry and collaborators into the full HTTP app:
/// REST routes plus the `/gateway` WebSocket endpoint.
pub fn app(db: Arc<Database>, config: &Config) -> Router {
    let store = ChatStore::new(db.clone(), config.store_timeout);
    let registry = Registry::new();
    let presence = PresenceTracker::new(store.clone(), registry.clone(), db.clone());

    let gateway = Gateway {
        registry,
        store,
        presence,
        verifier: Arc::new(JwtVerifier::new(&config.jwt_secret)),
        heartbeat: config.heartbeat,
    };
    let api_state = Arc::new(AppStateInner::new(&gateway, db.clone(), db));

    let ws_route = Router::new()
        .route("/gateway", get(connection::upgrade))
        .with_state(gateway);

    Router::new()
        .merge(routes(api_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
