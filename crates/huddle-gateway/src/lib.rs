pub mod auth;
pub mod connection;
pub mod presence;
pub mod registry;
pub mod session;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use auth::IdentityVerifier;
use presence::PresenceTracker;
use registry::Registry;
use store::ChatStore;

/// Everything a connection needs, shared across all connection tasks.
#[derive(Clone)]
pub struct Gateway {
    pub registry: Registry,
    pub store: ChatStore,
    pub presence: PresenceTracker,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Interval between server pings. Two unanswered pings drop the socket.
    pub heartbeat: Duration,
}
