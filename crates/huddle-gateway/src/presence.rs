use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use huddle_db::ChatError;
use huddle_db::directory::SocialGraph;
use huddle_types::events::ServerEvent;
use huddle_types::models::Presence;

use crate::registry::Registry;
use crate::store::ChatStore;

/// Persists online/offline transitions and tells the user's friends.
#[derive(Clone)]
pub struct PresenceTracker {
    store: ChatStore,
    registry: Registry,
    graph: Arc<dyn SocialGraph>,
}

impl PresenceTracker {
    pub fn new(store: ChatStore, registry: Registry, graph: Arc<dyn SocialGraph>) -> Self {
        Self {
            store,
            registry,
            graph,
        }
    }

    pub async fn set_online(&self, user: Uuid) -> Result<Presence, ChatError> {
        self.transition(user, true).await
    }

    pub async fn set_offline(&self, user: Uuid) -> Result<Presence, ChatError> {
        self.transition(user, false).await
    }

    pub async fn get(&self, user: Uuid) -> Result<Presence, ChatError> {
        self.store.call(move |db| db.get_presence(user)).await
    }

    async fn transition(&self, user: Uuid, online: bool) -> Result<Presence, ChatError> {
        let presence = self
            .store
            .call(move |db| db.set_presence(user, online))
            .await?;

        let graph = self.graph.clone();
        let friends = self
            .store
            .run_blocking(move || graph.friends_of(user))
            .await?;

        let event = ServerEvent::UserStatusChange {
            user_id: user,
            is_online: presence.is_online,
            last_seen: presence.last_seen,
        };
        let mut reached = 0;
        for friend in friends {
            reached += self.registry.send_to_user(friend, event.clone()).await;
        }
        debug!(
            "{} is now {} ({} friend connections notified)",
            user,
            if online { "online" } else { "offline" },
            reached
        );

        Ok(presence)
    }
}
