use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use huddle_gateway::auth::Identity;
use huddle_types::api::{ReactionRequest, ReactionResponse};
use huddle_types::events::ServerEvent;

use crate::AppState;
use crate::error::ApiError;

pub async fn add_reaction(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let emoji = req.emoji.trim().to_string();
    let (room_id, changed) = {
        let emoji = emoji.clone();
        state
            .store
            .call(move |db| db.react_to_message(message_id, user, &emoji))
            .await?
    };

    if changed {
        state
            .registry
            .broadcast_to_room(
                room_id,
                ServerEvent::ReactionAdded {
                    room_id,
                    message_id,
                    user_id: user,
                    emoji,
                },
                Some(user),
            )
            .await;
    }

    Ok(Json(ReactionResponse { changed }))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((message_id, emoji)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let emoji = emoji.trim().to_string();
    let (room_id, changed) = {
        let emoji = emoji.clone();
        state
            .store
            .call(move |db| db.remove_reaction(message_id, user, &emoji))
            .await?
    };

    if changed {
        state
            .registry
            .broadcast_to_room(
                room_id,
                ServerEvent::ReactionRemoved {
                    room_id,
                    message_id,
                    user_id: user,
                    emoji,
                },
                Some(user),
            )
            .await;
    }

    Ok(Json(ReactionResponse { changed }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use huddle_types::models::NewMessage;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::test_support::app;

    #[tokio::test]
    async fn reactions_are_idempotent_and_broadcast_once() {
        let app = app();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = app.db.get_or_create_direct_room(a, b).unwrap();
        let msg = app
            .db
            .send_message(room.id, a, NewMessage::text("new PR").unwrap())
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        app.state.registry.register(a, Uuid::new_v4(), tx).await;
        app.state.registry.subscribe(a, room.id).await;

        let uri = format!("/messages/{}/reactions", msg.id);
        let (status, first) = app
            .request("POST", &uri, Some(b), Some(json!({"emoji": "🔥"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["changed"], true);
        let (_, second) = app
            .request("POST", &uri, Some(b), Some(json!({"emoji": "🔥"})))
            .await;
        assert_eq!(second["changed"], false);

        assert!(matches!(rx.try_recv(), Ok(ServerEvent::ReactionAdded { .. })));
        assert!(rx.try_recv().is_err());

        let fetched = app.db.get_message(msg.id, a).unwrap();
        assert_eq!(fetched.reactions.len(), 1);
        assert_eq!(fetched.reactions[0].count, 1);

        let (_, removed) = app
            .request("DELETE", &format!("{}/%F0%9F%94%A5", uri), Some(b), None)
            .await;
        assert_eq!(removed["changed"], true);
        assert!(matches!(rx.try_recv(), Ok(ServerEvent::ReactionRemoved { .. })));

        let (status, _) = app
            .request("POST", &uri, Some(Uuid::new_v4()), Some(json!({"emoji": "🔥"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
