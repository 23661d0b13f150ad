use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use huddle_gateway::auth::Identity;
use huddle_types::api::{
    EditMessageRequest, MarkReadRequest, MarkReadResponse, MessageQuery, SendMessageRequest,
};
use huddle_types::events::ServerEvent;
use crate::AppState;
use crate::error::ApiError;

const MAX_PAGE: u32 = 100;

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let limit = query.limit.clamp(1, MAX_PAGE);
    let messages = state
        .store
        .call(move |db| db.get_messages(room_id, user, query.before, limit))
        .await?;
    Ok(Json(messages))
}

/// Same semantics and fan-out as the `send_message` socket command.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let message = state
        .store
        .call(move |db| db.send_request(room_id, user, req))
        .await?;

    state.registry.deliver_message(message.clone()).await;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let ids = req.message_ids.clone();
    let receipts_created = state
        .store
        .call(move |db| db.mark_read(room_id, user, ids.as_deref()))
        .await?;

    state
        .registry
        .broadcast_to_room(
            room_id,
            ServerEvent::MessageReadReceipt {
                room_id,
                user_id: user,
                message_ids: req.message_ids.unwrap_or_default(),
            },
            Some(user),
        )
        .await;

    Ok(Json(MarkReadResponse { receipts_created }))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let message = state
        .store
        .call(move |db| db.get_message(message_id, user))
        .await?;
    Ok(Json(message))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let message = state
        .store
        .call(move |db| db.edit_message(message_id, user, &req.content))
        .await?;

    state
        .registry
        .broadcast_to_room(message.room_id, ServerEvent::MessageEdited(message.clone()), Some(user))
        .await;
    Ok(Json(message))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let room_id = state
        .store
        .call(move |db| db.delete_message(message_id, user))
        .await?;

    state
        .registry
        .broadcast_to_room(
            room_id,
            ServerEvent::MessageDeleted {
                room_id,
                message_id,
            },
            Some(user),
        )
        .await;
    Ok(StatusCode::NO_CONTENT)
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
    async fn rest_send_fans_out_to_subscribers() {
        let app = app();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = app.db.get_or_create_direct_room(a, b).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        app.state.registry.register(b, Uuid::new_v4(), tx).await;
        app.state.registry.subscribe(b, room.id).await;

        let (status, sent) = app
            .request(
                "POST",
                &format!("/rooms/{}/messages", room.id),
                Some(a),
                Some(json!({"content": "from the web"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        match rx.try_recv().unwrap() {
            ServerEvent::NewMessage(m) => assert_eq!(json!(m.id), sent["id"]),
            other => panic!("unexpected event: {:?}", other),
        }

        let (status, body) = app
            .request(
                "POST",
                &format!("/rooms/{}/messages", room.id),
                Some(a),
                Some(json!({"message_type": "image", "media_urls": []})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("media url"));

        let (status, _) = app
            .request(
                "POST",
                &format!("/rooms/{}/messages", room.id),
                Some(Uuid::new_v4()),
                Some(json!({"message_type": "image", "media_urls": []})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request(
                "POST",
                &format!("/rooms/{}/messages", room.id),
                Some(a),
                Some(json!({"content": "plain", "media_urls": null})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn history_read_and_edits() {
        let app = app();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = app.db.get_or_create_direct_room(a, b).unwrap();
        for i in 0..3 {
            app.db
                .send_message(room.id, a, NewMessage::text(format!("m{}", i)).unwrap())
                .unwrap();
        }

        let (status, page) = app
            .request("GET", &format!("/rooms/{}/messages?limit=2", room.id), Some(b), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let page = page.as_array().unwrap().clone();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0]["content"], "m1");
        assert_eq!(page[1]["content"], "m2");

        let oldest = page[0]["id"].as_str().unwrap();
        let (_, older) = app
            .request(
                "GET",
                &format!("/rooms/{}/messages?before={}", room.id, oldest),
                Some(b),
                None,
            )
            .await;
        assert_eq!(older.as_array().unwrap().len(), 1);

        let (status, read) = app
            .request("POST", &format!("/rooms/{}/read", room.id), Some(b), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["receipts_created"], 3);
        assert_eq!(app.db.unread_count(room.id, b).unwrap(), 0);

        let target = page[1]["id"].as_str().unwrap();
        let (status, _) = app
            .request("PATCH", &format!("/messages/{}", target), Some(b), Some(json!({"content": "x"})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, edited) = app
            .request("PATCH", &format!("/messages/{}", target), Some(a), Some(json!({"content": "m2!"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["content"], "m2!");

        let (status, _) = app
            .request("DELETE", &format!("/messages/{}", target), Some(a), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, fetched) = app
            .request("GET", &format!("/messages/{}", target), Some(b), None)
            .await;
        assert_eq!(fetched["is_deleted"], true);
        assert!(fetched["content"].is_null());

        let (status, _) = app
            .request("GET", &format!("/messages/{}", Uuid::new_v4()), Some(b), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
