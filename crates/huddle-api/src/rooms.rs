use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use huddle_db::ChatError;
use huddle_gateway::auth::Identity;
use huddle_types::api::{
    AddParticipantRequest, CreateDirectRoomRequest, CreateGroupRoomRequest, RoomListQuery,
    UpdatePreferencesRequest,
};
use huddle_types::models::RoomDetail;

use crate::AppState;
use crate::error::ApiError;

const MAX_PAGE: u32 = 100;

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<RoomListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let limit = query.limit.clamp(1, MAX_PAGE);
    let rooms = state
        .store
        .call(move |db| db.list_rooms_for_user(user, query.skip, limit))
        .await?;
    Ok(Json(rooms))
}

/// Open (or reopen) the direct room with another user. Only allowed
/// between friends that have not blocked each other.
pub async fn create_direct_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateDirectRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let other = req.user_id;
    if user == other {
        return Err(ChatError::validation("cannot open a direct room with yourself").into());
    }

    let graph = state.graph.clone();
    let allowed = state
        .store
        .run_blocking(move || graph.can_message(user, other))
        .await?;
    if !allowed {
        return Err(ChatError::Authorization("you can only message friends".into()).into());
    }

    let room = state
        .store
        .call(move |db| db.get_or_create_direct_room(user, other))
        .await?;
    Ok(Json(room))
}

pub async fn create_group_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateGroupRoomRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let room = state
        .store
        .call(move |db| db.create_group_room(user, &req))
        .await?;

    info!("{} created group room {}", identity.username, room.id);
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn get_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let mut detail = state
        .store
        .call(move |db| db.get_room_detail(room_id, user))
        .await?;

    enrich_participants(&state, &mut detail).await;
    Ok(Json(detail))
}

/// Fill display names and avatars. Profiles are decoration; a failed
/// lookup leaves them empty.
async fn enrich_participants(state: &AppState, detail: &mut RoomDetail) {
    let ids: Vec<Uuid> = detail.participants.iter().map(|p| p.user_id).collect();
    let profiles = state.profiles.clone();

    match state.store.run_blocking(move || profiles.profiles(&ids)).await {
        Ok(mut found) => {
            for participant in &mut detail.participants {
                if let Some(profile) = found.remove(&participant.user_id) {
                    participant.display_name = profile.display_name;
                    participant.avatar_url = profile.avatar_url;
                }
            }
        }
        Err(e) => warn!("profile lookup failed for room {}: {}", detail.room.id, e),
    }
}

pub async fn add_participant(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let added = state
        .store
        .call(move |db| db.add_participant(room_id, user, req.user_id))
        .await?;

    Ok(if added { StatusCode::CREATED } else { StatusCode::OK })
}

pub async fn leave_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    state
        .store
        .call(move |db| db.leave_room(room_id, user))
        .await?;
    state.registry.unsubscribe(user, room_id).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
    Json(req): Json<UpdatePreferencesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    let membership = state
        .store
        .call(move |db| db.update_preferences(room_id, user, req.muted, req.pinned))
        .await?;
    Ok(Json(membership))
}

pub async fn archive_room(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(room_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = identity.user_id;
    state
        .store
        .call(move |db| db.archive_room(room_id, user))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use huddle_db::directory::ContactStatus;
    use huddle_types::models::Profile;
    use serde_json::json;

    use super::*;
    use crate::test_support::app;

    #[tokio::test]
    async fn requires_credentials() {
        let app = app();
        let (status, body) = app.request("GET", "/rooms", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn direct_rooms_need_friendship() {
        let app = app();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (status, _) = app
            .request("POST", "/rooms/direct", Some(a), Some(json!({"user_id": b})))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        app.db.set_contact(a, b, ContactStatus::Accepted).unwrap();
        let (status, first) = app
            .request("POST", "/rooms/direct", Some(a), Some(json!({"user_id": b})))
            .await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = app
            .request("POST", "/rooms/direct", Some(b), Some(json!({"user_id": a})))
            .await;
        assert_eq!(first["id"], second["id"]);

        let (status, _) = app
            .request("POST", "/rooms/direct", Some(a), Some(json!({"user_id": a})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn group_detail_is_enriched() {
        let app = app();
        let (owner, member, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        app.db
            .upsert_profile(&Profile {
                user_id: member,
                display_name: Some("Mia".into()),
                avatar_url: Some("https://cdn.example/mia.png".into()),
            })
            .unwrap();

        let (status, room) = app
            .request(
                "POST",
                "/rooms/group",
                Some(owner),
                Some(json!({"name": "Run club", "participant_ids": [member]})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let room_id = room["id"].as_str().unwrap().to_string();

        let (status, detail) = app
            .request("GET", &format!("/rooms/{}", room_id), Some(owner), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let participants = detail["participants"].as_array().unwrap();
        assert_eq!(participants.len(), 2);
        assert_eq!(participants[0]["role"], "admin");
        let mia = participants
            .iter()
            .find(|p| p["user_id"] == json!(member))
            .unwrap();
        assert_eq!(mia["display_name"], "Mia");

        let (status, _) = app
            .request("GET", &format!("/rooms/{}", room_id), Some(outsider), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request(
                "POST",
                "/rooms/group",
                Some(owner),
                Some(json!({"name": "  ", "participant_ids": [member]})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn membership_management() {
        let app = app();
        let (owner, member, late) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (_, room) = app
            .request(
                "POST",
                "/rooms/group",
                Some(owner),
                Some(json!({"name": "Lifters", "participant_ids": [member]})),
            )
            .await;
        let room_id = room["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request(
                "POST",
                &format!("/rooms/{}/participants", room_id),
                Some(member),
                Some(json!({"user_id": late})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .request(
                "POST",
                &format!("/rooms/{}/participants", room_id),
                Some(owner),
                Some(json!({"user_id": late})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, prefs) = app
            .request(
                "PATCH",
                &format!("/rooms/{}/preferences", room_id),
                Some(late),
                Some(json!({"pinned": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(prefs["is_pinned"], true);

        let (status, _) = app
            .request("DELETE", &format!("/rooms/{}/participants/me", room_id), Some(late), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, rooms) = app.request("GET", "/rooms", Some(late), None).await;
        assert!(rooms.as_array().unwrap().is_empty());

        let (status, _) = app
            .request("POST", &format!("/rooms/{}/archive", room_id), Some(owner), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, rooms) = app.request("GET", "/rooms", Some(owner), None).await;
        assert!(rooms.as_array().unwrap().is_empty());
    }
}
