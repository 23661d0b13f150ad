use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::Gateway;
use crate::auth::{AUTH_FAILED_CLOSE_CODE, AUTH_FAILED_REASON, AuthError, Identity};
use crate::session::Session;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// `GET /gateway`: upgrade, then authenticate. A bad credential gets the
/// socket closed with 4001 before any registry state exists.
pub async fn upgrade(
    State(gateway): State<Gateway>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.or_else(|| bearer_token(&headers));
    let verified = match token {
        Some(token) => gateway.verifier.verify(&token),
        None => Err(AuthError::Missing),
    };

    ws.on_upgrade(move |socket| async move {
        match verified {
            Ok(identity) => handle_connection(socket, gateway, identity).await,
            Err(e) => {
                warn!("rejecting gateway connection: {}", e);
                reject(socket).await;
            }
        }
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: AUTH_FAILED_CLOSE_CODE,
        reason: AUTH_FAILED_REASON.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Run an authenticated connection until the client goes away or stops
/// answering pings.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, identity: Identity) {
    let heartbeat_interval = gateway.heartbeat;
    let (mut sender, mut receiver) = socket.split();
    let (session, mut outbox_rx) = Session::open(gateway, identity).await;
    let session = Arc::new(session);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbound: session events -> socket, plus the heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbox_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("failed to encode {} event: {}", event.kind(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound: frames are handled one at a time, in arrival order.
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_session.handle_text(text.as_str()).await,
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                Message::Binary(_) => {
                    debug!("ignoring binary frame from {}", recv_session.user_id());
                }
                Message::Ping(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session.close().await;
}
