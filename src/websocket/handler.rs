use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::admission::AdmissionTicket;
use crate::error::AppError;
use crate::metrics::{RouterMetrics, WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION};
use crate::registry::{Connection, HandleId};
use crate::server::AppState;

use super::message::{close_code, ClientMessage, Outbound, ServerMessage};

const CHANNEL_BUFFER_SIZE: usize = 32;

/// Transport handle identities, unique per upgraded socket.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    pub scope: Option<String>,
}

/// WebSocket upgrade handler. Admission runs before the upgrade
/// completes, so a refused connection never reaches the registry.
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.token.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let token = extract_token(&query, &headers);
    let scope_claim = query.scope.clone().unwrap_or_default();

    let ticket = match state.admission.admit(token.as_deref(), &scope_claim) {
        Ok(ticket) => ticket,
        Err(e) => return AppError::from(e).into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, ticket))
}

/// Extract token from query parameter or Authorization header
fn extract_token(query: &WsQuery, headers: &HeaderMap) -> Option<String> {
    // First try query parameter
    if let Some(ref token) = query.token {
        return Some(token.clone());
    }

    // Then try Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, ticket),
    fields(scope = %ticket.scope)
)]
async fn handle_socket(socket: WebSocket, state: AppState, ticket: AdmissionTicket) {
    let handle_id: HandleId = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
    let connection_start = std::time::Instant::now();

    // Channel feeding this connection's transport writer
    let (tx, mut rx) = mpsc::channel::<Outbound>(CHANNEL_BUFFER_SIZE);

    let conn = Arc::new(Connection::new(
        ticket.scope,
        ticket.permissions,
        ticket.token_hash,
        handle_id,
        tx,
    ));

    // Second line of defense: the quota may have filled while the
    // upgrade was in flight
    if let Err(e) = state.registry.insert(conn.clone()) {
        state.admission.audit_insert_rejected(&conn, &e);
        let (mut ws_sender, _) = socket.split();
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: e.close_code(),
                reason: e.to_string().into(),
            })))
            .await;
        return;
    }
    conn.mark_open();
    WS_CONNECTIONS_OPENED.inc();

    // Recurring scope-filtered push; created only while Open
    state
        .scheduler
        .start(conn.clone(), state.registry.clone())
        .await;

    tracing::info!(
        connection_id = %conn.id,
        scope = %conn.scope,
        handle = handle_id,
        "WebSocket connection established"
    );

    // Split socket into sender and receiver
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task forwarding queued frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Message(msg) => {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Task routing messages received from the WebSocket
    let state_clone = state.clone();
    let recv_conn = conn.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &state_clone, &recv_conn).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %conn.id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %conn.id, "Receive task completed");
        }
    }

    // Transport gone or server-initiated close finished; both land on
    // the same teardown. A no-op when a sweep already closed us.
    state
        .registry
        .close(&conn, close_code::NORMAL, "connection closed")
        .await;

    WS_CONNECTIONS_CLOSED.inc();
    let duration = connection_start.elapsed().as_secs_f64();
    WS_CONNECTION_DURATION.observe(duration);

    tracing::info!(
        connection_id = %conn.id,
        scope = %conn.scope,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Route one received WebSocket frame.
/// Returns false if the connection should stop reading.
async fn process_message(msg: Message, state: &AppState, conn: &Arc<Connection>) -> bool {
    match msg {
        Message::Text(text) => {
            // Inbound traffic is resolved through the reverse handle
            // index; a missing entry means the registry and the transport
            // disagree, which is our bug, not the client's.
            let owner = match state.registry.by_handle(conn.handle) {
                Some(owner) => owner,
                None => {
                    tracing::error!(
                        handle = conn.handle,
                        "Inbound message for an unregistered handle"
                    );
                    RouterMetrics::record_desync();
                    let _ = conn.sender.try_send(Outbound::Close {
                        code: close_code::INTERNAL_DESYNC,
                        reason: "internal desync".to_string(),
                    });
                    return false;
                }
            };

            // Liveness is judged on inbound traffic, valid or not
            owner.touch();

            // Size policy runs strictly before any parse attempt
            let max = state.settings.realtime.max_message_size;
            if text.len() > max {
                RouterMetrics::record_oversize();
                tracing::warn!(
                    connection_id = %owner.id,
                    size = text.len(),
                    max,
                    "Oversized payload"
                );
                state
                    .registry
                    .close(&owner, close_code::MESSAGE_TOO_LARGE, "message too large")
                    .await;
                return false;
            }

            let client_msg = match ClientMessage::parse(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    RouterMetrics::record_malformed();
                    tracing::warn!(
                        connection_id = %owner.id,
                        error = %e,
                        "Failed to parse client message"
                    );
                    let _ = owner
                        .send(ServerMessage::error(format!("malformed message: {}", e)))
                        .await;
                    return true;
                }
            };

            handle_client_message(client_msg, state, &owner).await;
            true
        }
        Message::Binary(_) => {
            conn.touch();
            let _ = conn
                .send(ServerMessage::error("binary messages are not supported"))
                .await;
            true
        }
        Message::Ping(_) => {
            conn.touch();
            // Axum answers transport pings automatically
            true
        }
        Message::Pong(_) => {
            conn.touch();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %conn.id, "Received close frame");
            false
        }
    }
}

/// Handle a parsed client message
#[tracing::instrument(
    name = "ws.message",
    skip(state, conn),
    fields(
        connection_id = %conn.id,
        scope = %conn.scope,
        message_type = ?msg
    )
)]
async fn handle_client_message(msg: ClientMessage, state: &AppState, conn: &Arc<Connection>) {
    match msg {
        ClientMessage::Ping => {
            RouterMetrics::record_routed("ping");
            let _ = conn.send(ServerMessage::pong()).await;
        }
        ClientMessage::GetMetrics => {
            RouterMetrics::record_routed("get_metrics");
            // Ad-hoc snapshot; the scheduled broadcast timer is untouched
            let update = state.scheduler.snapshot_update(conn.scope).await;
            let _ = conn.send(update).await;
        }
        ClientMessage::Subscribe { categories } => {
            RouterMetrics::record_routed("subscribe");
            handle_subscribe(categories, state, conn).await;
        }
        ClientMessage::Unknown { kind } => {
            RouterMetrics::record_unknown_type();
            let _ = conn
                .send(ServerMessage::error(format!("unknown message type: {}", kind)))
                .await;
        }
    }
}

/// Record the requested category set and answer with the intersection of
/// the scope-visible snapshot and those categories.
async fn handle_subscribe(categories: Option<Vec<String>>, state: &AppState, conn: &Arc<Connection>) {
    let Some(categories) = categories else {
        let _ = conn
            .send(ServerMessage::error("subscribe requires a categories list"))
            .await;
        return;
    };

    {
        let mut subscriptions = conn.subscriptions.write().await;
        subscriptions.clear();
        subscriptions.extend(categories.iter().cloned());
    }

    let update = state
        .scheduler
        .subscription_update(conn.scope, &categories)
        .await;
    let _ = conn.send(update).await;

    tracing::debug!(
        connection_id = %conn.id,
        categories = ?categories,
        "Subscriptions updated"
    );
}
