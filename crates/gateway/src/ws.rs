//! WebSocket ingress: one connection per socket through its full
//! lifecycle: upgrade guard, message loop, presence cleanup.
//!
//! Client frames carry a `messageType` of `action`, `subscribe`, or
//! `unsubscribe` plus a `messageId` echoed on the reply. Broadcast frames
//! flow the other way with no `messageId`. A per-message error never tears
//! the socket down.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use {
    axum::{
        extract::{
            ConnectInfo, State, WebSocketUpgrade,
            ws::{CloseFrame, Message, WebSocket},
        },
        http::{HeaderMap, StatusCode, header, request::Parts},
        response::{IntoResponse, Response},
    },
    axum_extra::extract::CookieJar,
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use {
    axon_actions::RawParams,
    axon_common::{Error, ErrorKind},
    axon_connection::{BroadcastSink, Connection, ConnectionKind},
};

use crate::{http::client_identifier, state::ServerState};

/// Close code sent while draining (going-away).
const SHUTDOWN_CLOSE_CODE: u16 = 1001;

/// Delivers broadcast frames into the socket's write loop.
struct WsSink {
    tx: mpsc::UnboundedSender<String>,
}

impl BroadcastSink for WsSink {
    fn deliver(&self, payload: serde_json::Value) -> axon_common::Result<()> {
        let frame = serde_json::to_string(&payload)
            .map_err(|e| Error::wrap(ErrorKind::ConnectionServerError, e))?;
        self.tx
            .send(frame)
            .map_err(|_| Error::new(ErrorKind::ConnectionServerError, "socket write loop closed"))
    }
}

pub(crate) struct PeerAddr(pub(crate) Option<SocketAddr>);

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for PeerAddr {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0),
        ))
    }
}

pub async fn handle_upgrade(
    State(state): State<Arc<ServerState>>,
    peer: PeerAddr,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // Draining servers refuse new sockets so stop() can converge.
    if state.is_draining() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    // CSWSH guard: browsers always send Origin on upgrades.
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())
        && !state.origin_allowed(origin)
    {
        warn!(origin, "ws: origin refused");
        return StatusCode::FORBIDDEN.into_response();
    }

    let identifier = client_identifier(
        &state,
        &headers,
        peer.0.map(ConnectInfo).as_ref(),
    );
    let correlation_id = crate::http::correlation_id(&state, &headers);
    let cookie_id = CookieJar::from_headers(&headers)
        .get(&state.session.cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());

    ws.on_upgrade(move |socket| {
        handle_connection(socket, state, identifier, correlation_id, cookie_id)
    })
}

pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<ServerState>,
    identifier: String,
    correlation_id: Option<String>,
    cookie_id: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // Write loop: forwards frames from the channel to the socket.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        // Drain triggers a close frame through the same channel; closing
        // here covers the normal path.
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: SHUTDOWN_CLOSE_CODE,
                reason: "server shutting down".into(),
            })))
            .await;
    });

    let mut conn = Connection::new(ConnectionKind::WebSocket, identifier)
        .with_correlation_id(correlation_id)
        .with_sink(Arc::new(WsSink {
            tx: client_tx.clone(),
        }))
        .with_session_manager(Arc::clone(&state.sessions));
    if let Some(id) = cookie_id {
        conn = conn.with_id(id);
    }
    let conn = state.connections.register(Arc::new(conn));
    info!(conn_id = %conn.id, identifier = %conn.identifier, "ws: connected");

    // Tumbling one-second message budget.
    let budget = state.web.websocket.max_messages_per_second;
    let mut window_start = Instant::now();
    let mut window_count: u32 = 0;

    let shutdown = state.ws_shutdown.clone();
    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => {
                debug!(conn_id = %conn.id, "ws: shutdown close");
                break;
            },
            next = ws_rx.next() => match next {
                Some(Ok(Message::Text(text))) => text.to_string(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(conn_id = %conn.id, error = %e, "ws: read error");
                    break;
                },
            },
        };

        if window_start.elapsed().as_secs() >= 1 {
            window_start = Instant::now();
            window_count = 0;
        }
        window_count += 1;
        let frame: serde_json::Value = match serde_json::from_str(&message) {
            Ok(frame) => frame,
            Err(_) => {
                send_error(&client_tx, None, &Error::new(
                    ErrorKind::ConnectionServerError,
                    "invalid frame",
                ));
                continue;
            },
        };
        let message_id = frame.get("messageId").cloned();

        if window_count > budget {
            // Over budget: report and drop, keep the socket.
            send_error(&client_tx, message_id, &Error::new(
                ErrorKind::ConnectionRateLimited,
                "too many messages",
            ));
            continue;
        }

        match frame.get("messageType").and_then(|v| v.as_str()) {
            Some("action") => {
                let action = frame
                    .get("action")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let mut raw = RawParams::new();
                if let Some(params) = frame.get("params") {
                    raw.extend_from_object(params);
                }
                let result = state
                    .dispatcher
                    .dispatch(&conn, action.as_deref(), raw, None, None)
                    .await;
                match result.error {
                    Some(error) => send_error(&client_tx, message_id, &error),
                    None => send(&client_tx, serde_json::json!({
                        "messageId": message_id,
                        "response": result.response,
                    })),
                }
            },
            Some("subscribe") => {
                let Some(channel) = frame.get("channel").and_then(|v| v.as_str()) else {
                    send_error(&client_tx, message_id, &Error::new(
                        ErrorKind::ConnectionChannelValidation,
                        "channel is required",
                    ));
                    continue;
                };
                match state.channels.subscribe(&conn, channel).await {
                    Ok(()) => send(&client_tx, serde_json::json!({
                        "messageId": message_id,
                        "subscribed": { "channel": channel },
                    })),
                    Err(error) => send_error(&client_tx, message_id, &error),
                }
            },
            Some("unsubscribe") => {
                let Some(channel) = frame.get("channel").and_then(|v| v.as_str()) else {
                    send_error(&client_tx, message_id, &Error::new(
                        ErrorKind::ConnectionChannelValidation,
                        "channel is required",
                    ));
                    continue;
                };
                match state.channels.unsubscribe(&conn, channel).await {
                    Ok(()) => send(&client_tx, serde_json::json!({
                        "messageId": message_id,
                        "unsubscribed": { "channel": channel },
                    })),
                    Err(error) => send_error(&client_tx, message_id, &error),
                }
            },
            _ => send_error(&client_tx, message_id, &Error::new(
                ErrorKind::ConnectionServerError,
                "unknown messageType",
            )),
        }
    }

    // Presence comes off before the connection is destroyed, so leave
    // events still see a live map entry for everyone else.
    state.channels.remove_all(&conn).await;
    state.connections.destroy(&conn);
    info!(conn_id = %conn.id, "ws: closed");

    drop(client_tx);
    let _ = write_handle.await;
}

fn send(tx: &mpsc::UnboundedSender<String>, frame: serde_json::Value) {
    if let Ok(encoded) = serde_json::to_string(&frame) {
        let _ = tx.send(encoded);
    }
}

fn send_error(
    tx: &mpsc::UnboundedSender<String>,
    message_id: Option<serde_json::Value>,
    error: &Error,
) {
    let envelope = error.to_envelope();
    send(tx, serde_json::json!({
        "messageId": message_id,
        "error": envelope["error"],
    }));
}
