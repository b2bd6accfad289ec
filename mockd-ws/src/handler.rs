//! The HTTP upgrade entry point: subprotocol
//! negotiation, origin policy, and atomic admission, then a spawned
//! read/write task pair per connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mockd_core::matcher::MessageType;

use crate::connection::{next_connection_id, Connection};
use crate::server::WsServerState;

pub async fn ws_handler(
    State(state): State<Arc<WsServerState>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let path = uri.path().to_string();
    let endpoints = state.endpoints.load();
    let Some(endpoint) = endpoints.get(&path) else {
        return (StatusCode::NOT_FOUND, "no endpoint configured for this path").into_response();
    };
    if !endpoint.config.enabled {
        return (StatusCode::NOT_FOUND, "endpoint disabled").into_response();
    }

    if !endpoint.config.skip_origin_verify {
        let origin_host = headers
            .get(axum::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<http::Uri>().ok())
            .and_then(|u| u.host().map(str::to_string));
        let host = headers
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if origin_host != host {
            return (StatusCode::FORBIDDEN, "origin verification failed").into_response();
        }
    }

    if endpoint.config.require_subprotocol {
        let offered: Vec<String> = headers
            .get(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        let intersects = endpoint.config.subprotocols.iter().any(|p| offered.contains(p));
        if !intersects {
            return (StatusCode::BAD_REQUEST, "no acceptable subprotocol offered").into_response();
        }
    }

    // Atomically admit before committing to the 101 response.
    if !endpoint.try_admit() {
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let subprotocols = endpoint.config.subprotocols.clone();
    let manager = state.manager.clone();
    let ctx = state.ctx.clone();
    let endpoint = endpoint.clone();

    let mut upgrade = ws;
    if !subprotocols.is_empty() {
        upgrade = upgrade.protocols(subprotocols);
    }

    upgrade.on_upgrade(move |socket| async move {
        run_connection(socket, endpoint, manager, ctx).await;
    })
}

async fn run_connection(
    socket: WebSocket,
    endpoint: Arc<crate::endpoint::WsEndpoint>,
    manager: Arc<crate::manager::ConnectionManager>,
    ctx: Arc<crate::dispatch::WsDispatchContext>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = next_connection_id();

    let conn = Arc::new(Connection::new(
        id,
        endpoint.config.path.clone(),
        tx,
        Arc::downgrade(&manager),
    ));
    manager.register(conn.clone());
    info!(%id, path = %endpoint.config.path, "websocket connection established");
    ctx.metrics.active_connections.inc(&[("protocol", "websocket")]);

    match endpoint.scenario_for_new_connection() {
        Ok(Some(runtime)) => {
            *conn.scenario.lock().unwrap() = Some(runtime.clone());
            tokio::spawn(runtime.run(conn.clone()));
        }
        Ok(None) => {}
        Err(err) => warn!(%id, %err, "failed to compile scenario for connection"),
    }

    // Single-writer task: every send path (direct replies, broadcast,
    // scenario sends) funnels through `tx`, keeping outbound frames on
    // this connection totally ordered.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(err) => {
                warn!(%id, %err, "websocket transport error");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                ctx.dispatch_frame(&endpoint, &conn, &text, MessageType::Text).await;
            }
            Message::Binary(bytes) => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                ctx.dispatch_frame(&endpoint, &conn, &text, MessageType::Binary).await;
            }
            Message::Ping(_) | Message::Pong(_) => {
                conn.touch();
            }
            Message::Close(frame) => {
                let (code, reason) = frame
                    .map(|f| (f.code, f.reason.to_string()))
                    .unwrap_or((1000, String::new()));
                debug!(%id, code, "client initiated close");
                conn.close(code, &reason).await;
                break;
            }
        }
    }

    conn.close(1000, "").await;
    manager.remove(id);
    endpoint.release();
    ctx.metrics.active_connections.dec(&[("protocol", "websocket")]);
    writer.abort();
    info!(%id, "websocket connection closed");
}
