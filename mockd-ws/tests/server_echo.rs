//! End-to-end echo and matcher dispatch over a real loopback TCP
//! connection, driven by `tokio-tungstenite` against a `WsServer` bound
//! to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use mockd_core::config::{WsEndpointConfig, WsMatcherConfig};
use mockd_core::matcher::{MatcherConfig, MatcherKind};
use mockd_core::metrics::{DefaultMetrics, Registry};
use mockd_core::request_log::InMemorySink;

use mockd_ws::server::WsServer;

fn echo_endpoint() -> WsEndpointConfig {
    WsEndpointConfig {
        path: "/ws".into(),
        subprotocols: vec![],
        require_subprotocol: false,
        max_message_size: 64 * 1024,
        max_connections: 0,
        idle_timeout: None,
        heartbeat: None,
        echo: true,
        skip_origin_verify: true,
        matchers: vec![],
        default_response: None,
        scenario: None,
        enabled: true,
    }
}

fn matcher_endpoint() -> WsEndpointConfig {
    WsEndpointConfig {
        path: "/ws".into(),
        subprotocols: vec![],
        require_subprotocol: false,
        max_message_size: 64 * 1024,
        max_connections: 0,
        idle_timeout: None,
        heartbeat: None,
        echo: false,
        skip_origin_verify: true,
        matchers: vec![WsMatcherConfig {
            matcher: MatcherConfig {
                kind: MatcherKind::Exact,
                pattern: "ping".to_string(),
                path: None,
                message_type: None,
            },
            response: Some("pong".to_string()),
            no_response: false,
        }],
        default_response: Some("unrecognized".to_string()),
        scenario: None,
        enabled: true,
    }
}

async fn start_server(endpoints: Vec<WsEndpointConfig>) -> (WsServer, std::net::SocketAddr) {
    let registry = Registry::new();
    let metrics = Arc::new(DefaultMetrics::register(&registry));
    let log_sink = Arc::new(InMemorySink::new(16));
    let server = WsServer::new(endpoints, metrics, log_sink).unwrap();
    let addr = server.start(0).await.unwrap();
    (server, addr)
}

#[tokio::test]
async fn echo_endpoint_returns_what_it_received() {
    let (server, addr) = start_server(vec![echo_endpoint()]).await;

    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.expect("connects");
    ws.send(Message::Text("hello".into())).await.unwrap();
    let reply = ws.next().await.expect("a reply arrives").unwrap();
    assert_eq!(reply.into_text().unwrap(), "hello");

    ws.close(None).await.ok();
    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn matcher_dispatch_prefers_exact_match_over_default() {
    let (server, addr) = start_server(vec![matcher_endpoint()]).await;

    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.expect("connects");

    ws.send(Message::Text("ping".into())).await.unwrap();
    let reply = ws.next().await.expect("a reply arrives").unwrap();
    assert_eq!(reply.into_text().unwrap(), "pong");

    ws.send(Message::Text("anything else".into())).await.unwrap();
    let reply = ws.next().await.expect("a reply arrives").unwrap();
    assert_eq!(reply.into_text().unwrap(), "unrecognized");

    ws.close(None).await.ok();
    server.stop(Duration::from_secs(5)).await;
}
