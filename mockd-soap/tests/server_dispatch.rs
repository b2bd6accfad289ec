//! End-to-end SOAP dispatch over a real loopback TCP connection: a
//! hand-built HTTP/1.1 POST request (no client crate pulled in just for
//! this) against a `SoapServer` bound to an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use mockd_core::collaborators::{InMemoryStatefulExecutor, NoopTemplateEngine};
use mockd_core::config::SoapOperationConfig;
use mockd_core::metrics::{DefaultMetrics, Registry};
use mockd_core::request_log::InMemorySink;

use mockd_soap::server::SoapServer;

async fn post(addr: std::net::SocketAddr, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw);

    let mut parts = raw.splitn(2, "\r\n\r\n");
    let head = parts.next().unwrap_or_default();
    let body = parts.next().unwrap_or_default().to_string();
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(0);
    (status, body)
}

async fn start_server(operations: Vec<SoapOperationConfig>) -> (SoapServer, std::net::SocketAddr) {
    let registry = Registry::new();
    let metrics = Arc::new(DefaultMetrics::register(&registry));
    let log_sink = Arc::new(InMemorySink::new(16));
    let server = SoapServer::new(
        "/soap",
        operations,
        metrics,
        log_sink,
        Arc::new(InMemoryStatefulExecutor::new()),
        Arc::new(NoopTemplateEngine),
    )
    .unwrap();
    let addr = server.start(0).await.unwrap();
    (server, addr)
}

#[tokio::test]
async fn templated_response_renders_xpath_substitution() {
    let (server, addr) = start_server(vec![SoapOperationConfig {
        name: "GetUser".into(),
        soap_action: None,
        match_xpath: None,
        response_template: Some("<GetUserResponse><id>{{xpath://GetUser/id}}</id></GetUserResponse>".into()),
        fault: None,
        stateful: None,
    }])
    .await;

    let body = r#"<?xml version="1.0"?><soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body><GetUser><id>user-42</id></GetUser></soapenv:Body></soapenv:Envelope>"#;
    let (status, response) = post(addr, "/soap", body).await;

    assert_eq!(status, 200);
    assert!(response.contains("<id>user-42</id>"));
    assert!(response.contains("Envelope"));

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn unknown_operation_yields_soap_fault() {
    let (server, addr) = start_server(vec![]).await;

    let body = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body><Nope/></soapenv:Body></soapenv:Envelope>"#;
    let (status, response) = post(addr, "/soap", body).await;

    assert_eq!(status, 500);
    assert!(response.contains("Unknown operation"));
    assert!(response.contains("Fault"));

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn stateful_create_then_get_round_trips_through_the_wire() {
    let (server, addr) = start_server(vec![
        SoapOperationConfig {
            name: "CreateUser".into(),
            soap_action: None,
            match_xpath: None,
            response_template: None,
            fault: None,
            stateful: Some(mockd_core::config::StatefulConfig {
                resource: "user".into(),
                action: mockd_core::config::StatefulAction::Create,
            }),
        },
        SoapOperationConfig {
            name: "GetUser".into(),
            soap_action: None,
            match_xpath: None,
            response_template: None,
            fault: None,
            stateful: Some(mockd_core::config::StatefulConfig {
                resource: "user".into(),
                action: mockd_core::config::StatefulAction::Get,
            }),
        },
    ])
    .await;

    let create_body = r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/"><soapenv:Body><CreateUser><name>Ada</name></CreateUser></soapenv:Body></soapenv:Envelope>"#;
    let (status, response) = post(addr, "/soap", create_body).await;
    assert_eq!(status, 200);
    assert!(response.contains("<name>Ada</name>"));

    server.stop(Duration::from_secs(5)).await;
}
