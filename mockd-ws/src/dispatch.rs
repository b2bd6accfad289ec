//! Per-connection-loop message routing: scenario offer, then matcher list, then default response,
//! then echo — in that fixed order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use mockd_core::matcher::{MatchInput, MessageType};
use mockd_core::metrics::DefaultMetrics;
use mockd_core::request_log::{LogEntry, Protocol, RequestLogSink, SubMeta};

use crate::connection::Connection;
use crate::endpoint::WsEndpoint;

fn next_frame_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("ws-frame-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

pub struct WsDispatchContext {
    pub metrics: Arc<DefaultMetrics>,
    pub log_sink: Arc<dyn RequestLogSink>,
}

impl WsDispatchContext {
    pub fn new(metrics: Arc<DefaultMetrics>, log_sink: Arc<dyn RequestLogSink>) -> Self {
        Self { metrics, log_sink }
    }

    fn record(&self, conn: &Connection, path: &str, direction: &'static str, message_type: &'static str, start: Instant) {
        self.metrics
            .requests_total
            .add(&[("protocol", "websocket"), ("path", path), ("status", "OK")], 1.0)
            .ok();
        self.metrics
            .request_duration_seconds
            .observe(&[("protocol", "websocket"), ("path", path)], start.elapsed().as_secs_f64());
        self.log_sink.log(LogEntry::new(
            next_frame_id(),
            Protocol::WebSocket,
            direction,
            path,
            "",
            "",
            "OK",
            start.elapsed().as_millis() as u64,
            SubMeta::WebSocket {
                connection_id: conn.id.to_string(),
                direction,
                message_type,
                close_code: None,
            },
        ));
    }

    /// Route one inbound text/binary frame per the fixed step order.
    /// Returns `true` if the frame produced an outbound reply (for
    /// metrics/log purposes the caller doesn't need beyond this).
    pub async fn dispatch_frame(
        &self,
        endpoint: &WsEndpoint,
        conn: &Arc<Connection>,
        text: &str,
        message_type: MessageType,
    ) {
        let start = Instant::now();
        conn.touch();
        conn.messages_received.fetch_add(1, Ordering::Relaxed);

        // Step 1: offer to the attached scenario's `expect` step.
        if let Some(scenario) = conn.scenario.lock().unwrap().clone() {
            if scenario.handle_message(text, message_type) {
                self.record(conn, &endpoint.config.path, "inbound", "text", start);
                return;
            }
        }

        // Step 2: first matching configured matcher wins.
        for m in &endpoint.matchers {
            let input = MatchInput::Payload { text, message_type };
            if m.matcher.matches(&input) {
                if !m.no_response {
                    if let Some(response) = &m.response {
                        let _ = conn.send_text(response.clone()).await;
                    }
                }
                self.record(conn, &endpoint.config.path, "inbound", "text", start);
                return;
            }
        }

        // Step 3: endpoint-wide default response.
        if let Some(default) = &endpoint.config.default_response {
            let _ = conn.send_text(default.clone()).await;
            self.record(conn, &endpoint.config.path, "inbound", "text", start);
            return;
        }

        // Step 4: echo mode.
        if endpoint.config.echo {
            let _ = conn.send_text(text.to_string()).await;
        }
        self.record(conn, &endpoint.config.path, "inbound", "text", start);
    }
}
