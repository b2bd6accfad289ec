//! Request parsing through response/fault building, end to end. This module knows nothing about HTTP transport; `server.rs`
//! pulls the raw body and headers off the wire and hands them here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use http::HeaderMap;
use tracing::{debug, warn};

use mockd_core::collaborators::{StatefulExecutor, TemplateEngine};
use mockd_core::metrics::DefaultMetrics;
use mockd_core::request_log::{LogEntry, Protocol, RequestLogSink, SubMeta};

use crate::envelope::{self, ParsedRequest, SoapVersion};
use crate::registry::OperationSnapshotCell;
use crate::response::{stateful_result_to_xml, substitute_xpath_tokens};
use crate::xml::Element;

pub struct DispatchOutcome {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

fn next_request_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("soap-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Project a SOAP body element's direct children to a flat JSON object
/// (`<id>7</id>` -> `{"id": "7"}`) — the request shape handed to the
/// stateful executor. Mirrors the same "project to a generic map for
/// matching/handoff" approach the gRPC dispatcher uses for its own
/// request projection (`mockd_core::json_proto::message_to_json`),
/// applied to XML instead of a dynamic protobuf message.
fn element_to_request_json(elem: &Element) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for child in &elem.children {
        if let crate::xml::Node::Element(e) = child {
            map.insert(e.local_name.clone(), serde_json::Value::String(e.text()));
        }
    }
    serde_json::Value::Object(map)
}

pub struct DispatchContext {
    pub snapshot: OperationSnapshotCell,
    pub metrics: Arc<DefaultMetrics>,
    pub log_sink: Arc<dyn RequestLogSink>,
    pub stateful_executor: Arc<dyn StatefulExecutor>,
    pub template_engine: Arc<dyn TemplateEngine>,
    pub endpoint_path: String,
}

impl DispatchContext {
    pub fn new(
        snapshot: OperationSnapshotCell,
        metrics: Arc<DefaultMetrics>,
        log_sink: Arc<dyn RequestLogSink>,
        stateful_executor: Arc<dyn StatefulExecutor>,
        template_engine: Arc<dyn TemplateEngine>,
        endpoint_path: String,
    ) -> Self {
        Self {
            snapshot,
            metrics,
            log_sink,
            stateful_executor,
            template_engine,
            endpoint_path,
        }
    }

    fn record(
        &self,
        operation: &str,
        action: Option<&str>,
        version: SoapVersion,
        fault: bool,
        status: u16,
        start: Instant,
        request_body: &str,
        response_body: &str,
    ) {
        let status_label = status.to_string();
        let duration = start.elapsed();
        self.metrics
            .requests_total
            .add(
                &[("protocol", "soap"), ("path", &self.endpoint_path), ("status", &status_label)],
                1.0,
            )
            .ok();
        self.metrics.request_duration_seconds.observe(
            &[("protocol", "soap"), ("path", &self.endpoint_path)],
            duration.as_secs_f64(),
        );
        self.log_sink.log(LogEntry::new(
            next_request_id(),
            Protocol::Soap,
            operation.to_string(),
            self.endpoint_path.clone(),
            request_body,
            response_body,
            status_label,
            duration.as_millis() as u64,
            SubMeta::Soap {
                operation: operation.to_string(),
                action: action.map(String::from),
                version: if version == SoapVersion::V12 { "1.2" } else { "1.1" },
                fault,
            },
        ));
    }

    fn fault_outcome(
        &self,
        operation: &str,
        action: Option<&str>,
        version: SoapVersion,
        code: &str,
        message: &str,
        detail: Option<&str>,
        start: Instant,
        request_body: &str,
    ) -> DispatchOutcome {
        let body = envelope::wrap_fault(version, code, message, detail);
        self.record(operation, action, version, true, 500, start, request_body, &body);
        DispatchOutcome {
            status: 500,
            content_type: version.content_type(),
            body,
        }
    }

    /// Handle one already-read request body. The 10 MiB cap is enforced by
    /// the caller before this is reached.
    pub async fn handle(&self, raw_body: &[u8], headers: &HeaderMap) -> DispatchOutcome {
        let start = Instant::now();
        let text = match std::str::from_utf8(raw_body) {
            Ok(t) => t,
            Err(_) => {
                let body = envelope::wrap_fault(SoapVersion::V11, "soap:Client", "request body is not valid UTF-8", None);
                self.record("unknown", None, SoapVersion::V11, true, 500, start, "", &body);
                return DispatchOutcome {
                    status: 500,
                    content_type: SoapVersion::V11.content_type(),
                    body,
                };
            }
        };

        let parsed = match envelope::parse(text) {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, "malformed SOAP envelope");
                let body = envelope::wrap_fault(SoapVersion::V11, "soap:Client", &format!("malformed envelope: {err}"), None);
                self.record("unknown", None, SoapVersion::V11, true, 500, start, text, &body);
                return DispatchOutcome {
                    status: 500,
                    content_type: SoapVersion::V11.content_type(),
                    body,
                };
            }
        };

        let version = parsed.version;
        let soap_action = envelope::extract_soap_action(version, headers);
        let snapshot = self.snapshot.load();

        let operation = soap_action
            .as_deref()
            .and_then(|action| snapshot.by_action(action))
            .or_else(|| {
                parsed
                    .first_body_child()
                    .and_then(|child| snapshot.by_body_tag(&child.tag, &child.local_name))
            });

        let Some(operation) = operation else {
            debug!("no configured SOAP operation matched this request");
            return self.fault_outcome(
                "unknown",
                soap_action.as_deref(),
                version,
                "soap:Client",
                "Unknown operation",
                None,
                start,
                text,
            );
        };
        let op_name = operation.name().to_string();

        if let Some(expected) = &operation.config.match_xpath {
            if !crate::xml::match_xpath(&parsed.root, expected) {
                // Operation names are unique; a matched name whose xpath
                // condition fails aborts straight to the generic fault
                // rather than falling through to another operation of
                // the same name.
                return self.fault_outcome(
                    &op_name,
                    soap_action.as_deref(),
                    version,
                    "soap:Client",
                    "Unknown operation",
                    None,
                    start,
                    text,
                );
            }
        }

        if let Some(stateful) = &operation.config.stateful {
            let request_json = parsed
                .first_body_child()
                .map(element_to_request_json)
                .unwrap_or(serde_json::Value::Null);
            let result = self
                .stateful_executor
                .execute(&stateful.resource, stateful.action, &request_json);
            return match stateful_result_to_xml(&op_name, &stateful.resource, result) {
                Ok(fragment) => {
                    let body = envelope::wrap_response(version, &fragment);
                    self.record(&op_name, soap_action.as_deref(), version, false, 200, start, text, &body);
                    DispatchOutcome {
                        status: 200,
                        content_type: version.content_type(),
                        body,
                    }
                }
                Err((code, message)) => {
                    self.fault_outcome(&op_name, soap_action.as_deref(), version, &code, &message, None, start, text)
                }
            };
        }

        if let Some(fault) = &operation.config.fault {
            return self.fault_outcome(
                &op_name,
                soap_action.as_deref(),
                version,
                &fault.code,
                &fault.message,
                fault.detail.as_deref(),
                start,
                text,
            );
        }

        if let Some(template) = &operation.config.response_template {
            let with_xpath = substitute_xpath_tokens(template, &parsed.root);
            let rendered = self.template_engine.process(&with_xpath, &std::collections::HashMap::new());
            let body = envelope::wrap_response(version, &rendered);
            self.record(&op_name, soap_action.as_deref(), version, false, 200, start, text, &body);
            return DispatchOutcome {
                status: 200,
                content_type: version.content_type(),
                body,
            };
        }

        self.fault_outcome(
            &op_name,
            soap_action.as_deref(),
            version,
            "soap:Server",
            "operation matched but has no response, fault, or stateful action configured",
            None,
            start,
            text,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::collaborators::{InMemoryStatefulExecutor, NoopTemplateEngine};
    use mockd_core::config::{SoapFaultConfig, SoapOperationConfig};
    use mockd_core::metrics::{DefaultMetrics, Registry};
    use mockd_core::request_log::InMemorySink;

    use crate::registry::OperationTable;

    fn ctx(ops: Vec<SoapOperationConfig>) -> (DispatchContext, Arc<InMemorySink>) {
        let registry = Registry::new();
        let metrics = Arc::new(DefaultMetrics::register(&registry));
        let sink = Arc::new(InMemorySink::new(16));
        let ctx = DispatchContext::new(
            OperationSnapshotCell::new(OperationTable::compile(ops).unwrap()),
            metrics,
            sink.clone(),
            Arc::new(InMemoryStatefulExecutor::new()),
            Arc::new(NoopTemplateEngine),
            "/soap".to_string(),
        );
        (ctx, sink)
    }

    #[tokio::test]
    async fn dispatches_by_body_element_and_renders_xpath_template() {
        let (ctx, _sink) = ctx(vec![SoapOperationConfig {
            name: "GetUser".into(),
            soap_action: None,
            match_xpath: None,
            response_template: Some("<r>{{xpath://GetUser/id}}</r>".into()),
            fault: None,
            stateful: None,
        }]);
        let body = b"<Envelope><Body><GetUser><id>user-789</id></GetUser></Body></Envelope>";
        let outcome = ctx.handle(body, &HeaderMap::new()).await;
        assert_eq!(outcome.status, 200);
        assert!(outcome.body.contains("<r>user-789</r>"));
    }

    #[tokio::test]
    async fn xpath_match_failure_yields_fault() {
        let mut expected = std::collections::HashMap::new();
        expected.insert("//Divide/b".to_string(), "0".to_string());
        let (ctx, _sink) = ctx(vec![SoapOperationConfig {
            name: "Divide".into(),
            soap_action: None,
            match_xpath: Some(expected),
            response_template: None,
            fault: Some(SoapFaultConfig {
                code: "soap:Client".into(),
                message: "Division by zero".into(),
                detail: None,
            }),
            stateful: None,
        }]);
        let body = b"<Envelope><Body><Divide><a>10</a><b>0</b></Divide></Body></Envelope>";
        let outcome = ctx.handle(body, &HeaderMap::new()).await;
        assert_eq!(outcome.status, 500);
        assert!(outcome.body.contains("Division by zero"));
    }

    #[tokio::test]
    async fn unmatched_operation_is_unknown_operation_fault() {
        let (ctx, _sink) = ctx(vec![]);
        let body = b"<Envelope><Body><Nope/></Body></Envelope>";
        let outcome = ctx.handle(body, &HeaderMap::new()).await;
        assert_eq!(outcome.status, 500);
        assert!(outcome.body.contains("Unknown operation"));
    }

    #[tokio::test]
    async fn soap_12_fault_has_500_and_soap_12_content_type() {
        let (ctx, _sink) = ctx(vec![]);
        let body = b"<soap:Envelope xmlns:soap=\"http://www.w3.org/2003/05/soap-envelope\"><soap:Body><Nope/></soap:Body></soap:Envelope>";
        let outcome = ctx.handle(body, &HeaderMap::new()).await;
        assert_eq!(outcome.status, 500);
        assert_eq!(outcome.content_type, "application/soap+xml; charset=utf-8");
    }
}
