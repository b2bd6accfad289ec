//! The dispatch steps common to all four RPC shapes. This
//! module knows nothing about tonic's per-shape service traits — it
//! only operates on already-decoded `DynamicMessage`s and already-parsed
//! metadata, so the same code path backs unary, server-streaming,
//! client-streaming, and the post-match half of bidi dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use prost_reflect::DynamicMessage;
use tonic::{Code, Status};

use mockd_core::config::{parse_duration, GrpcMethodConfig};
use mockd_core::json_proto::{message_from_json, message_to_json};
use mockd_core::metrics::DefaultMetrics;
use mockd_core::proto::{ProtoSchema, StreamKind};
use mockd_core::request_log::{LogEntry, Protocol, RequestLogSink, SubMeta};

use crate::method_table::MethodTable;
use crate::metadata::MetadataMultiMap;
use crate::status::{build_status, canonical_upper_name};

/// The read-only snapshot a single gRPC call dispatches against. Swapped
/// wholesale on reconfiguration: in-flight calls keep the
/// snapshot they started with.
pub struct GrpcSnapshot {
    pub schema: Arc<ProtoSchema>,
    pub methods: Arc<MethodTable>,
}

/// Holds the current snapshot behind a lock that is only ever held for
/// the instant it takes to clone an `Arc`.
pub struct SnapshotCell(RwLock<Arc<GrpcSnapshot>>);

impl SnapshotCell {
    pub fn new(snapshot: GrpcSnapshot) -> Self {
        Self(RwLock::new(Arc::new(snapshot)))
    }

    pub fn load(&self) -> Arc<GrpcSnapshot> {
        self.0.read().unwrap().clone()
    }

    pub fn store(&self, snapshot: GrpcSnapshot) {
        *self.0.write().unwrap() = Arc::new(snapshot);
    }
}

pub struct ResolvedMethod {
    pub service: String,
    pub method: String,
    pub input_desc: prost_reflect::MessageDescriptor,
    pub output_desc: prost_reflect::MessageDescriptor,
    pub stream_kind: StreamKind,
}

fn next_request_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("grpc-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Shared state every call dispatches through: the current config
/// snapshot plus the metrics/log/recording collaborators.
pub struct DispatchContext {
    pub snapshot: SnapshotCell,
    pub metrics: Arc<DefaultMetrics>,
    pub log_sink: Arc<dyn RequestLogSink>,
}

impl DispatchContext {
    pub fn new(snapshot: GrpcSnapshot, metrics: Arc<DefaultMetrics>, log_sink: Arc<dyn RequestLogSink>) -> Self {
        Self {
            snapshot: SnapshotCell::new(snapshot),
            metrics,
            log_sink,
        }
    }

    /// Resolve `(service, method)` against the current snapshot. `None` means the caller must fail `Unimplemented`.
    pub fn resolve(&self, service: &str, method: &str) -> Option<(Arc<GrpcSnapshot>, ResolvedMethod)> {
        let snapshot = self.snapshot.load();
        let schema_method = snapshot.schema.method(service, method)?;
        let input_desc = snapshot.schema.input_descriptor(service, method)?;
        let output_desc = snapshot.schema.output_descriptor(service, method)?;
        let stream_kind = schema_method.stream_kind();
        Some((
            snapshot.clone(),
            ResolvedMethod {
                service: service.to_string(),
                method: method.to_string(),
                input_desc,
                output_desc,
                stream_kind,
            },
        ))
    }

    fn record(
        &self,
        resolved: &ResolvedMethod,
        stream_kind_label: &'static str,
        status: &str,
        start: Instant,
        request_body: &str,
        response_body: &str,
    ) {
        let path = format!("/{}/{}", resolved.service, resolved.method);
        let duration = start.elapsed();
        self.metrics
            .requests_total
            .add(&[("protocol", "grpc"), ("path", &path), ("status", status)], 1.0)
            .ok();
        self.metrics
            .request_duration_seconds
            .observe(&[("protocol", "grpc"), ("path", &path)], duration.as_secs_f64());
        self.log_sink.log(LogEntry::new(
            next_request_id(),
            Protocol::Grpc,
            resolved.method.clone(),
            path,
            request_body,
            response_body,
            status,
            duration.as_millis() as u64,
            SubMeta::Grpc {
                service: resolved.service.clone(),
                method: resolved.method.clone(),
                stream_kind: stream_kind_label,
                status: status.to_string(),
            },
        ));
    }

    fn record_unimplemented(&self, service: &str, method: &str, stream_kind_label: &'static str, start: Instant) {
        let path = format!("/{service}/{method}");
        self.metrics
            .requests_total
            .add(&[("protocol", "grpc"), ("path", &path), ("status", "UNIMPLEMENTED")], 1.0)
            .ok();
        self.metrics.request_duration_seconds.observe(
            &[("protocol", "grpc"), ("path", &path)],
            start.elapsed().as_secs_f64(),
        );
        self.log_sink.log(LogEntry::new(
            next_request_id(),
            Protocol::Grpc,
            method.to_string(),
            path,
            "",
            "",
            "UNIMPLEMENTED",
            start.elapsed().as_millis() as u64,
            SubMeta::Grpc {
                service: service.to_string(),
                method: method.to_string(),
                stream_kind: stream_kind_label,
                status: "UNIMPLEMENTED".to_string(),
            },
        ));
    }

    /// Dispatch an unrecognized `(service, method)` pair.
    pub fn dispatch_unknown(&self, service: &str, method: &str) -> Status {
        let start = Instant::now();
        self.record_unimplemented(service, method, "unary", start);
        Status::unimplemented(format!("no mock configured for {service}/{method}"))
    }

    /// Select and apply one `MethodConfig`,
    /// shared by unary, server-streaming (pre-loop), and the tail of
    /// client-streaming dispatch.
    async fn select_and_apply(
        &self,
        snapshot: &GrpcSnapshot,
        resolved: &ResolvedMethod,
        metadata: &MetadataMultiMap,
        request_json: &serde_json::Value,
    ) -> Result<GrpcMethodConfig, Status> {
        let cfg = snapshot
            .methods
            .select(&resolved.service, &resolved.method, metadata, request_json)
            .cloned();
        let Some(cfg) = cfg else {
            return Err(Status::unimplemented(format!(
                "no mock configured for {}/{}",
                resolved.service, resolved.method
            )));
        };
        if let Some(delay) = &cfg.delay {
            if let Ok(d) = parse_duration(delay) {
                tokio::time::sleep(d).await;
            }
        }
        if let Some(err_cfg) = &cfg.error {
            return Err(build_status(err_cfg));
        }
        Ok(cfg)
    }

    fn build_response(
        &self,
        resolved: &ResolvedMethod,
        value: serde_json::Value,
    ) -> Result<DynamicMessage, Status> {
        message_from_json(&resolved.output_desc, value)
            .map_err(|e| Status::internal(format!("failed to build response: {e}")))
    }

    /// Unary dispatch, steps 2-9. Step 1
    /// (resolve) and decode happen upstream in the tonic service shim.
    pub async fn dispatch_unary(
        &self,
        resolved: &ResolvedMethod,
        metadata: &MetadataMultiMap,
        request: DynamicMessage,
    ) -> Result<DynamicMessage, Status> {
        let start = Instant::now();
        let snapshot = self.snapshot.load();
        let request_json = message_to_json(&request)
            .map_err(|e| Status::invalid_argument(format!("failed to decode request: {e}")))?;
        let outcome = self
            .select_and_apply(&snapshot, resolved, metadata, &request_json)
            .await;
        match outcome {
            Err(status) => {
                self.record(
                    resolved,
                    "unary",
                    canonical_upper_name(status.code()),
                    start,
                    &request_json.to_string(),
                    "",
                );
                Err(status)
            }
            Ok(cfg) => {
                let value = cfg.response.clone().unwrap_or(serde_json::Value::Null);
                match self.build_response(resolved, value) {
                    Ok(msg) => {
                        let response_json = message_to_json(&msg).unwrap_or_default();
                        self.record(
                            resolved,
                            "unary",
                            "OK",
                            start,
                            &request_json.to_string(),
                            &response_json.to_string(),
                        );
                        Ok(msg)
                    }
                    Err(status) => {
                        self.record(
                            resolved,
                            "unary",
                            canonical_upper_name(Code::Internal),
                            start,
                            &request_json.to_string(),
                            "",
                        );
                        Err(status)
                    }
                }
            }
        }
    }

    /// The list of response payloads a streaming config should emit:
    /// `responses` if present, else `response` wrapped as a one-element
    /// list, else empty.
    pub fn response_payloads(cfg: &GrpcMethodConfig) -> Vec<serde_json::Value> {
        if let Some(list) = &cfg.responses {
            list.clone()
        } else if let Some(single) = &cfg.response {
            vec![single.clone()]
        } else {
            Vec::new()
        }
    }

    pub fn build_stream_message(
        &self,
        resolved: &ResolvedMethod,
        value: serde_json::Value,
    ) -> Result<DynamicMessage, Status> {
        self.build_response(resolved, value)
    }

    /// Server-streaming / client-streaming post-match dispatch: resolve
    /// config and run the delay/error steps, returning the config for
    /// the caller to stream `responses` from (server-streaming) or wrap
    /// `response` from (client-streaming).
    pub async fn dispatch_streaming_config(
        &self,
        resolved: &ResolvedMethod,
        metadata: &MetadataMultiMap,
        request_json: &serde_json::Value,
    ) -> Result<GrpcMethodConfig, Status> {
        let snapshot = self.snapshot.load();
        self.select_and_apply(&snapshot, resolved, metadata, request_json).await
    }

    pub async fn dispatch_bidi_config(
        &self,
        resolved: &ResolvedMethod,
        metadata: &MetadataMultiMap,
    ) -> Option<GrpcMethodConfig> {
        let snapshot = self.snapshot.load();
        snapshot
            .methods
            .select_by_metadata(&resolved.service, &resolved.method, metadata)
            .cloned()
    }

    pub fn record_stream_outcome(
        &self,
        resolved: &ResolvedMethod,
        stream_kind_label: &'static str,
        status: &str,
        start: Instant,
    ) {
        self.record(resolved, stream_kind_label, status, start, "", "");
    }
}
