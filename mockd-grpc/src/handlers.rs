//! Implementations of tonic's four per-shape server traits
//! (`UnaryService`, `ServerStreamingService`, `ClientStreamingService`,
//! `StreamingService`) on top of `DispatchContext`. Each holds just
//! enough state (the resolved method plus a context handle) to run its
//! shape's dispatch steps.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures_util::Stream;
use prost_reflect::DynamicMessage;
use tokio_stream::wrappers::ReceiverStream;
use tonic::server::{ClientStreamingService, ServerStreamingService, StreamingService, UnaryService};
use tonic::{Code, Request, Response, Status, Streaming};

use mockd_core::config::parse_duration;
use mockd_core::json_proto::message_to_json;
use mockd_core::proto::StreamKind;

use crate::dispatch::{DispatchContext, ResolvedMethod};
use crate::metadata::MetadataMultiMap;
use crate::status::canonical_upper_name;

type BoxFuture<T> = Pin<Box<dyn std::future::Future<Output = T> + Send>>;
type ResponseStream = Pin<Box<dyn Stream<Item = Result<DynamicMessage, Status>> + Send + 'static>>;

/// Increments `mockd_active_connections{protocol="grpc"}` on
/// construction and decrements it on drop.
struct ActiveStreamGuard {
    ctx: Arc<DispatchContext>,
}

impl ActiveStreamGuard {
    fn enter(ctx: Arc<DispatchContext>) -> Self {
        ctx.metrics.active_connections.inc(&[("protocol", "grpc")]);
        Self { ctx }
    }
}

impl Drop for ActiveStreamGuard {
    fn drop(&mut self) {
        self.ctx.metrics.active_connections.dec(&[("protocol", "grpc")]);
    }
}

pub struct UnaryHandler {
    pub ctx: Arc<DispatchContext>,
    pub resolved: ResolvedMethod,
}

impl UnaryService<DynamicMessage> for UnaryHandler {
    type Response = DynamicMessage;
    type Future = BoxFuture<Result<Response<DynamicMessage>, Status>>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let ctx = self.ctx.clone();
        let resolved = ResolvedMethod {
            service: self.resolved.service.clone(),
            method: self.resolved.method.clone(),
            input_desc: self.resolved.input_desc.clone(),
            output_desc: self.resolved.output_desc.clone(),
            stream_kind: self.resolved.stream_kind,
        };
        Box::pin(async move {
            let metadata = MetadataMultiMap::from_metadata(request.metadata());
            let msg = request.into_inner();
            let out = ctx.dispatch_unary(&resolved, &metadata, msg).await?;
            Ok(Response::new(out))
        })
    }
}

pub struct ServerStreamingHandler {
    pub ctx: Arc<DispatchContext>,
    pub resolved: ResolvedMethod,
}

impl ServerStreamingService<DynamicMessage> for ServerStreamingHandler {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<Result<Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, request: Request<DynamicMessage>) -> Self::Future {
        let ctx = self.ctx.clone();
        let resolved = ResolvedMethod {
            service: self.resolved.service.clone(),
            method: self.resolved.method.clone(),
            input_desc: self.resolved.input_desc.clone(),
            output_desc: self.resolved.output_desc.clone(),
            stream_kind: self.resolved.stream_kind,
        };
        Box::pin(async move {
            let start = Instant::now();
            let guard = ActiveStreamGuard::enter(ctx.clone());
            let metadata = MetadataMultiMap::from_metadata(request.metadata());
            let msg = request.into_inner();
            let request_json = message_to_json(&msg)
                .map_err(|e| Status::invalid_argument(format!("failed to decode request: {e}")))?;
            let cfg = match ctx.dispatch_streaming_config(&resolved, &metadata, &request_json).await {
                Ok(cfg) => cfg,
                Err(status) => {
                    ctx.record_stream_outcome(&resolved, "server_streaming", canonical_upper_name(status.code()), start);
                    return Err(status);
                }
            };
            let payloads = DispatchContext::response_payloads(&cfg);
            let stream_delay = cfg.stream_delay.clone();
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let ctx_task = ctx.clone();
            let resolved_task = ResolvedMethod {
                service: resolved.service.clone(),
                method: resolved.method.clone(),
                input_desc: resolved.input_desc.clone(),
                output_desc: resolved.output_desc.clone(),
                stream_kind: resolved.stream_kind,
            };
            tokio::spawn(async move {
                // Held for the spawned task's lifetime, not the outer
                // future's: the gauge must stay up until emission
                // actually finishes, well after `call` has returned.
                let _guard = guard;
                let last = payloads.len().saturating_sub(1);
                for (i, value) in payloads.into_iter().enumerate() {
                    let item = ctx_task
                        .build_stream_message(&resolved_task, value)
                        .map_err(|_| Status::internal("failed to build response"));
                    if tx.send(item).await.is_err() {
                        break;
                    }
                    if i != last {
                        if let Some(delay) = &stream_delay {
                            if let Ok(d) = parse_duration(delay) {
                                tokio::time::sleep(d).await;
                            }
                        }
                    }
                }
                ctx_task.record_stream_outcome(&resolved_task, "server_streaming", "OK", start);
            });
            let stream: Self::ResponseStream = Box::pin(ReceiverStream::new(rx));
            Ok(Response::new(stream))
        })
    }
}

pub struct ClientStreamingHandler {
    pub ctx: Arc<DispatchContext>,
    pub resolved: ResolvedMethod,
}

impl ClientStreamingService<DynamicMessage> for ClientStreamingHandler {
    type Response = DynamicMessage;
    type Future = BoxFuture<Result<Response<DynamicMessage>, Status>>;

    fn call(&mut self, request: Request<Streaming<DynamicMessage>>) -> Self::Future {
        let ctx = self.ctx.clone();
        let resolved = ResolvedMethod {
            service: self.resolved.service.clone(),
            method: self.resolved.method.clone(),
            input_desc: self.resolved.input_desc.clone(),
            output_desc: self.resolved.output_desc.clone(),
            stream_kind: self.resolved.stream_kind,
        };
        Box::pin(async move {
            let start = Instant::now();
            let _guard = ActiveStreamGuard::enter(ctx.clone());
            let metadata = MetadataMultiMap::from_metadata(request.metadata());
            let mut stream = request.into_inner();
            let mut last_json = serde_json::Value::Null;
            let mut frame_count = 0usize;
            use futures_util::StreamExt;
            while let Some(frame) = stream.next().await {
                let msg = frame?;
                last_json = message_to_json(&msg)
                    .map_err(|e| Status::invalid_argument(format!("failed to decode request: {e}")))?;
                frame_count += 1;
            }
            let _ = frame_count;
            let cfg = match ctx.dispatch_streaming_config(&resolved, &metadata, &last_json).await {
                Ok(cfg) => cfg,
                Err(status) => {
                    ctx.record_stream_outcome(&resolved, "client_streaming", canonical_upper_name(status.code()), start);
                    return Err(status);
                }
            };
            let value = cfg.response.clone().unwrap_or(serde_json::Value::Null);
            match ctx.build_stream_message(&resolved, value) {
                Ok(msg) => {
                    ctx.record_stream_outcome(&resolved, "client_streaming", "OK", start);
                    Ok(Response::new(msg))
                }
                Err(status) => {
                    ctx.record_stream_outcome(&resolved, "client_streaming", canonical_upper_name(Code::Internal), start);
                    Err(status)
                }
            }
        })
    }
}

pub struct BidiHandler {
    pub ctx: Arc<DispatchContext>,
    pub resolved: ResolvedMethod,
}

impl StreamingService<DynamicMessage> for BidiHandler {
    type Response = DynamicMessage;
    type ResponseStream = ResponseStream;
    type Future = BoxFuture<Result<Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, request: Request<Streaming<DynamicMessage>>) -> Self::Future {
        let ctx = self.ctx.clone();
        let resolved = ResolvedMethod {
            service: self.resolved.service.clone(),
            method: self.resolved.method.clone(),
            input_desc: self.resolved.input_desc.clone(),
            output_desc: self.resolved.output_desc.clone(),
            stream_kind: self.resolved.stream_kind,
        };
        Box::pin(async move {
            let start = Instant::now();
            let guard = ActiveStreamGuard::enter(ctx.clone());
            let metadata = MetadataMultiMap::from_metadata(request.metadata());
            // Bidi matches on metadata alone.
            let cfg = ctx.dispatch_bidi_config(&resolved, &metadata).await;
            let Some(cfg) = cfg else {
                ctx.record_stream_outcome(&resolved, "bidi", "UNIMPLEMENTED", start);
                return Err(Status::unimplemented(format!(
                    "no mock configured for {}/{}",
                    resolved.service, resolved.method
                )));
            };
            let payloads = DispatchContext::response_payloads(&cfg);
            let stream_delay = cfg.stream_delay.clone();
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            let mut inbound = request.into_inner();
            let resolved_task = ResolvedMethod {
                service: resolved.service.clone(),
                method: resolved.method.clone(),
                input_desc: resolved.input_desc.clone(),
                output_desc: resolved.output_desc.clone(),
                stream_kind: resolved.stream_kind,
            };
            let ctx_task = ctx.clone();
            tokio::spawn(async move {
                use futures_util::StreamExt;
                let _guard = guard;
                let mut cursor = 0usize;
                while let Some(frame) = inbound.next().await {
                    if frame.is_err() {
                        break;
                    }
                    if cursor < payloads.len() {
                        let value = payloads[cursor].clone();
                        cursor += 1;
                        let item = ctx_task
                            .build_stream_message(&resolved_task, value)
                            .map_err(|_| Status::internal("failed to build response"));
                        if tx.send(item).await.is_err() {
                            break;
                        }
                        if cursor < payloads.len() {
                            if let Some(delay) = &stream_delay {
                                if let Ok(d) = parse_duration(delay) {
                                    tokio::time::sleep(d).await;
                                }
                            }
                        }
                    }
                }
                ctx_task.record_stream_outcome(&resolved_task, "bidi", "OK", start);
            });
            let stream: Self::ResponseStream = Box::pin(ReceiverStream::new(rx));
            Ok(Response::new(stream))
        })
    }
}
