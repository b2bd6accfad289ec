//! The HTTP/2 entry point: a raw `tower::Service` over `hyper`'s
//! incoming-request type that routes each call by path (`/service/method`)
//! to the dynamic handler for that method's stream kind, or to the
//! "method not found" fallback.
//!
//! This does not go through `tonic::transport::Server::add_service`
//! because that requires one statically-named service per route; a
//! schema-driven mock server dispatches to a service set that is only
//! known at runtime, so routing is done by hand, with `tonic::server::
//! Grpc` doing the per-call framing exactly as generated code would.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::body::Incoming;
use tonic::body::BoxBody;
use tonic::server::Grpc;
use tonic::{Request, Response, Status};

use mockd_core::proto::StreamKind;

use crate::codec::{DynamicServerCodec, UnitCodec};
use crate::dispatch::DispatchContext;
use crate::handlers::{BidiHandler, ClientStreamingHandler, ServerStreamingHandler, UnaryHandler};
use crate::reflection::{ReflectionService, REFLECTION_PATH_PREFIX};

/// A `UnaryService<()>` that always fails `Unimplemented`, used to route
/// unknown `(service, method)` pairs through the same wire-framing logic
/// real calls use.
struct AlwaysUnimplemented {
    status: Status,
}

impl tonic::server::UnaryService<()> for AlwaysUnimplemented {
    type Response = ();
    type Future = Pin<Box<dyn Future<Output = Result<Response<()>, Status>> + Send>>;

    fn call(&mut self, _request: Request<()>) -> Self::Future {
        let status = self.status.clone();
        Box::pin(async move { Err(status) })
    }
}

fn parse_path(path: &str) -> Option<(String, String)> {
    let trimmed = path.trim_start_matches('/');
    let (service, method) = trimmed.rsplit_once('/')?;
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service.to_string(), method.to_string()))
}

#[derive(Clone)]
pub struct GrpcRouter {
    ctx: Arc<DispatchContext>,
    reflection: Option<ReflectionService>,
}

impl GrpcRouter {
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        Self { ctx, reflection: None }
    }

    pub fn with_reflection(ctx: Arc<DispatchContext>, reflection: Option<ReflectionService>) -> Self {
        Self { ctx, reflection }
    }
}

impl tower::Service<http::Request<Incoming>> for GrpcRouter {
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<Incoming>) -> Self::Future {
        let ctx = self.ctx.clone();
        if req.uri().path().starts_with(REFLECTION_PATH_PREFIX) {
            if let Some(reflection) = self.reflection.clone() {
                return Box::pin(async move {
                    let mut reflection = reflection;
                    Ok(tower::Service::call(&mut reflection, req).await.unwrap_or_else(|e: Infallible| match e {}))
                });
            }
        }
        Box::pin(async move { Ok(route(ctx, req).await) })
    }
}

async fn route(ctx: Arc<DispatchContext>, req: http::Request<Incoming>) -> http::Response<BoxBody> {
    let Some((service, method)) = parse_path(req.uri().path()) else {
        return unimplemented_response(Status::unimplemented("malformed gRPC path"), req).await;
    };

    let Some((_snapshot, resolved)) = ctx.resolve(&service, &method) else {
        let status = ctx.dispatch_unknown(&service, &method);
        return unimplemented_response(status, req).await;
    };

    match resolved.stream_kind {
        StreamKind::Unary => {
            let codec = DynamicServerCodec::new(resolved.input_desc.clone());
            let handler = UnaryHandler { ctx, resolved };
            Grpc::new(codec).unary(handler, req).await
        }
        StreamKind::ServerStreaming => {
            let codec = DynamicServerCodec::new(resolved.input_desc.clone());
            let handler = ServerStreamingHandler { ctx, resolved };
            Grpc::new(codec).server_streaming(handler, req).await
        }
        StreamKind::ClientStreaming => {
            let codec = DynamicServerCodec::new(resolved.input_desc.clone());
            let handler = ClientStreamingHandler { ctx, resolved };
            Grpc::new(codec).client_streaming(handler, req).await
        }
        StreamKind::Bidi => {
            let codec = DynamicServerCodec::new(resolved.input_desc.clone());
            let handler = BidiHandler { ctx, resolved };
            Grpc::new(codec).streaming(handler, req).await
        }
    }
}

async fn unimplemented_response(status: Status, req: http::Request<Incoming>) -> http::Response<BoxBody> {
    Grpc::new(UnitCodec::default())
        .unary(AlwaysUnimplemented { status }, req)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fully_qualified_service_and_method() {
        assert_eq!(
            parse_path("/pkg.UserService/GetUser"),
            Some(("pkg.UserService".to_string(), "GetUser".to_string()))
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(parse_path("/"), None);
        assert_eq!(parse_path("/onlyservice"), None);
        assert_eq!(parse_path(""), None);
    }
}
