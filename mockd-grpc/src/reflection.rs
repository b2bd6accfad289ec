//! Server reflection. Built once from the schema snapshot the
//! server started with; a reconfiguration that changes the schema
//! leaves reflection describing the old one until the next restart —
//! the same carve-out that lets in-flight calls finish against the
//! snapshot they started with, extended here to this one read-only
//! descriptor service.

use std::convert::Infallible;

use hyper::body::Incoming;
use tonic::body::BoxBody;
use tower::util::BoxCloneService;

use mockd_core::proto::ProtoSchema;

pub type ReflectionService = BoxCloneService<http::Request<Incoming>, http::Response<BoxBody>, Infallible>;

/// Build the v1 reflection service over the schema's current file
/// descriptor set. Returns `None` (logged, not fatal) if the reflection
/// service itself fails to assemble from the descriptor set.
pub fn build(schema: &ProtoSchema) -> Option<ReflectionService> {
    let fds = schema.file_descriptor_set();
    match tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(fds)
        .build_v1()
    {
        Ok(service) => Some(BoxCloneService::new(service)),
        Err(err) => {
            tracing::warn!(%err, "failed to build gRPC reflection service; continuing without it");
            None
        }
    }
}

pub const REFLECTION_PATH_PREFIX: &str = "/grpc.reflection.v1.ServerReflection/";
