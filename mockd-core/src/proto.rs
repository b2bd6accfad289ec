//! Proto schema: parsed descriptor files indexed by fully-qualified
//! service name. Built once per reconfiguration
//! and immutable thereafter — callers replace the whole `Arc<ProtoSchema>`
//! to reconfigure rather than mutating one in place.

use std::collections::BTreeMap;
use std::path::Path;

use prost_reflect::{DescriptorPool, MessageDescriptor};

use crate::error::{CoreError, Result};

/// The pairing of `clientStreaming`/`serverStreaming` booleans that
/// distinguishes the four RPC shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidi,
}

impl StreamKind {
    pub fn from_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => StreamKind::Unary,
            (false, true) => StreamKind::ServerStreaming,
            (true, false) => StreamKind::ClientStreaming,
            (true, true) => StreamKind::Bidi,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MethodSchema {
    pub name: String,
    pub full_name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodSchema {
    pub fn stream_kind(&self) -> StreamKind {
        StreamKind::from_flags(self.client_streaming, self.server_streaming)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSchema {
    pub name: String,
    pub methods: BTreeMap<String, MethodSchema>,
}

/// A set of parsed descriptor files indexed by fully-qualified service
/// name. Invariant: method names are unique within a service, service
/// names are unique within the schema — both hold automatically here
/// because they come straight from the protobuf descriptor pool, which
/// itself enforces uniqueness at compile time.
pub struct ProtoSchema {
    pool: DescriptorPool,
    services: BTreeMap<String, ServiceSchema>,
}

impl ProtoSchema {
    /// Parse and compile `.proto` source files (no `protoc` binary
    /// required — `protox` does the compilation in-process).
    pub fn from_proto_files<P: AsRef<Path>>(proto_files: &[P], includes: &[P]) -> Result<Self> {
        let proto_files: Vec<&Path> = proto_files.iter().map(AsRef::as_ref).collect();
        let includes: Vec<&Path> = if includes.is_empty() {
            vec![Path::new(".")]
        } else {
            includes.iter().map(AsRef::as_ref).collect()
        };
        let fds = protox::compile(proto_files, includes)
            .map_err(|e| CoreError::ProtoParse(format!("failed to compile proto files: {e}")))?;
        Self::from_file_descriptor_set(fds)
    }

    pub fn from_file_descriptor_set(fds: prost_types::FileDescriptorSet) -> Result<Self> {
        let pool = DescriptorPool::from_file_descriptor_set(fds)
            .map_err(|e| CoreError::ProtoParse(format!("failed to build descriptor pool: {e}")))?;
        Self::from_pool(pool)
    }

    pub fn from_pool(pool: DescriptorPool) -> Result<Self> {
        let mut services = BTreeMap::new();
        for svc in pool.services() {
            let mut methods = BTreeMap::new();
            for method in svc.methods() {
                methods.insert(
                    method.name().to_string(),
                    MethodSchema {
                        name: method.name().to_string(),
                        full_name: method.full_name().to_string(),
                        input_type: method.input().full_name().to_string(),
                        output_type: method.output().full_name().to_string(),
                        client_streaming: method.is_client_streaming(),
                        server_streaming: method.is_server_streaming(),
                    },
                );
            }
            services.insert(
                svc.full_name().to_string(),
                ServiceSchema {
                    name: svc.full_name().to_string(),
                    methods,
                },
            );
        }
        Ok(Self { pool, services })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceSchema> {
        self.services.values()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSchema> {
        self.services.get(name)
    }

    pub fn method(&self, service: &str, method: &str) -> Option<&MethodSchema> {
        self.services.get(service)?.methods.get(method)
    }

    pub fn input_descriptor(&self, service: &str, method: &str) -> Option<MessageDescriptor> {
        let m = self.method(service, method)?;
        self.pool.get_message_by_name(&m.input_type)
    }

    pub fn output_descriptor(&self, service: &str, method: &str) -> Option<MessageDescriptor> {
        let m = self.method(service, method)?;
        self.pool.get_message_by_name(&m.output_type)
    }

    /// The raw file descriptor set backing this schema, for handing to
    /// a gRPC server reflection service.
    pub fn file_descriptor_set(&self) -> prost_types::FileDescriptorSet {
        prost_types::FileDescriptorSet {
            file: self.pool.files().map(|f| f.file_descriptor_proto().clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
        MethodDescriptorProto, ServiceDescriptorProto,
    };

    fn field(name: &str, number: i32, kind: i32) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(kind),
            label: Some(1),
            ..Default::default()
        }
    }

    fn fixture_pool() -> DescriptorPool {
        let request = DescriptorProto {
            name: Some("GetUserRequest".into()),
            field: vec![field("id", 1, 9)], // TYPE_STRING
            ..Default::default()
        };
        let response = DescriptorProto {
            name: Some("GetUserResponse".into()),
            field: vec![field("id", 1, 9), field("name", 2, 9)],
            ..Default::default()
        };
        let method = MethodDescriptorProto {
            name: Some("GetUser".into()),
            input_type: Some(".fixture.GetUserRequest".into()),
            output_type: Some(".fixture.GetUserResponse".into()),
            client_streaming: Some(false),
            server_streaming: Some(false),
            ..Default::default()
        };
        let service = ServiceDescriptorProto {
            name: Some("UserService".into()),
            method: vec![method],
            ..Default::default()
        };
        let file = FileDescriptorProto {
            name: Some("fixture.proto".into()),
            package: Some("fixture".into()),
            message_type: vec![request, response],
            service: vec![service],
            syntax: Some("proto3".into()),
            ..Default::default()
        };
        DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] }).unwrap()
    }

    #[test]
    fn schema_indexes_service_and_method_by_name() {
        let schema = ProtoSchema::from_pool(fixture_pool()).unwrap();
        let svc = schema.service("fixture.UserService").expect("service present");
        let method = svc.methods.get("GetUser").expect("method present");
        assert_eq!(method.stream_kind(), StreamKind::Unary);
        assert_eq!(method.input_type, "fixture.GetUserRequest");
    }

    #[test]
    fn descriptors_resolve_through_the_pool() {
        let schema = ProtoSchema::from_pool(fixture_pool()).unwrap();
        let input = schema
            .input_descriptor("fixture.UserService", "GetUser")
            .expect("input descriptor resolves");
        assert_eq!(input.full_name(), "fixture.GetUserRequest");
    }

    #[test]
    fn stream_kind_from_flags_covers_all_four_shapes() {
        assert_eq!(StreamKind::from_flags(false, false), StreamKind::Unary);
        assert_eq!(StreamKind::from_flags(false, true), StreamKind::ServerStreaming);
        assert_eq!(StreamKind::from_flags(true, false), StreamKind::ClientStreaming);
        assert_eq!(StreamKind::from_flags(true, true), StreamKind::Bidi);
    }
}
