//! End-to-end unary dispatch: a real `GrpcServer` bound to an ephemeral
//! port, driven by a real `tonic` channel and a dynamic client codec
//! adapted from the reflection client's own `DynamicCodec`
//! (`grpcurl-core/src/codec.rs`), rather than by calling into
//! `mockd-grpc`'s internals directly.

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use tonic::client::Grpc;
use tonic::codec::{BufferSettings, Codec, Decoder, Encoder};
use tonic::transport::Channel;
use tonic::{Request, Status};

use mockd_core::config::{GrpcMatchConfig, GrpcMethodConfig};
use mockd_core::metrics::{DefaultMetrics, Registry};
use mockd_core::proto::ProtoSchema;
use mockd_core::request_log::InMemorySink;

use mockd_grpc::server::GrpcServer;

fn field(name: &str, number: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.into()),
        number: Some(number),
        r#type: Some(9), // TYPE_STRING
        label: Some(1),
        ..Default::default()
    }
}

fn fixture_pool() -> DescriptorPool {
    let request = DescriptorProto {
        name: Some("GetUserRequest".into()),
        field: vec![field("id", 1)],
        ..Default::default()
    };
    let response = DescriptorProto {
        name: Some("GetUserResponse".into()),
        field: vec![field("id", 1), field("name", 2)],
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

struct DynamicCodec {
    response_desc: MessageDescriptor,
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            response_desc: self.response_desc.clone(),
        }
    }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut tonic::codec::EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst).map_err(|e| Status::internal(e.to_string()))
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

struct DynamicDecoder {
    response_desc: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut tonic::codec::DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let msg = DynamicMessage::decode(self.response_desc.clone(), src)
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Some(msg))
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

#[tokio::test]
async fn unary_call_returns_the_configured_response() {
    let schema = ProtoSchema::from_pool(fixture_pool()).unwrap();
    let input_desc = schema.input_descriptor("fixture.UserService", "GetUser").unwrap();
    let output_desc = schema.output_descriptor("fixture.UserService", "GetUser").unwrap();

    let methods = vec![GrpcMethodConfig {
        service: "fixture.UserService".into(),
        method: "GetUser".into(),
        response: Some(serde_json::json!({"id": "user-123", "name": "Ada Lovelace"})),
        r#match: Some(GrpcMatchConfig {
            metadata: Default::default(),
            request: {
                let mut m = std::collections::HashMap::new();
                m.insert("id".to_string(), serde_json::json!("user-123"));
                m
            },
        }),
        ..Default::default()
    }];

    let registry = Registry::new();
    let metrics = Arc::new(DefaultMetrics::register(&registry));
    let log_sink = Arc::new(InMemorySink::new(16));
    let server = GrpcServer::new(schema, methods, metrics, log_sink, false);
    let addr = server.start(0).await.unwrap();

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();

    let mut request = DynamicMessage::new(input_desc);
    request.set_field_by_name("id", prost_reflect::Value::String("user-123".into()));

    let mut client = Grpc::new(channel);
    client.ready().await.unwrap();
    let path = http::uri::PathAndQuery::from_static("/fixture.UserService/GetUser");
    let response = client
        .unary(Request::new(request), path, DynamicCodec { response_desc: output_desc })
        .await
        .expect("unary call succeeds");

    let msg = response.into_inner();
    assert_eq!(msg.get_field_by_name("name").unwrap().as_str(), Some("Ada Lovelace"));

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn unmatched_method_is_unimplemented() {
    let schema = ProtoSchema::from_pool(fixture_pool()).unwrap();
    let registry = Registry::new();
    let metrics = Arc::new(DefaultMetrics::register(&registry));
    let log_sink = Arc::new(InMemorySink::new(16));
    let server = GrpcServer::new(schema, vec![], metrics, log_sink, false);
    let addr = server.start(0).await.unwrap();

    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let output_desc = ProtoSchema::from_pool(fixture_pool())
        .unwrap()
        .output_descriptor("fixture.UserService", "GetUser")
        .unwrap();
    let input_desc = ProtoSchema::from_pool(fixture_pool())
        .unwrap()
        .input_descriptor("fixture.UserService", "GetUser")
        .unwrap();

    let mut client = Grpc::new(channel);
    client.ready().await.unwrap();
    let path = http::uri::PathAndQuery::from_static("/fixture.UserService/GetUser");
    let err = client
        .unary(Request::new(DynamicMessage::new(input_desc)), path, DynamicCodec { response_desc: output_desc })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unimplemented);

    server.stop(Duration::from_secs(5)).await;
}
