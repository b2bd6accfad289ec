//! Shared plumbing for the mockd multi-protocol mock server: the
//! matcher kit, the metrics registry, the proto schema loader and its
//! canonical-JSON bridge to dynamic protobuf messages, the request-log
//! sink interface, and the external collaborator traits consumed by the
//! gRPC/WebSocket/SOAP frontends.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod group_index;
pub mod json_proto;
pub mod matcher;
pub mod metrics;
pub mod metrics_http;
pub mod proto;
pub mod request_log;
