//! The dynamic gRPC mock server: schema-driven dispatch for
//! unary and all three streaming shapes, typed status/detail errors, and
//! per-method request/metadata matching — with no generated code for any
//! particular `.proto` service.

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod metadata;
pub mod method_table;
pub mod reflection;
pub mod server;
pub mod service;
pub mod status;

pub use error::{GrpcError, Result};
pub use server::GrpcServer;
