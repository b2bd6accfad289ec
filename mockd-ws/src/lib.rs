//! The WebSocket mock endpoint engine: connection lifecycle over an
//! HTTP upgrade, matcher-driven and scripted-scenario message routing,
//! group-based broadcast, and deterministic recording replay.

pub mod connection;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod manager;
pub mod registry;
pub mod replay;
pub mod scenario;
pub mod server;

pub use error::{Result, WsError};
pub use server::WsServer;
