//! Error enum for the WebSocket engine, following the same hand-written
//! shape as `mockd-grpc::error`: one public enum, manual
//! `Display`/`Error`, `From` for the inner error types this crate
//! actually produces.

use std::fmt;

use mockd_core::error::CoreError;
use mockd_core::group_index::GroupIndexError;

#[derive(Debug)]
pub enum WsError {
    AlreadyRunning,
    Bind(std::io::Error),
    TooManyConnections,
    TooManyGroups,
    ConnectionNotFound,
    Core(CoreError),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsError::AlreadyRunning => write!(f, "WebSocket server is already running"),
            WsError::Bind(e) => write!(f, "failed to bind WebSocket listener: {e}"),
            WsError::TooManyConnections => write!(f, "endpoint connection cap exceeded"),
            WsError::TooManyGroups => write!(f, "connection already belongs to 100 groups"),
            WsError::ConnectionNotFound => write!(f, "no connection with that id is registered"),
            WsError::Core(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WsError {}

impl From<CoreError> for WsError {
    fn from(e: CoreError) -> Self {
        WsError::Core(e)
    }
}

impl From<GroupIndexError> for WsError {
    fn from(e: GroupIndexError) -> Self {
        match e {
            GroupIndexError::TooManyGroups => WsError::TooManyGroups,
        }
    }
}

pub type Result<T> = std::result::Result<T, WsError>;
