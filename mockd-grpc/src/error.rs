use std::fmt;

use mockd_core::error::CoreError;

/// Errors produced by the gRPC mock server itself, on top of whatever
/// `mockd-core` reports for schema/matcher/metric problems.
#[derive(Debug)]
pub enum GrpcError {
    /// `Start` was called while a previous `Start` is still active.
    AlreadyRunning,

    /// Binding the configured listener address failed.
    Bind(std::io::Error),

    /// A core error (bad schema, bad matcher, ...) surfaced during setup.
    Core(CoreError),
}

impl fmt::Display for GrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrpcError::AlreadyRunning => write!(f, "gRPC server is already running"),
            GrpcError::Bind(err) => write!(f, "failed to bind gRPC listener: {err}"),
            GrpcError::Core(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for GrpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GrpcError::Bind(err) => Some(err),
            GrpcError::Core(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CoreError> for GrpcError {
    fn from(err: CoreError) -> Self {
        GrpcError::Core(err)
    }
}

pub type Result<T> = std::result::Result<T, GrpcError>;
