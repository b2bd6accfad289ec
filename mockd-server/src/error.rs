use std::fmt;

#[derive(Debug)]
pub enum StackError {
    Grpc(mockd_grpc::error::GrpcError),
    Ws(mockd_ws::error::WsError),
    Soap(mockd_soap::error::SoapError),
    Core(mockd_core::error::CoreError),
    MetricsBind(std::io::Error),
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackError::Grpc(e) => write!(f, "gRPC subsystem: {e}"),
            StackError::Ws(e) => write!(f, "WebSocket subsystem: {e}"),
            StackError::Soap(e) => write!(f, "SOAP subsystem: {e}"),
            StackError::Core(e) => write!(f, "{e}"),
            StackError::MetricsBind(e) => write!(f, "failed to bind metrics listener: {e}"),
        }
    }
}

impl std::error::Error for StackError {}

impl From<mockd_grpc::error::GrpcError> for StackError {
    fn from(e: mockd_grpc::error::GrpcError) -> Self {
        StackError::Grpc(e)
    }
}

impl From<mockd_ws::error::WsError> for StackError {
    fn from(e: mockd_ws::error::WsError) -> Self {
        StackError::Ws(e)
    }
}

impl From<mockd_soap::error::SoapError> for StackError {
    fn from(e: mockd_soap::error::SoapError) -> Self {
        StackError::Soap(e)
    }
}

impl From<mockd_core::error::CoreError> for StackError {
    fn from(e: mockd_core::error::CoreError) -> Self {
        StackError::Core(e)
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
