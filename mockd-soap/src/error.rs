//! Error enum for the SOAP handler, following the same hand-written
//! shape as `mockd-grpc::error`/`mockd-ws::error`: one public enum,
//! manual `Display`/`Error`, `From` for the inner error types this
//! crate actually produces.

use std::fmt;

use mockd_core::error::CoreError;

#[derive(Debug)]
pub enum SoapError {
    AlreadyRunning,
    Bind(std::io::Error),
    /// The request body exceeded the 10 MiB cap.
    BodyTooLarge,
    /// The body did not parse as XML, or had no `Envelope` root.
    MalformedEnvelope(String),
    Core(CoreError),
}

impl fmt::Display for SoapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoapError::AlreadyRunning => write!(f, "SOAP server is already running"),
            SoapError::Bind(e) => write!(f, "failed to bind SOAP listener: {e}"),
            SoapError::BodyTooLarge => write!(f, "request body exceeds the 10 MiB cap"),
            SoapError::MalformedEnvelope(msg) => write!(f, "malformed SOAP envelope: {msg}"),
            SoapError::Core(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SoapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SoapError::Bind(e) => Some(e),
            SoapError::Core(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CoreError> for SoapError {
    fn from(e: CoreError) -> Self {
        SoapError::Core(e)
    }
}

pub type Result<T> = std::result::Result<T, SoapError>;
