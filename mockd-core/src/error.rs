use std::fmt;

/// Errors produced by the shared matcher kit, metrics registry, and
/// proto-schema loader.
#[derive(Debug)]
pub enum CoreError {
    /// A configuration value was missing or malformed at startup.
    Configuration(String),

    /// A `.proto` file failed to parse or compile.
    ProtoParse(String),

    /// A dynamic message could not be built from a JSON payload, or could
    /// not be projected to one.
    MessageEncode(String),

    /// A metric operation violated an invariant (e.g. a negative counter
    /// increment).
    Metric(String),

    /// An I/O error (reading a proto file, a recording, ...).
    Io(std::io::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            CoreError::ProtoParse(msg) => write!(f, "proto parse error: {msg}"),
            CoreError::MessageEncode(msg) => write!(f, "message encode error: {msg}"),
            CoreError::Metric(msg) => write!(f, "metric error: {msg}"),
            CoreError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let err = CoreError::Configuration("missing id".into());
        assert_eq!(err.to_string(), "configuration error: missing id");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: CoreError = io_err.into();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
