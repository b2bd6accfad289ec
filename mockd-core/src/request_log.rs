//! The request-log sink collaborator interface plus a
//! bounded in-memory implementation used by tests and the demo binary.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

/// Bodies are truncated to this many bytes before logging.
pub const MAX_LOGGED_BODY_BYTES: usize = 10 * 1024;
const TRUNCATION_SUFFIX: &str = "…(truncated)";

/// Truncate `body` to at most `max` bytes (on a UTF-8 boundary),
/// appending the visible truncation marker when truncation occurred.
pub fn truncate_body(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &body[..end], TRUNCATION_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Grpc,
    WebSocket,
    Soap,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::WebSocket => "websocket",
            Protocol::Soap => "soap",
        }
    }
}

/// Protocol-specific submeta carried on every log entry.
#[derive(Debug, Clone)]
pub enum SubMeta {
    Grpc {
        service: String,
        method: String,
        stream_kind: &'static str,
        status: String,
    },
    Soap {
        operation: String,
        action: Option<String>,
        version: &'static str,
        fault: bool,
    },
    WebSocket {
        connection_id: String,
        direction: &'static str,
        message_type: &'static str,
        close_code: Option<u16>,
    },
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: SystemTime,
    pub protocol: Protocol,
    pub method: String,
    pub path: String,
    pub request_body: String,
    pub response_body: String,
    pub status: String,
    pub duration_ms: u64,
    pub submeta: SubMeta,
}

impl LogEntry {
    /// Build an entry with request/response bodies already truncated to
    /// the spec's bound.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        protocol: Protocol,
        method: impl Into<String>,
        path: impl Into<String>,
        request_body: &str,
        response_body: &str,
        status: impl Into<String>,
        duration_ms: u64,
        submeta: SubMeta,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: SystemTime::now(),
            protocol,
            method: method.into(),
            path: path.into(),
            request_body: truncate_body(request_body, MAX_LOGGED_BODY_BYTES),
            response_body: truncate_body(response_body, MAX_LOGGED_BODY_BYTES),
            status: status.into(),
            duration_ms,
            submeta,
        }
    }
}

/// `log(entry)` — the external request-log sink collaborator interface.
/// Implementations must not block the caller for long; the core does not
/// buffer on their behalf beyond the channel an implementation chooses
/// to own.
pub trait RequestLogSink: Send + Sync {
    fn log(&self, entry: LogEntry);
}

/// A bounded ring-buffer sink, useful for tests and the demo binary: it
/// never grows past `capacity` entries, dropping the oldest first.
pub struct InMemorySink {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl InMemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestLogSink for InMemorySink {
    fn log(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
}

/// A sink that discards everything; used where a collaborator is
/// required by an API surface but the caller does not want logging.
pub struct NoopSink;

impl RequestLogSink for NoopSink {
    fn log(&self, _entry: LogEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_body_is_untouched() {
        assert_eq!(truncate_body("hello", 10), "hello");
    }

    #[test]
    fn long_body_is_truncated_with_marker() {
        let body = "x".repeat(20);
        let truncated = truncate_body(&body, 10);
        assert!(truncated.starts_with(&"x".repeat(10)));
        assert!(truncated.ends_with("…(truncated)"));
    }

    #[test]
    fn in_memory_sink_bounds_capacity() {
        let sink = InMemorySink::new(2);
        for i in 0..5 {
            sink.log(LogEntry::new(
                i.to_string(),
                Protocol::Grpc,
                "GetUser",
                "/pkg.Svc/GetUser",
                "",
                "",
                "OK",
                0,
                SubMeta::Grpc {
                    service: "pkg.Svc".into(),
                    method: "GetUser".into(),
                    stream_kind: "unary",
                    status: "OK".into(),
                },
            ));
        }
        assert_eq!(sink.len(), 2);
        let snapshot = sink.snapshot();
        assert_eq!(snapshot[0].id, "3");
        assert_eq!(snapshot[1].id, "4");
    }
}
