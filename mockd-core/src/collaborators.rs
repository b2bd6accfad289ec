//! The external collaborator interfaces the core consumes but does not
//! implement in production: a template engine, a recording
//! hook, and a stateful resource executor. Default, side-effect-free
//! implementations are provided here for testing the core in isolation;
//! a real deployment wires in its own.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::config::StatefulAction;

/// `process(text, context) -> text` — must be side-effect-free.
/// Template rendering of scalar variables is an out-of-scope concern
///; this trait exists only so the SOAP handler's
/// `{{var}}` substitution step has somewhere to call out to.
pub trait TemplateEngine: Send + Sync {
    fn process(&self, text: &str, context: &HashMap<String, serde_json::Value>) -> String;
}

/// Returns the input unchanged. Used where no real template engine is
/// wired in; the `{{xpath:...}}` substitutions the SOAP handler itself
/// owns still happen before this is called.
pub struct NoopTemplateEngine;

impl TemplateEngine for NoopTemplateEngine {
    fn process(&self, text: &str, _context: &HashMap<String, serde_json::Value>) -> String {
        text.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMessageType {
    Text,
    Binary,
}

/// One frame of a stream recording.
#[derive(Debug, Clone)]
pub struct RecordedFrame {
    pub relative_millis: u64,
    pub direction: Direction,
    pub message_type: FrameMessageType,
    pub payload: Vec<u8>,
}

/// `onFrame`/`onClose`/`onComplete` — called from the connection task.
/// Implementations must be non-blocking or bounded, else they
/// throttle the read loop they're attached to.
pub trait RecordingHook: Send + Sync {
    fn on_frame(&self, frame: &RecordedFrame);
    fn on_close(&self, code: u16, reason: &str);
    fn on_complete(&self);
}

pub struct NoopRecordingHook;

impl RecordingHook for NoopRecordingHook {
    fn on_frame(&self, _frame: &RecordedFrame) {}
    fn on_close(&self, _code: u16, _reason: &str) {}
    fn on_complete(&self) {}
}

/// The result shape the stateful executor can return for one `execute`
/// call.
pub enum StatefulResult {
    Item(serde_json::Value),
    Items {
        items: Vec<serde_json::Value>,
        total: u64,
        count: u64,
        offset: u64,
        limit: u64,
    },
    Success,
    Fault { code: String, message: String },
}

/// `execute(request) -> result`, dispatched per declared `(resource,
/// action)` pair.
pub trait StatefulExecutor: Send + Sync {
    fn execute(
        &self,
        resource: &str,
        action: StatefulAction,
        request: &serde_json::Value,
    ) -> StatefulResult;
}

/// A minimal in-process CRUD store keyed by each resource's `id` field,
/// useful for exercising the SOAP handler's stateful branch without a
/// real backend wired in.
pub struct InMemoryStatefulExecutor {
    store: Mutex<HashMap<String, Vec<serde_json::Value>>>,
}

impl Default for InMemoryStatefulExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStatefulExecutor {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }

    fn next_id(items: &[serde_json::Value]) -> String {
        format!(
            "{}-{}",
            items.len() + 1,
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0)
        )
    }
}

impl StatefulExecutor for InMemoryStatefulExecutor {
    fn execute(
        &self,
        resource: &str,
        action: StatefulAction,
        request: &serde_json::Value,
    ) -> StatefulResult {
        let mut store = self.store.lock().unwrap();
        let items = store.entry(resource.to_string()).or_default();
        match action {
            StatefulAction::List => StatefulResult::Items {
                items: items.clone(),
                total: items.len() as u64,
                count: items.len() as u64,
                offset: 0,
                limit: items.len() as u64,
            },
            StatefulAction::Get => {
                let id = request.get("id").and_then(|v| v.as_str());
                match id.and_then(|id| items.iter().find(|item| item.get("id").and_then(|v| v.as_str()) == Some(id))) {
                    Some(item) => StatefulResult::Item(item.clone()),
                    None => StatefulResult::Fault {
                        code: "soap:Client".into(),
                        message: format!("{resource} not found"),
                    },
                }
            }
            StatefulAction::Create => {
                let mut item = request.clone();
                let id = Self::next_id(items);
                if let serde_json::Value::Object(map) = &mut item {
                    map.insert("id".into(), serde_json::Value::String(id));
                }
                items.push(item.clone());
                StatefulResult::Item(item)
            }
            StatefulAction::Update | StatefulAction::Patch => {
                let id = request.get("id").and_then(|v| v.as_str()).map(String::from);
                match id.and_then(|id| {
                    items
                        .iter_mut()
                        .find(|item| item.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
                }) {
                    Some(item) => {
                        *item = request.clone();
                        StatefulResult::Item(item.clone())
                    }
                    None => StatefulResult::Fault {
                        code: "soap:Client".into(),
                        message: format!("{resource} not found"),
                    },
                }
            }
            StatefulAction::Delete => {
                let id = request.get("id").and_then(|v| v.as_str());
                let before = items.len();
                items.retain(|item| item.get("id").and_then(|v| v.as_str()) != id);
                if items.len() < before {
                    StatefulResult::Success
                } else {
                    StatefulResult::Fault {
                        code: "soap:Client".into(),
                        message: format!("{resource} not found"),
                    }
                }
            }
            StatefulAction::Custom => StatefulResult::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_template_engine_returns_input_unchanged() {
        let engine = NoopTemplateEngine;
        let out = engine.process("hello {{name}}", &HashMap::new());
        assert_eq!(out, "hello {{name}}");
    }

    #[test]
    fn in_memory_executor_create_then_get() {
        let executor = InMemoryStatefulExecutor::new();
        let created = executor.execute(
            "user",
            StatefulAction::Create,
            &serde_json::json!({"name": "Ada"}),
        );
        let id = match created {
            StatefulResult::Item(item) => item["id"].as_str().unwrap().to_string(),
            _ => panic!("expected item"),
        };
        let fetched = executor.execute("user", StatefulAction::Get, &serde_json::json!({"id": id}));
        assert!(matches!(fetched, StatefulResult::Item(_)));
    }

    #[test]
    fn in_memory_executor_get_missing_is_fault() {
        let executor = InMemoryStatefulExecutor::new();
        let result = executor.execute("user", StatefulAction::Get, &serde_json::json!({"id": "nope"}));
        assert!(matches!(result, StatefulResult::Fault { .. }));
    }
}
