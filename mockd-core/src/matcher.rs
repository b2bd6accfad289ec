//! The matcher kit: a single vocabulary of payload predicates
//! shared by the gRPC, WebSocket, and SOAP frontends. Matchers are pure
//! and side-effect-free; nothing here caches a match result, only the
//! compiled regex (built once, at construction, as the spec requires).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    Exact,
    Regex,
    Contains,
    Prefix,
    Suffix,
    Json,
    Xpath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Binary,
}

/// The declarative, serializable form of a matcher — what a config file
/// or admin API would hand the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub kind: MatcherKind,
    pub pattern: String,
    /// Dot-path for `json`, XPath expression for `xpath`. Unused by the
    /// other kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
}

/// The input a matcher is evaluated against. `Payload` covers exact,
/// regex, contains, prefix, suffix, and json (which decodes the payload
/// itself); `XPathText` covers the xpath kind, whose extraction happens
/// upstream (in the SOAP handler, which owns the parsed DOM) and is
/// handed in here as already-extracted, already-trimmed text.
pub enum MatchInput<'a> {
    Payload {
        text: &'a str,
        message_type: MessageType,
    },
    XPathText(&'a str),
}

/// A matcher with its regex (if any) precompiled.
pub struct CompiledMatcher {
    kind: MatcherKind,
    pattern: String,
    regex: Option<Regex>,
    path: Option<String>,
    message_type_filter: Option<MessageType>,
}

impl CompiledMatcher {
    pub fn compile(config: &MatcherConfig) -> Result<Self> {
        let regex = if config.kind == MatcherKind::Regex {
            Some(
                Regex::new(&config.pattern)
                    .map_err(|e| CoreError::Configuration(format!("bad regex pattern: {e}")))?,
            )
        } else {
            None
        };
        Ok(Self {
            kind: config.kind,
            pattern: config.pattern.clone(),
            regex,
            path: config.path.clone(),
            message_type_filter: config.message_type,
        })
    }

    pub fn kind(&self) -> MatcherKind {
        self.kind
    }

    pub fn matches(&self, input: &MatchInput<'_>) -> bool {
        match input {
            MatchInput::Payload { text, message_type } => {
                if let Some(filter) = self.message_type_filter {
                    if filter != *message_type {
                        return false;
                    }
                }
                self.matches_payload(text)
            }
            MatchInput::XPathText(text) => {
                if self.kind != MatcherKind::Xpath {
                    return false;
                }
                text.trim() == self.pattern.trim()
            }
        }
    }

    fn matches_payload(&self, payload: &str) -> bool {
        match self.kind {
            MatcherKind::Exact => payload == self.pattern,
            MatcherKind::Regex => self
                .regex
                .as_ref()
                .map(|re| re.is_match(payload))
                .unwrap_or(false),
            MatcherKind::Contains => payload.contains(&self.pattern),
            MatcherKind::Prefix => payload.starts_with(&self.pattern),
            MatcherKind::Suffix => payload.ends_with(&self.pattern),
            MatcherKind::Json => self.matches_json(payload),
            MatcherKind::Xpath => false,
        }
    }

    fn matches_json(&self, payload: &str) -> bool {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
            return false;
        };
        let Some(path) = &self.path else {
            return false;
        };
        let leaf = match walk_dot_path(&value, path) {
            Some(v) => v,
            None => return false,
        };
        json_value_equals_string(&leaf, &self.pattern)
    }
}

/// Walk a dot-path into a JSON value, stripping a leading `$.` if
/// present.
fn walk_dot_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() {
        return Some(value);
    }
    let mut cur = value;
    for segment in path.split('.') {
        cur = cur.get(segment)?;
    }
    Some(cur)
}

/// Compare a JSON leaf value against a string pattern with numeric
/// coercion (`42.0 == "42"`) and boolean stringification.
pub fn json_value_equals_string(value: &serde_json::Value, pattern: &str) -> bool {
    match value {
        serde_json::Value::String(s) => s == pattern,
        serde_json::Value::Bool(b) => b.to_string() == pattern,
        serde_json::Value::Number(n) => {
            if let Ok(pattern_num) = pattern.parse::<f64>() {
                if let Some(f) = n.as_f64() {
                    return f == pattern_num;
                }
            }
            n.to_string() == pattern
        }
        serde_json::Value::Null => pattern == "null",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(kind: MatcherKind, pattern: &str, path: Option<&str>) -> CompiledMatcher {
        CompiledMatcher::compile(&MatcherConfig {
            kind,
            pattern: pattern.to_string(),
            path: path.map(String::from),
            message_type: None,
        })
        .unwrap()
    }

    fn payload(text: &str) -> MatchInput<'_> {
        MatchInput::Payload {
            text,
            message_type: MessageType::Text,
        }
    }

    #[test]
    fn regex_matches_embedded_digits() {
        let m = compile(MatcherKind::Regex, "[0-9]+", None);
        assert!(m.matches(&payload("abc123")));
    }

    #[test]
    fn exact_is_case_sensitive() {
        let m = compile(MatcherKind::Exact, "Hello", None);
        assert!(!m.matches(&payload("hello")));
        assert!(m.matches(&payload("Hello")));
    }

    #[test]
    fn contains_prefix_suffix() {
        assert!(compile(MatcherKind::Contains, "ell", None).matches(&payload("hello")));
        assert!(compile(MatcherKind::Prefix, "hel", None).matches(&payload("hello")));
        assert!(compile(MatcherKind::Suffix, "llo", None).matches(&payload("hello")));
        assert!(!compile(MatcherKind::Prefix, "llo", None).matches(&payload("hello")));
    }

    #[test]
    fn json_dot_path_with_leading_dollar() {
        let m = compile(MatcherKind::Json, "subscribe", Some("$.type"));
        assert!(m.matches(&payload(r#"{"type":"subscribe","channel":"x"}"#)));
    }

    #[test]
    fn json_numeric_coercion() {
        let m = compile(MatcherKind::Json, "42", Some("count"));
        assert!(m.matches(&payload(r#"{"count":42.0}"#)));
    }

    #[test]
    fn message_type_filter_excludes_mismatched_frames() {
        let mut config = MatcherConfig {
            kind: MatcherKind::Exact,
            pattern: "hi".into(),
            path: None,
            message_type: Some(MessageType::Binary),
        };
        let m = CompiledMatcher::compile(&config).unwrap();
        assert!(!m.matches(&payload("hi")));
        config.message_type = Some(MessageType::Text);
        let m = CompiledMatcher::compile(&config).unwrap();
        assert!(m.matches(&payload("hi")));
    }

    #[test]
    fn xpath_compares_trimmed_extracted_text() {
        let m = compile(MatcherKind::Xpath, "0", Some("//Divide/b"));
        assert!(m.matches(&MatchInput::XPathText("  0  ")));
        assert!(!m.matches(&MatchInput::XPathText("1")));
    }
}
