//! Case-insensitive multi-map projection of incoming gRPC metadata, used by the request-match predicate (step 5 / §4.1
//! "Request match predicate": "any-value-equals semantics within
//! multi-value headers").

use std::collections::HashMap;

use tonic::metadata::{KeyAndValueRef, MetadataMap};

#[derive(Debug, Default, Clone)]
pub struct MetadataMultiMap(HashMap<String, Vec<String>>);

impl MetadataMultiMap {
    pub fn from_metadata(md: &MetadataMap) -> Self {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for kv in md.iter() {
            if let KeyAndValueRef::Ascii(key, value) = kv {
                if let Ok(text) = value.to_str() {
                    map.entry(key.as_str().to_ascii_lowercase())
                        .or_default()
                        .push(text.to_string());
                }
            }
        }
        Self(map)
    }

    /// True if `key` is present (case-insensitively) with at least one
    /// value equal to `expected`.
    pub fn any_value_equals(&self, key: &str, expected: &str) -> bool {
        self.0
            .get(&key.to_ascii_lowercase())
            .map(|values| values.iter().any(|v| v == expected))
            .unwrap_or(false)
    }
}
