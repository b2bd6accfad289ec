//! Per-`(service, method)` dispatch table built from a flat list of
//! `GrpcMethodConfig`s. Reconfiguration
//! replaces the whole table atomically — callers swap an `Arc<MethodTable>`, never mutate one in
//! place while serving.

use std::collections::HashMap;

use mockd_core::config::{GrpcMatchConfig, GrpcMethodConfig};
use mockd_core::json_proto::values_equal;

use crate::metadata::MetadataMultiMap;

#[derive(Default)]
pub struct MethodTable {
    by_method: HashMap<(String, String), Vec<GrpcMethodConfig>>,
}

impl MethodTable {
    pub fn new(configs: Vec<GrpcMethodConfig>) -> Self {
        let mut by_method: HashMap<(String, String), Vec<GrpcMethodConfig>> = HashMap::new();
        for cfg in configs {
            by_method
                .entry((cfg.service.clone(), cfg.method.clone()))
                .or_default()
                .push(cfg);
        }
        Self { by_method }
    }

    pub fn has_method(&self, service: &str, method: &str) -> bool {
        self.by_method
            .contains_key(&(service.to_string(), method.to_string()))
    }

    /// Select the first configured entry for `(service, method)` whose
    /// `match` predicate (if any) is satisfied.
    /// Entries without a `match` block match unconditionally and act as
    /// a catch-all when ordered last.
    pub fn select(
        &self,
        service: &str,
        method: &str,
        metadata: &MetadataMultiMap,
        request: &serde_json::Value,
    ) -> Option<&GrpcMethodConfig> {
        let candidates = self.by_method.get(&(service.to_string(), method.to_string()))?;
        candidates
            .iter()
            .find(|cfg| matches_predicate(cfg.r#match.as_ref(), metadata, request))
    }

    /// Bidirectional streaming matches using only metadata, before any
    /// request data is available.
    pub fn select_by_metadata(
        &self,
        service: &str,
        method: &str,
        metadata: &MetadataMultiMap,
    ) -> Option<&GrpcMethodConfig> {
        let candidates = self.by_method.get(&(service.to_string(), method.to_string()))?;
        candidates.iter().find(|cfg| {
            let Some(m) = &cfg.r#match else { return true };
            m.metadata.iter().all(|(k, v)| metadata.any_value_equals(k, v))
        })
    }
}

fn matches_predicate(
    m: Option<&GrpcMatchConfig>,
    metadata: &MetadataMultiMap,
    request: &serde_json::Value,
) -> bool {
    let Some(m) = m else { return true };
    if !m.metadata.iter().all(|(k, v)| metadata.any_value_equals(k, v)) {
        return false;
    }
    m.request.iter().all(|(k, expected)| {
        request
            .get(k)
            .map(|actual| values_equal(actual, expected))
            .unwrap_or(false)
    })
}
