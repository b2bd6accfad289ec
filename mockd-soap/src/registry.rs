//! The set of compiled operations served at once, keyed for the two
//! dispatch lookups the spec requires: by declared SOAPAction, and by
//! operation name (which doubles as the body-element tag to try, spec
//! §4.3 "Operation dispatch"). Atomically swappable on reconfiguration,
//! mirroring `mockd-ws::registry::EndpointTable`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mockd_core::config::SoapOperationConfig;
use mockd_core::error::{CoreError, Result};

use crate::operation::CompiledOperation;

pub struct OperationTable {
    operations: Vec<CompiledOperation>,
    by_action: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl OperationTable {
    pub fn compile(configs: Vec<SoapOperationConfig>) -> Result<Self> {
        let mut operations = Vec::with_capacity(configs.len());
        let mut by_action = HashMap::new();
        let mut by_name = HashMap::new();
        for config in configs {
            let name = config.name.clone();
            if by_name.contains_key(&name) {
                return Err(CoreError::Configuration(format!(
                    "duplicate SOAP operation name: {name}"
                )));
            }
            let action = config.soap_action.clone();
            let idx = operations.len();
            operations.push(CompiledOperation::compile(config));
            by_name.insert(name, idx);
            if let Some(action) = action {
                by_action.insert(action, idx);
            }
        }
        Ok(Self {
            operations,
            by_action,
            by_name,
        })
    }

    pub fn by_action(&self, action: &str) -> Option<&CompiledOperation> {
        self.by_action.get(action).map(|&i| &self.operations[i])
    }

    /// Exact tag first, namespace-stripped local name second.
    pub fn by_body_tag(&self, tag: &str, local_name: &str) -> Option<&CompiledOperation> {
        self.by_name
            .get(tag)
            .or_else(|| self.by_name.get(local_name))
            .map(|&i| &self.operations[i])
    }
}

pub struct OperationSnapshotCell(RwLock<Arc<OperationTable>>);

impl OperationSnapshotCell {
    pub fn new(table: OperationTable) -> Self {
        Self(RwLock::new(Arc::new(table)))
    }

    pub fn load(&self) -> Arc<OperationTable> {
        self.0.read().unwrap().clone()
    }

    pub fn store(&self, table: OperationTable) {
        *self.0.write().unwrap() = Arc::new(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(name: &str, action: Option<&str>) -> SoapOperationConfig {
        SoapOperationConfig {
            name: name.to_string(),
            soap_action: action.map(String::from),
            match_xpath: None,
            response_template: Some("<ok/>".to_string()),
            fault: None,
            stateful: None,
        }
    }

    #[test]
    fn looks_up_by_action_then_by_tag() {
        let table = OperationTable::compile(vec![op("GetUser", Some("urn:GetUser"))]).unwrap();
        assert!(table.by_action("urn:GetUser").is_some());
        assert!(table.by_body_tag("tns:GetUser", "GetUser").is_some());
        assert!(table.by_body_tag("Other", "Other").is_none());
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = OperationTable::compile(vec![op("GetUser", None), op("GetUser", None)]);
        assert!(err.is_err());
    }
}
