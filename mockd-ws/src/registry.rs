//! The set of compiled endpoints served at once, and the atomic
//! snapshot-replacement mechanism reconfiguration uses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use mockd_core::config::WsEndpointConfig;
use mockd_core::error::Result;

use crate::endpoint::WsEndpoint;

pub struct EndpointTable {
    by_path: HashMap<String, Arc<WsEndpoint>>,
}

impl EndpointTable {
    pub fn compile(configs: Vec<WsEndpointConfig>) -> Result<Self> {
        let mut by_path = HashMap::with_capacity(configs.len());
        for config in configs {
            let path = config.path.clone();
            by_path.insert(path, Arc::new(WsEndpoint::compile(config)?));
        }
        Ok(Self { by_path })
    }

    pub fn get(&self, path: &str) -> Option<Arc<WsEndpoint>> {
        self.by_path.get(path).cloned()
    }
}

pub struct EndpointSnapshotCell(RwLock<Arc<EndpointTable>>);

impl EndpointSnapshotCell {
    pub fn new(table: EndpointTable) -> Self {
        Self(RwLock::new(Arc::new(table)))
    }

    pub fn load(&self) -> Arc<EndpointTable> {
        self.0.read().unwrap().clone()
    }

    pub fn store(&self, table: EndpointTable) {
        *self.0.write().unwrap() = Arc::new(table);
    }
}
