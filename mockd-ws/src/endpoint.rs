//! A compiled WebSocket endpoint: the
//! config plus precompiled matchers and the live connection counter the
//! upgrade handler enforces `connectionCount <= maxConnections` against.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mockd_core::config::WsEndpointConfig;
use mockd_core::error::Result;
use mockd_core::matcher::CompiledMatcher;

use crate::scenario::ScenarioRuntime;

pub struct CompiledWsMatcher {
    pub matcher: CompiledMatcher,
    pub response: Option<String>,
    pub no_response: bool,
}

pub struct WsEndpoint {
    pub config: WsEndpointConfig,
    pub matchers: Vec<CompiledWsMatcher>,
    /// Only populated when `resetOnReconnect` is false: later
    /// connections inherit this shared runtime's cursor instead of
    /// starting at step 0.
    shared_scenario: Mutex<Option<Arc<ScenarioRuntime>>>,
    connection_count: AtomicUsize,
}

impl WsEndpoint {
    pub fn compile(config: WsEndpointConfig) -> Result<Self> {
        let mut matchers = Vec::with_capacity(config.matchers.len());
        for m in &config.matchers {
            matchers.push(CompiledWsMatcher {
                matcher: CompiledMatcher::compile(&m.matcher)?,
                response: m.response.clone(),
                no_response: m.no_response,
            });
        }
        Ok(Self {
            config,
            matchers,
            shared_scenario: Mutex::new(None),
            connection_count: AtomicUsize::new(0),
        })
    }

    /// The scenario runtime a newly upgraded connection should attach,
    /// if any. A fresh compile when `resetOnReconnect` is true (the
    /// default); otherwise the endpoint's shared runtime, lazily built
    /// on the first connection.
    pub fn scenario_for_new_connection(&self) -> Result<Option<Arc<ScenarioRuntime>>> {
        let Some(cfg) = &self.config.scenario else {
            return Ok(None);
        };
        if cfg.reset_on_reconnect {
            return Ok(Some(Arc::new(ScenarioRuntime::compile(cfg)?)));
        }
        let mut shared = self.shared_scenario.lock().unwrap();
        if shared.is_none() {
            *shared = Some(Arc::new(ScenarioRuntime::compile(cfg)?));
        }
        Ok(shared.clone())
    }

    /// Atomically admit one more connection if the endpoint's cap (0 =
    /// unlimited) is not already reached.
    pub fn try_admit(&self) -> bool {
        if self.config.max_connections == 0 {
            self.connection_count.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        loop {
            let current = self.connection_count.load(Ordering::Acquire);
            if current >= self.config.max_connections {
                return false;
            }
            if self
                .connection_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release(&self) {
        self.connection_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize) -> WsEndpointConfig {
        WsEndpointConfig {
            path: "/ws".into(),
            subprotocols: vec![],
            require_subprotocol: false,
            max_message_size: 64 * 1024,
            max_connections: max,
            idle_timeout: None,
            heartbeat: None,
            echo: true,
            skip_origin_verify: true,
            matchers: vec![],
            default_response: None,
            scenario: None,
            enabled: true,
        }
    }

    #[test]
    fn admits_up_to_cap_then_rejects() {
        let endpoint = WsEndpoint::compile(config(2)).unwrap();
        assert!(endpoint.try_admit());
        assert!(endpoint.try_admit());
        assert!(!endpoint.try_admit());
        endpoint.release();
        assert!(endpoint.try_admit());
    }

    #[test]
    fn zero_means_unlimited() {
        let endpoint = WsEndpoint::compile(config(0)).unwrap();
        for _ in 0..1000 {
            assert!(endpoint.try_admit());
        }
    }
}
