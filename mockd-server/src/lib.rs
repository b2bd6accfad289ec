//! Composes the gRPC, WebSocket, and SOAP mock servers plus a metrics
//! HTTP endpoint behind one `Start`/`Stop` contract, sharing a single
//! metrics registry and request-log sink across all three protocols.
//! Not a configuration-loading surface — callers build a `MockdConfig`
//! themselves; reading one from a file is an external collaborator's
//! job.

pub mod error;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mockd_core::collaborators::{InMemoryStatefulExecutor, NoopTemplateEngine, StatefulExecutor, TemplateEngine};
use mockd_core::config::{GrpcMethodConfig, SoapOperationConfig, WsEndpointConfig};
use mockd_core::metrics::{DefaultMetrics, Registry};
use mockd_core::metrics_http::serve_metrics;
use mockd_core::proto::ProtoSchema;
use mockd_core::request_log::{InMemorySink, RequestLogSink};

use mockd_grpc::server::GrpcServer;
use mockd_soap::server::SoapServer;
use mockd_ws::server::WsServer;

pub use error::{Result, StackError};

/// gRPC stack configuration: the descriptor source plus per-method mocks.
pub struct GrpcStackConfig {
    pub proto_files: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
    pub methods: Vec<GrpcMethodConfig>,
    pub port: u16,
    /// Whether to stand up gRPC server reflection over the started
    /// schema.
    pub enable_reflection: bool,
}

/// WebSocket stack configuration: the configured endpoint set.
pub struct WsStackConfig {
    pub endpoints: Vec<WsEndpointConfig>,
    pub port: u16,
}

/// SOAP stack configuration: the single POST path plus operation set.
pub struct SoapStackConfig {
    pub path: String,
    pub operations: Vec<SoapOperationConfig>,
    pub port: u16,
}

/// Everything needed to stand up one instance of the mock server stack.
/// Any subsystem left `None` is simply not started.
pub struct MockdConfig {
    pub grpc: Option<GrpcStackConfig>,
    pub ws: Option<WsStackConfig>,
    pub soap: Option<SoapStackConfig>,
    pub metrics_port: u16,
    pub request_log_capacity: usize,
    pub stateful_executor: Arc<dyn StatefulExecutor>,
    pub template_engine: Arc<dyn TemplateEngine>,
}

impl Default for MockdConfig {
    fn default() -> Self {
        Self {
            grpc: None,
            ws: None,
            soap: None,
            metrics_port: 0,
            request_log_capacity: 1024,
            stateful_executor: Arc::new(InMemoryStatefulExecutor::new()),
            template_engine: Arc::new(NoopTemplateEngine),
        }
    }
}

struct RunningMetrics {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    serve_task: JoinHandle<()>,
}

/// The started stack: a shared registry/log-sink plus whichever
/// protocol servers the config named, and the metrics HTTP listener.
pub struct MockdStack {
    pub registry: Arc<Registry>,
    pub metrics: Arc<DefaultMetrics>,
    pub log_sink: Arc<InMemorySink>,
    pub grpc: Option<GrpcServer>,
    pub ws: Option<WsServer>,
    pub soap: Option<SoapServer>,
    grpc_port: u16,
    ws_port: u16,
    soap_port: u16,
    metrics_running: Mutex<Option<RunningMetrics>>,
}

impl MockdStack {
    /// Build the stack's servers from `config` without starting any
    /// listener yet; `start` binds everything named in the config.
    pub fn new(config: &MockdConfig) -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(DefaultMetrics::register(&registry));
        let log_sink = Arc::new(InMemorySink::new(config.request_log_capacity));

        let grpc = config
            .grpc
            .as_ref()
            .map(|cfg| -> Result<GrpcServer> {
                let schema = ProtoSchema::from_proto_files(&cfg.proto_files, &cfg.includes)?;
                Ok(GrpcServer::new(
                    schema,
                    cfg.methods.clone(),
                    metrics.clone(),
                    log_sink.clone() as Arc<dyn RequestLogSink>,
                    cfg.enable_reflection,
                ))
            })
            .transpose()?;

        let ws = config
            .ws
            .as_ref()
            .map(|cfg| WsServer::new(cfg.endpoints.clone(), metrics.clone(), log_sink.clone() as Arc<dyn RequestLogSink>))
            .transpose()?;

        let soap = config
            .soap
            .as_ref()
            .map(|cfg| {
                SoapServer::new(
                    cfg.path.clone(),
                    cfg.operations.clone(),
                    metrics.clone(),
                    log_sink.clone() as Arc<dyn RequestLogSink>,
                    config.stateful_executor.clone(),
                    config.template_engine.clone(),
                )
            })
            .transpose()?;

        metrics.mocks_total.set(
            &[("type", "grpc")],
            config.grpc.as_ref().map(|c| c.methods.len()).unwrap_or(0) as f64,
        );
        metrics.mocks_total.set(
            &[("type", "websocket")],
            config.ws.as_ref().map(|c| c.endpoints.len()).unwrap_or(0) as f64,
        );
        metrics.mocks_total.set(
            &[("type", "soap")],
            config.soap.as_ref().map(|c| c.operations.len()).unwrap_or(0) as f64,
        );

        Ok(Self {
            registry,
            metrics,
            log_sink,
            grpc_port: config.grpc.as_ref().map(|c| c.port).unwrap_or(0),
            ws_port: config.ws.as_ref().map(|c| c.port).unwrap_or(0),
            soap_port: config.soap.as_ref().map(|c| c.port).unwrap_or(0),
            grpc,
            ws,
            soap,
            metrics_running: Mutex::new(None),
        })
    }

    /// Start every configured subsystem plus the metrics endpoint.
    /// Partial failure leaves earlier-started subsystems running; the
    /// caller decides whether to `stop` and retry.
    pub async fn start(&self, metrics_port: u16) -> Result<()> {
        if let Some(grpc) = &self.grpc {
            let addr = grpc.start(self.grpc_port).await?;
            info!(%addr, "gRPC subsystem started");
        }
        if let Some(ws) = &self.ws {
            let addr = ws.start(self.ws_port).await?;
            info!(%addr, "WebSocket subsystem started");
        }
        if let Some(soap) = &self.soap {
            let addr = soap.start(self.soap_port).await?;
            info!(%addr, "SOAP subsystem started");
        }
        self.start_metrics(metrics_port).await?;
        Ok(())
    }

    pub async fn stop(&self, timeout: Duration) {
        if let Some(grpc) = &self.grpc {
            grpc.stop(timeout).await;
        }
        if let Some(ws) = &self.ws {
            ws.stop(timeout).await;
        }
        if let Some(soap) = &self.soap {
            soap.stop(timeout).await;
        }
        self.stop_metrics(timeout).await;
    }

    pub fn metrics_address(&self) -> Option<SocketAddr> {
        self.metrics_running.lock().unwrap().as_ref().map(|r| r.addr)
    }

    async fn start_metrics(&self, port: u16) -> Result<()> {
        let mut running = self.metrics_running.lock().unwrap();
        if running.is_some() {
            return Ok(());
        }
        drop(running);

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(StackError::MetricsBind)?;
        let addr = listener.local_addr().map_err(StackError::MetricsBind)?;
        info!(%addr, "metrics endpoint listening");

        let router = serve_metrics(self.registry.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_task = tokio::spawn(async move {
            let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                warn!(%err, "metrics server terminated with an error");
            }
        });

        running = self.metrics_running.lock().unwrap();
        *running = Some(RunningMetrics { addr, shutdown_tx, serve_task });
        Ok(())
    }

    async fn stop_metrics(&self, timeout: Duration) {
        let running = self.metrics_running.lock().unwrap().take();
        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown_tx.send(());
        if tokio::time::timeout(timeout, running.serve_task).await.is_err() {
            warn!("metrics graceful stop deadline elapsed; forcing hard close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_stack_starts_and_stops_only_metrics() {
        let config = MockdConfig::default();
        let stack = MockdStack::new(&config).unwrap();
        stack.start(0).await.unwrap();
        assert!(stack.metrics_address().is_some());
        stack.stop(Duration::from_secs(5)).await;
        assert!(stack.metrics_address().is_none());
    }

    #[tokio::test]
    async fn ws_only_stack_starts_its_subsystem() {
        let mut config = MockdConfig::default();
        config.ws = Some(WsStackConfig { endpoints: vec![], port: 0 });
        let stack = MockdStack::new(&config).unwrap();
        stack.start(0).await.unwrap();
        assert!(stack.ws.as_ref().unwrap().is_running());
        stack.stop(Duration::from_secs(5)).await;
        assert!(!stack.ws.as_ref().unwrap().is_running());
    }

    fn ws_endpoint(path: &str) -> mockd_core::config::WsEndpointConfig {
        mockd_core::config::WsEndpointConfig {
            path: path.into(),
            subprotocols: vec![],
            require_subprotocol: false,
            max_message_size: 64 * 1024,
            max_connections: 0,
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
    fn mocks_total_reflects_configured_counts_by_type() {
        let mut config = MockdConfig::default();
        config.ws = Some(WsStackConfig {
            endpoints: vec![ws_endpoint("/a"), ws_endpoint("/b")],
            port: 0,
        });
        let stack = MockdStack::new(&config).unwrap();
        let text = stack.registry.render();
        assert!(text.contains(r#"mockd_mocks_total{type="websocket"} 2"#));
        assert!(text.contains(r#"mockd_mocks_total{type="grpc"} 0"#));
        assert!(text.contains(r#"mockd_mocks_total{type="soap"} 0"#));
    }
}
