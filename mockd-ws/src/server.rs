//! `Start`/`Stop` contract for the WebSocket mock server,
//! mirroring `mockd-grpc::server::GrpcServer`'s shape but serving plain
//! HTTP/1.1 upgrade traffic through `axum::serve` rather than a raw
//! HTTP/2 `tower::Service`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mockd_core::config::WsEndpointConfig;
use mockd_core::metrics::DefaultMetrics;
use mockd_core::request_log::RequestLogSink;

use crate::dispatch::WsDispatchContext;
use crate::error::{Result, WsError};
use crate::handler::ws_handler;
use crate::manager::ConnectionManager;
use crate::registry::{EndpointSnapshotCell, EndpointTable};

pub struct WsServerState {
    pub endpoints: EndpointSnapshotCell,
    pub manager: Arc<ConnectionManager>,
    pub ctx: Arc<WsDispatchContext>,
}

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    serve_task: JoinHandle<()>,
}

pub struct WsServer {
    state: Arc<WsServerState>,
    running: Mutex<Option<RunningServer>>,
}

impl WsServer {
    pub fn new(
        endpoints: Vec<WsEndpointConfig>,
        metrics: Arc<DefaultMetrics>,
        log_sink: Arc<dyn RequestLogSink>,
    ) -> mockd_core::error::Result<Self> {
        let table = EndpointTable::compile(endpoints)?;
        Ok(Self {
            state: Arc::new(WsServerState {
                endpoints: EndpointSnapshotCell::new(table),
                manager: ConnectionManager::new(),
                ctx: Arc::new(WsDispatchContext::new(metrics, log_sink)),
            }),
            running: Mutex::new(None),
        })
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.state.manager.clone()
    }

    /// Atomically replace the served endpoint set. Existing connections keep the endpoint
    /// handle they upgraded against; only new upgrades observe it.
    pub fn reconfigure(&self, endpoints: Vec<WsEndpointConfig>) -> mockd_core::error::Result<()> {
        let table = EndpointTable::compile(endpoints)?;
        self.state.endpoints.store(table);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.running.lock().unwrap().as_ref().map(|r| r.addr)
    }

    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Err(WsError::AlreadyRunning);
        }
        drop(running);

        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(WsError::Bind)?;
        let addr = listener.local_addr().map_err(WsError::Bind)?;
        info!(%addr, "WebSocket mock server listening");

        let router: Router = Router::new()
            .fallback(ws_handler)
            .with_state(self.state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_task = tokio::spawn(async move {
            let server = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                });
            if let Err(err) = server.await {
                warn!(%err, "WebSocket server terminated with an error");
            }
        });

        running = self.running.lock().unwrap();
        if running.is_some() {
            serve_task.abort();
            return Err(WsError::AlreadyRunning);
        }
        *running = Some(RunningServer {
            addr,
            shutdown_tx,
            serve_task,
        });
        Ok(addr)
    }

    pub async fn stop(&self, timeout: Duration) {
        let running = self.running.lock().unwrap().take();
        let Some(running) = running else {
            return;
        };
        let _ = running.shutdown_tx.send(());
        match tokio::time::timeout(timeout, running.serve_task).await {
            Ok(Ok(())) => debug!("WebSocket server stopped gracefully"),
            Ok(Err(err)) => warn!(%err, "WebSocket serve task panicked"),
            Err(_) => warn!("WebSocket graceful stop deadline elapsed; forcing hard close"),
        }
    }
}
