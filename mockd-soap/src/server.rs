//! `Start`/`Stop` contract for the SOAP mock server: a
//! single HTTP POST endpoint that parses an envelope, dispatches by
//! SOAPAction or body element, and replies with a rendered or fault
//! envelope.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mockd_core::collaborators::{StatefulExecutor, TemplateEngine};
use mockd_core::config::SoapOperationConfig;
use mockd_core::metrics::DefaultMetrics;
use mockd_core::request_log::RequestLogSink;

use crate::dispatch::DispatchContext;
use crate::error::{Result, SoapError};
use crate::registry::{OperationSnapshotCell, OperationTable};

/// Request bodies larger than this are rejected with 413 before this
/// crate's own parsing ever sees them.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    serve_task: JoinHandle<()>,
}

pub struct SoapServer {
    ctx: Arc<DispatchContext>,
    path: String,
    running: Mutex<Option<RunningServer>>,
}

impl SoapServer {
    pub fn new(
        path: impl Into<String>,
        operations: Vec<SoapOperationConfig>,
        metrics: Arc<DefaultMetrics>,
        log_sink: Arc<dyn RequestLogSink>,
        stateful_executor: Arc<dyn StatefulExecutor>,
        template_engine: Arc<dyn TemplateEngine>,
    ) -> mockd_core::error::Result<Self> {
        let path = path.into();
        let table = OperationTable::compile(operations)?;
        Ok(Self {
            ctx: Arc::new(DispatchContext::new(
                OperationSnapshotCell::new(table),
                metrics,
                log_sink,
                stateful_executor,
                template_engine,
                path.clone(),
            )),
            path,
            running: Mutex::new(None),
        })
    }

    /// Atomically replace the served operation set; in-flight requests finish against whichever
    /// snapshot they started with.
    pub fn reconfigure(&self, operations: Vec<SoapOperationConfig>) -> mockd_core::error::Result<()> {
        let table = OperationTable::compile(operations)?;
        self.ctx.snapshot.store(table);
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
            return Err(SoapError::AlreadyRunning);
        }
        drop(running);

        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(SoapError::Bind)?;
        let addr = listener.local_addr().map_err(SoapError::Bind)?;
        info!(%addr, path = %self.path, "SOAP mock server listening");

        let router: Router = Router::new()
            .route(&self.path, post(soap_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .with_state(self.ctx.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_task = tokio::spawn(async move {
            let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                warn!(%err, "SOAP server terminated with an error");
            }
        });

        running = self.running.lock().unwrap();
        if running.is_some() {
            serve_task.abort();
            return Err(SoapError::AlreadyRunning);
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
            Ok(Ok(())) => debug!("SOAP server stopped gracefully"),
            Ok(Err(err)) => warn!(%err, "SOAP serve task panicked"),
            Err(_) => warn!("SOAP graceful stop deadline elapsed; forcing hard close"),
        }
    }
}

async fn soap_handler(State(ctx): State<Arc<DispatchContext>>, headers: HeaderMap, body: Bytes) -> Response {
    let outcome = ctx.handle(&body, &headers).await;
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(axum::http::header::CONTENT_TYPE, outcome.content_type)], outcome.body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockd_core::collaborators::{InMemoryStatefulExecutor, NoopTemplateEngine};
    use mockd_core::metrics::Registry;
    use mockd_core::request_log::InMemorySink;

    fn new_server(ops: Vec<SoapOperationConfig>) -> SoapServer {
        let registry = Registry::new();
        SoapServer::new(
            "/soap",
            ops,
            Arc::new(DefaultMetrics::register(&registry)),
            Arc::new(InMemorySink::new(16)),
            Arc::new(InMemoryStatefulExecutor::new()),
            Arc::new(NoopTemplateEngine),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_stop_lifecycle_is_idempotent() {
        let server = new_server(vec![]);
        assert!(!server.is_running());
        let addr = server.start(0).await.unwrap();
        assert!(addr.port() > 0);
        assert!(server.is_running());
        assert!(matches!(server.start(0).await, Err(SoapError::AlreadyRunning)));
        server.stop(Duration::from_secs(5)).await;
        assert!(!server.is_running());
        server.stop(Duration::from_secs(5)).await;
        assert!(!server.is_running());
    }
}
