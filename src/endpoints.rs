//! Control surface for health, metrics and manual flushes
//!
//! A small HTTP/1.1 responder over a raw tokio `TcpListener`.
//! One request per connection; the response always closes the socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::daemon::FeeDaemon;
use crate::metrics::Metrics;

const MAX_REQUEST_BYTES: usize = 4096;

/// Status, content type and body of one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl ControlResponse {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::text(500, format!("serialization failed: {}", e)),
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            405 => "Method Not Allowed",
            400 => "Bad Request",
            503 => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }

    fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// Shared handles the control surface answers from
#[derive(Debug, Clone)]
pub struct ControlSurface {
    daemon: Arc<FeeDaemon>,
    metrics: Arc<Metrics>,
}

impl ControlSurface {
    pub fn new(daemon: Arc<FeeDaemon>, metrics: Arc<Metrics>) -> Self {
        Self { daemon, metrics }
    }

    /// Route one request line
    pub async fn handle(&self, method: &str, path: &str) -> ControlResponse {
        let path = path.split('?').next().unwrap_or(path);
        match (method, path) {
            ("GET", "/health") => {
                let health = self.daemon.health();
                let status = if health.healthy { 200 } else { 503 };
                ControlResponse::json(status, &health)
            }
            ("GET", "/metrics") => match self.metrics.encode() {
                Ok(body) => ControlResponse {
                    status: 200,
                    content_type: "text/plain; version=0.0.4",
                    body,
                },
                Err(e) => ControlResponse::text(500, format!("metrics encoding failed: {}", e)),
            },
            ("POST", "/flush") => {
                info!("Flush requested through control surface");
                let report = self.daemon.flush().await;
                ControlResponse::json(200, &report)
            }
            ("GET", "/accruals") => ControlResponse::json(200, &self.daemon.pending_accruals()),
            (_, "/health" | "/metrics" | "/flush" | "/accruals") => {
                ControlResponse::text(405, "method not allowed")
            }
            _ => ControlResponse::text(404, "not found"),
        }
    }

    async fn serve_connection(&self, mut socket: TcpStream) -> std::io::Result<()> {
        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        let read = socket.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..read]);
        let mut parts = request.lines().next().unwrap_or_default().split_whitespace();

        let response = match (parts.next(), parts.next()) {
            (Some(method), Some(path)) => self.handle(method, path).await,
            _ => ControlResponse::text(400, "bad request"),
        };
        socket.write_all(response.to_http().as_bytes()).await?;
        socket.shutdown().await
    }

    /// Accept connections until `stop` flips to true
    pub async fn serve(self, listener: TcpListener, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let surface = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = surface.serve_connection(socket).await {
                                debug!(%peer, error = %e, "Control connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept control connection");
                    }
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Control surface stopped");
    }
}

/// Bind the control surface on `host:port` and serve in the background
pub async fn endpoint_server(
    host: &str,
    port: u16,
    surface: ControlSurface,
    stop: watch::Receiver<bool>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind control surface on {}:{}", host, port))?;
    let addr = listener.local_addr()?;
    info!(%addr, "Control surface listening");
    Ok((addr, tokio::spawn(surface.serve(listener, stop))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::daemon::CursorStore;
    use crate::extractor::FeeExtractor;
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, TokenBucket};
    use crate::rpc_manager::{LedgerPoolConfig, ResilientLedger, SimulatedLedger};
    use crate::types::{PoolKind, TrackedAsset};
    use solana_sdk::pubkey::Pubkey;

    fn surface() -> (ControlSurface, Arc<SimulatedLedger>, TrackedAsset, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let sim = Arc::new(SimulatedLedger::new("sim"));
        let ledger = Arc::new(ResilientLedger::new(
            sim.clone(),
            Arc::new(CircuitBreaker::new(&CircuitBreakerConfig::default())),
            Arc::new(TokenBucket::new(100.0, 100.0)),
            LedgerPoolConfig::default(),
            metrics.clone(),
        ));
        let asset = TrackedAsset::new(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            PoolKind::BondingCurve,
            "alpha",
        );
        let daemon = Arc::new(FeeDaemon::new(
            vec![asset.clone()],
            ledger,
            FeeExtractor::new(Pubkey::new_unique(), metrics.clone()),
            CursorStore::new(dir.path().join("state.json")),
            DaemonConfig::default(),
            metrics.clone(),
        ));
        (ControlSurface::new(daemon, metrics), sim, asset, dir)
    }

    #[tokio::test]
    async fn test_health_is_unavailable_before_start() {
        let (surface, _sim, _asset, _dir) = surface();
        let response = surface.handle("GET", "/health").await;
        assert_eq!(response.status, 503);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn test_flush_commits_pending_accrual() {
        let (surface, sim, asset, _dir) = surface();
        surface.daemon.accumulator().add(asset.mint, 42_000);

        let response = surface.handle("POST", "/flush").await;
        assert_eq!(response.status, 200);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["lamports"], 42_000);
        assert_eq!(sim.commits(), vec![(asset.mint, 42_000)]);

        let accruals = surface.handle("GET", "/accruals").await;
        let entries: serde_json::Value = serde_json::from_str(&accruals.body).unwrap();
        assert_eq!(entries[0]["pending"], 0);
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let (surface, _sim, _asset, _dir) = surface();
        assert_eq!(surface.handle("GET", "/flush").await.status, 405);
        assert_eq!(surface.handle("GET", "/nope").await.status, 404);
        let metrics = surface.handle("GET", "/metrics?x=1").await;
        assert_eq!(metrics.status, 200);
        assert!(metrics.body.contains("poll_cycles_total"));
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let (surface, _sim, _asset, _dir) = surface();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(surface.serve(listener, stop_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /accruals HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("\"label\":\"alpha\""));

        stop_tx.send(true).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_endpoint_server_binds_requested_host() {
        let (surface, _sim, _asset, _dir) = surface();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (addr, handle) = endpoint_server("127.0.0.1", 0, surface, stop_rx).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"GET /health HTTP/1.1\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 503"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
