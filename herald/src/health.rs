//! HTTP health endpoints
//!
//! The broker moves through [`Phase`]s in one direction. Each endpoint maps
//! the current phase to 200 or 503:
//!
//! - `/health/live`: every phase except `stopped`
//! - `/health/ready`: only `serving`
//! - `/health/startup`: every phase after `starting`
//! - `/health`: the phase name, 200 while serving
//! - `/cluster`: role, coordinator and peer liveness as JSON

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hrd_network::StatusReport;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

/// Broker lifecycle as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Topic log loading, listener not yet accepting
    Starting = 0,
    /// Accepting clients and peers
    Serving = 1,
    /// Listener closed, cluster tasks winding down
    Draining = 2,
    /// Shutdown signal received
    Stopped = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Serving,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Current [`Phase`], shared by the broker, `main` and the health server.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to `phase`. Moving backwards is ignored.
    pub fn enter(&self, phase: Phase) {
        let previous = Phase::from_u8(self.phase.fetch_max(phase as u8, Ordering::AcqRel));
        if previous < phase {
            info!(
                target: "herald::health",
                from = previous.name(),
                to = phase.name(),
                "Broker phase changed"
            );
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }
}

/// Source of the `/cluster` report.
pub trait ClusterView: Send + Sync {
    fn cluster_status(&self) -> StatusReport;
}

type BoxBody = Full<Bytes>;

fn json_response(status: StatusCode, body: String) -> Response<BoxBody> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn phase_response(healthy: bool, phase: Phase) -> Response<BoxBody> {
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, format!(r#"{{"phase":"{}"}}"#, phase.name()))
}

fn route(path: &str, health: &HealthState, cluster: &dyn ClusterView) -> Response<BoxBody> {
    let phase = health.phase();
    match path {
        "/health/live" => phase_response(phase != Phase::Stopped, phase),
        "/health/ready" | "/health" => phase_response(phase == Phase::Serving, phase),
        "/health/startup" => phase_response(phase != Phase::Starting, phase),
        "/cluster" => match serde_json::to_string(&cluster.cluster_status()) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": e.to_string() }).to_string(),
            ),
        },
        _ => json_response(StatusCode::NOT_FOUND, r#"{"error":"not_found"}"#.to_string()),
    }
}

async fn handle_request(
    req: Request<Incoming>,
    health: Arc<HealthState>,
    cluster: Arc<dyn ClusterView>,
) -> Result<Response<BoxBody>, Infallible> {
    let path = req.uri().path();
    let response = if req.method() == Method::GET {
        route(path, &health, cluster.as_ref())
    } else {
        json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            r#"{"error":"method_not_allowed"}"#.to_string(),
        )
    };

    // Orchestrators poll these every few seconds.
    if path == "/health/live" || path == "/health/ready" {
        trace!(target: "herald::health", path, status = %response.status(), "Health request");
    } else {
        debug!(target: "herald::health", path, status = %response.status(), "Health request");
    }

    Ok(response)
}

/// Run the health HTTP server
pub async fn run_health_server(
    addr: SocketAddr,
    state: Arc<HealthState>,
    cluster: Arc<dyn ClusterView>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;

    info!(
        target: "herald::health",
        addr = %addr,
        "Health server listening"
    );

    serve_health(listener, state, cluster, shutdown_rx).await;
    Ok(())
}

async fn serve_health(
    listener: TcpListener,
    state: Arc<HealthState>,
    cluster: Arc<dyn ClusterView>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _peer)) => {
                        let io = TokioIo::new(stream);
                        let state = Arc::clone(&state);
                        let cluster = Arc::clone(&cluster);

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = Arc::clone(&state);
                                let cluster = Arc::clone(&cluster);
                                async move { handle_request(req, state, cluster).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(target: "herald::health", error = %e, "Health connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(target: "herald::health", error = %e, "Health accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(target: "herald::health", "Health server shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_only_moves_forward() {
        let health = HealthState::new();
        assert_eq!(health.phase(), Phase::Starting);

        health.enter(Phase::Serving);
        health.enter(Phase::Starting);
        assert_eq!(health.phase(), Phase::Serving);

        health.enter(Phase::Stopped);
        health.enter(Phase::Draining);
        assert_eq!(health.phase(), Phase::Stopped);
    }

    #[test]
    fn test_endpoints_follow_phase() {
        let health = HealthState::new();
        let status = |path: &str| route(path, &health, &FixedCluster).status();

        assert_eq!(status("/health/live"), StatusCode::OK);
        assert_eq!(status("/health/startup"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status("/health/ready"), StatusCode::SERVICE_UNAVAILABLE);

        health.enter(Phase::Serving);
        assert_eq!(status("/health/startup"), StatusCode::OK);
        assert_eq!(status("/health/ready"), StatusCode::OK);
        assert_eq!(status("/health"), StatusCode::OK);

        health.enter(Phase::Draining);
        assert_eq!(status("/health/ready"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status("/health/live"), StatusCode::OK);

        health.enter(Phase::Stopped);
        assert_eq!(status("/health/live"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status("/health/startup"), StatusCode::OK);
    }

    struct FixedCluster;

    impl ClusterView for FixedCluster {
        fn cluster_status(&self) -> StatusReport {
            StatusReport {
                node: hrd_core::PeerAddress::new("127.0.0.1", 7000),
                role: hrd_core::Role::Coordinator,
                coordinator: Some(hrd_core::PeerAddress::new("127.0.0.1", 7000)),
                peers: Vec::new(),
                topic_count: 2,
            }
        }
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_endpoints_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HealthState::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let server = tokio::spawn(serve_health(
            listener,
            Arc::clone(&state),
            Arc::new(FixedCluster),
            shutdown_rx,
        ));

        let response = get(addr, "/health/ready").await;
        assert!(response.starts_with("HTTP/1.1 503"));
        assert!(response.contains(r#""phase":"starting""#));

        state.enter(Phase::Serving);
        let response = get(addr, "/health/ready").await;
        assert!(response.starts_with("HTTP/1.1 200"));

        let response = get(addr, "/cluster").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""role":"coordinator""#));
        assert!(response.contains(r#""topic_count":2"#));

        let response = get(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        shutdown_tx.send(()).unwrap();
        server.await.unwrap();
    }
}
