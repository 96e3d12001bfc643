//! External startup signal: wait for an HTTP callback instead of
//! running local scripts.
//!
//! | Path | Body | Effect |
//! |---|---|---|
//! | `/health` | `OK` | none |
//! | `/startup-ok` | `OK acknowledged` | startup succeeded |
//! | `/startup-fail` | `FAILURE acknowledged` | startup failed |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::routing::any;
use lifeline_core::{Heartbeat, HeartbeatTicker};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::error::{AgentError, AgentResult};

#[derive(Clone)]
struct SignalState {
    verdict: Arc<watch::Sender<Option<bool>>>,
}

/// Router that records the first verdict posted to it.
pub fn signal_router(verdict: watch::Sender<Option<bool>>) -> Router {
    let state = SignalState {
        verdict: Arc::new(verdict),
    };
    Router::new()
        .route("/health", any(health))
        .route("/startup-ok", any(startup_ok))
        .route("/startup-fail", any(startup_fail))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn startup_ok(State(state): State<SignalState>) -> &'static str {
    info!("external startup signal: OK");
    state.verdict.send_replace(Some(true));
    "OK acknowledged"
}

async fn startup_fail(State(state): State<SignalState>) -> &'static str {
    warn!("external startup signal: FAILURE");
    state.verdict.send_replace(Some(false));
    "FAILURE acknowledged"
}

/// Settings for the HTTP signal wait.
#[derive(Debug, Clone)]
pub struct ExternalSignal {
    addr: SocketAddr,
    timeout: Duration,
    heartbeat_interval: Duration,
}

impl ExternalSignal {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            timeout,
            heartbeat_interval: Duration::from_secs(120),
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub async fn bind(&self) -> AgentResult<SignalServer> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| AgentError::Bind {
                addr: self.addr,
                source,
            })?;
        Ok(SignalServer {
            listener,
            timeout: self.timeout,
            heartbeat_interval: self.heartbeat_interval,
        })
    }

    /// Bind and wait. A bind failure counts as a failed startup.
    pub async fn wait(&self, heartbeat: Heartbeat) -> bool {
        match self.bind().await {
            Ok(server) => server.wait(heartbeat).await,
            Err(e) => {
                error!(error = %e, "unable to start external signal server");
                false
            }
        }
    }
}

/// A bound, not yet serving, signal endpoint.
pub struct SignalServer {
    listener: TcpListener,
    timeout: Duration,
    heartbeat_interval: Duration,
}

impl SignalServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until a verdict arrives or the timeout passes, heartbeating
    /// throughout. A timeout counts as failure.
    pub async fn wait(self, heartbeat: Heartbeat) -> bool {
        let (verdict_tx, mut verdict_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let port = self.listener.local_addr().map(|a| a.port()).unwrap_or(0);

        let router = signal_router(verdict_tx);
        let server = axum::serve(self.listener, router).with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        });
        let server = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "external signal server failed");
            }
        });

        let ticker = HeartbeatTicker::now_and_every(heartbeat, self.heartbeat_interval);
        info!(
            port,
            timeout = ?self.timeout,
            "waiting for an external HTTP signal on /startup-ok or /startup-fail"
        );

        let waited = tokio::time::timeout(self.timeout, async {
            verdict_rx.wait_for(Option::is_some).await.map(|v| *v)
        })
        .await;

        ticker.stop().await;
        let _ = stop_tx.send(());
        let _ = server.await;

        match waited {
            Ok(Ok(Some(verdict))) => {
                info!(verdict, "external startup signal received");
                verdict
            }
            Ok(_) => false,
            Err(_) => {
                warn!(timeout = ?self.timeout, "no external startup signal before timeout");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lifeline_core::{heartbeat_fn, noop_heartbeat};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_does_not_decide() {
        let (tx, rx) = watch::channel(None);
        let resp = signal_router(tx)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK");
        assert_eq!(*rx.borrow(), None);
    }

    #[tokio::test]
    async fn startup_ok_records_success() {
        let (tx, rx) = watch::channel(None);
        let resp = signal_router(tx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/startup-ok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "OK acknowledged");
        assert_eq!(*rx.borrow(), Some(true));
    }

    #[tokio::test]
    async fn startup_fail_records_failure() {
        let (tx, rx) = watch::channel(None);
        let resp = signal_router(tx)
            .oneshot(Request::builder().uri("/startup-fail").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(resp).await, "FAILURE acknowledged");
        assert_eq!(*rx.borrow(), Some(false));
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn wait_returns_posted_verdict_and_heartbeats() {
        let signal = ExternalSignal::new(0, Duration::from_secs(30))
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)));
        let server = signal.bind().await.unwrap();
        let addr = server.local_addr().unwrap();

        let beats = Arc::new(AtomicU32::new(0));
        let b = beats.clone();
        let hb = heartbeat_fn(move || {
            let b = b.clone();
            async move {
                b.fetch_add(1, Ordering::SeqCst);
            }
        });

        let waiter = tokio::spawn(server.wait(hb));
        let resp = get(addr, "/startup-fail").await;
        assert!(resp.contains("FAILURE acknowledged"));

        assert!(!waiter.await.unwrap());
        // immediate first beat
        assert!(beats.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn wait_times_out_as_failure() {
        let signal = ExternalSignal::new(0, Duration::from_millis(100))
            .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)));
        assert!(!signal.wait(noop_heartbeat()).await);
    }
}
