//! HTTP server and graceful shutdown.
//!
//! # Lifecycle
//!
//! 1. Startup hooks run. If one fails the server never binds.
//! 2. The listener accepts connections until **SIGTERM** or **Ctrl-C**.
//! 3. Accepting stops immediately; every in-flight connection task runs to
//!    completion.
//! 4. Shutdown hooks run, then [`Server::serve`] returns.
//!
//! Under Kubernetes, set `terminationGracePeriodSeconds` longer than your
//! slowest request plus your shutdown hooks.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::Application;
use crate::config::{AppConfig, ServerConfig};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    max_body_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string. Use
    /// [`try_bind`](Server::try_bind) to get an error instead.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use strata::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::try_bind(addr).unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_bind(addr: &str) -> Result<Self, Error> {
        let addr = addr
            .parse()
            .map_err(|source| Error::InvalidAddress { addr: addr.to_owned(), source })?;
        Ok(Self { addr, max_body_bytes: ServerConfig::DEFAULT_MAX_BODY_BYTES })
    }

    /// Binds to `[server].addr` with a body limit of `[server].max-body-bytes`.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        Ok(Self::try_bind(&config.server.addr)?.max_body_bytes(config.server.max_body_bytes))
    }

    /// Request bodies above `limit` bytes are answered with
    /// `413 Payload Too Large` without reaching the application.
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs startup hooks, then accepts connections and dispatches them
    /// through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing and the shutdown hooks
    /// running).
    pub async fn serve(self, app: Application) -> Result<(), Error> {
        app.startup().await?;

        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app);

        let max_body_bytes = self.max_body_bytes;

        info!(addr = %self.addr, debug = app.debug(), max_body_bytes, "strata listening");

        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a SIGTERM stops accepting even while
                // connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr, max_body_bytes).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        app.shutdown().await?;
        info!("strata stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Buffers one request body and runs the request through the application.
///
/// Infallible: every failure is already a response by the time it gets here.
async fn dispatch(
    app: Arc<Application>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    max_body_bytes: usize,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match read_body(body, max_body_bytes).await {
        Ok(body) => body,
        Err(status) => {
            warn!(peer = %remote_addr, status = status.as_u16(), "rejected request body");
            return Ok(Response::status(status).into_inner());
        }
    };

    let response = app.handle(Request::from_parts(parts, body)).await;
    Ok(response.into_inner())
}

/// Collects at most `limit` bytes: `413` above that, `400` if the body
/// cannot be read.
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, StatusCode>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(StatusCode::PAYLOAD_TOO_LARGE),
        Err(e) => {
            debug!("failed to read request body: {e}");
            Err(StatusCode::BAD_REQUEST)
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). On
/// Windows only Ctrl-C is available. A handler that cannot be installed never
/// fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_bind_rejects_bad_addresses() {
        assert!(matches!(Server::try_bind("localhost"), Err(Error::InvalidAddress { .. })));
        assert_eq!(Server::try_bind("127.0.0.1:8080").unwrap().addr().port(), 8080);
    }

    #[test]
    fn from_config_uses_server_section() {
        let config =
            AppConfig::from_toml("[server]\naddr = \"127.0.0.1:9000\"\nmax-body-bytes = 16").unwrap();
        let server = Server::from_config(&config).unwrap();
        assert_eq!(server.addr().port(), 9000);
        assert_eq!(server.max_body_bytes, 16);
    }

    #[tokio::test]
    async fn bodies_over_the_limit_are_rejected() {
        let body = Full::new(Bytes::from_static(b"hello world"));
        assert_eq!(read_body(body, 4).await, Err(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[tokio::test]
    async fn bodies_within_the_limit_are_buffered() {
        let body = Full::new(Bytes::from_static(b"hello"));
        assert_eq!(read_body(body, 5).await, Ok(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn failing_startup_hook_prevents_serving() {
        let app = Application::builder()
            .on_startup(|| async { Err::<(), _>(std::io::Error::other("no database")) })
            .build();
        let err = Server::bind("127.0.0.1:0").serve(app).await.unwrap_err();
        assert!(matches!(err, Error::Startup(_)));
    }
}
