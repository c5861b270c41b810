//! TCP listener, connection handling, and graceful shutdown.
//!
//! One port serves everything: hyper-util's auto builder speaks HTTP/1.1,
//! HTTP/2 with prior knowledge (which is how gRPC clients talk to a plaintext
//! server), and HTTP/1.1 upgrades for WebSocket.
//!
//! # Graceful shutdown
//!
//! On SIGINT or SIGTERM (or when the future given to
//! [`Server::serve_with_shutdown`] resolves) the server:
//!
//! 1. Stops accepting connections.
//! 2. Asks every open connection to finish its in-flight requests and close.
//! 3. Waits up to the grace period (`ServerConfig::shutdown_grace`, 5 s by
//!    default), then aborts whatever is left.
//! 4. Cancels every request and WebSocket session context.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::app::App;
use crate::app_error::AppError;
use crate::context::CancelToken;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::request::Request;
use crate::response::IntoResponse;

/// Listen address used when none is configured.
pub const DEFAULT_ADDR: &str = ":7841";

/// A bound listener, ready to serve an [`App`].
pub struct Server {
    listener: TcpListener,
    addr: SocketAddr,
}

impl Server {
    /// Resolves and binds `addr`. A bare `:port` binds every interface.
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), gatehouse::Error> {
    /// use gatehouse::{App, Server};
    ///
    /// Server::bind(":7841").await?.serve(App::default()).await
    /// # }
    /// ```
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let target = resolve(addr).await?;
        let listener = TcpListener::bind(target)
            .await
            .map_err(|source| Error::Bind { addr: addr.to_owned(), source })?;
        Self::from_listener(listener)
    }

    /// Serves on an already-bound listener.
    pub fn from_listener(listener: TcpListener) -> Result<Self, Error> {
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves `app` until SIGINT or SIGTERM, then shuts down gracefully.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Serves `app` until `signal` resolves, then shuts down gracefully.
    pub async fn serve_with_shutdown<F>(self, app: App, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        app.log_routes();
        let dispatcher = Arc::new(app.build());
        let closing = CancelToken::new();
        let mut tasks = JoinSet::new();

        info!(addr = %self.addr, "gatehouse listening");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    tasks.spawn(serve_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&dispatcher),
                        closing.clone(),
                    ));
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(self.listener);
        closing.cancel();

        let grace = dispatcher.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), grace_secs = grace.as_secs(), "grace period elapsed, closing remaining connections");
            tasks.shutdown().await;
        }
        dispatcher.shutdown();

        info!("gatehouse stopped");
        Ok(())
    }
}

async fn resolve(addr: &str) -> Result<SocketAddr, Error> {
    let normalized = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_owned(),
    };
    if let Ok(parsed) = normalized.parse() {
        return Ok(parsed);
    }
    let mut candidates = tokio::net::lookup_host(&normalized).await.map_err(|e| Error::Address {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })?;
    candidates.next().ok_or_else(|| Error::Address {
        addr: addr.to_owned(),
        reason: "no addresses found".to_owned(),
    })
}

// ── Connections ──────────────────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    closing: CancelToken,
) {
    let svc = service_fn(move |req: hyper::Request<Incoming>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let resp = match Request::from_hyper(req, remote_addr, dispatcher.new_context()).await {
                Ok(req) => dispatcher.dispatch(req).await,
                Err(e) => AppError::bad_request("Invalid request body").with_error(e).into_response(),
            };
            Ok::<_, Infallible>(resp.into_inner())
        }
    });

    let builder = ConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        () = closing.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!(peer = %remote_addr, error = %e, "connection closed with error");
    }
}

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Resolves on the first SIGINT (Ctrl-C) or SIGTERM. On platforms without
/// SIGTERM only Ctrl-C is watched.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
