use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use harbor_http::handler::{BoxError, DefaultErrorHandler, ErrorHandler, Handler};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::admission::ConnectionLimitingClientHandler;
use crate::client_handler::{ClientContext, ClientHandler, SocketClientHandler};
use crate::config::ServerConfig;
use crate::driver::{DefaultHttpDriverFactory, HttpDriverFactory};
use crate::error::{CompositeError, ServerError};
use crate::listener::Listener;

/// Where a server is in its lifecycle.
///
/// A server moves `Stopped → Starting → Started → Stopping → Stopped`; a
/// failed start goes from `Starting` through `Stopping` back to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
        })
    }
}

type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Builds an [`HttpServer`], see [`HttpServer::builder`].
pub struct HttpServerBuilder {
    listeners: Vec<Listener>,
    config: ServerConfig,
    error_handler: Arc<dyn ErrorHandler>,
    driver_factory: Option<Arc<dyn HttpDriverFactory>>,
    client_handler: Option<Arc<dyn ClientHandler>>,
    start_hooks: Vec<Hook>,
    stop_hooks: Vec<Hook>,
}

impl HttpServerBuilder {
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn error_handler(mut self, error_handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }

    /// Replaces the [`DefaultHttpDriverFactory`], for example to serve HTTP/2.
    #[must_use]
    pub fn driver_factory(mut self, driver_factory: impl HttpDriverFactory + 'static) -> Self {
        self.driver_factory = Some(Arc::new(driver_factory));
        self
    }

    /// Replaces the whole admission and negotiation chain; the connection
    /// limits and the driver factory are then up to `client_handler`.
    #[must_use]
    pub fn client_handler(mut self, client_handler: impl ClientHandler + 'static) -> Self {
        self.client_handler = Some(Arc::new(client_handler));
        self
    }

    /// Adds a hook run by [`HttpServer::start`], concurrently with the other start hooks.
    #[must_use]
    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.start_hooks.push(hook(f));
        self
    }

    /// Adds a hook run by [`HttpServer::stop`], and by a failed start.
    #[must_use]
    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.stop_hooks.push(hook(f));
        self
    }

    pub fn build(self) -> Result<HttpServer, ServerError> {
        if self.listeners.is_empty() {
            return Err(ServerError::NoListeners);
        }
        self.config.validate()?;

        let client_handler = self.client_handler.unwrap_or_else(|| {
            let driver_factory = self
                .driver_factory
                .unwrap_or_else(|| Arc::new(DefaultHttpDriverFactory::new(self.config.parser.clone())));
            let socket_handler = SocketClientHandler::new(driver_factory, &self.config);
            Arc::new(ConnectionLimitingClientHandler::new(socket_handler, &self.config))
        });

        Ok(HttpServer {
            config: self.config,
            listeners: self.listeners,
            listeners_closed: false,
            status: ServerStatus::Stopped,
            client_handler,
            error_handler: self.error_handler,
            start_hooks: self.start_hooks,
            stop_hooks: self.stop_hooks,
            accept_loops: Vec::new(),
            accept_token: CancellationToken::new(),
            connection_token: CancellationToken::new(),
            connections: TaskTracker::new(),
        })
    }
}

impl fmt::Debug for HttpServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerBuilder")
            .field("listeners", &self.listeners)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// An HTTP server over a fixed set of listeners.
///
/// [`start`](Self::start) runs one accept loop per listener. Every accepted
/// socket is served in its own task, through connection admission, TLS
/// negotiation and a protocol driver, down to the request handler.
/// [`stop`](Self::stop) closes the listeners for good, so a stopped server
/// can't be started again.
pub struct HttpServer {
    config: ServerConfig,
    listeners: Vec<Listener>,
    listeners_closed: bool,
    status: ServerStatus,
    client_handler: Arc<dyn ClientHandler>,
    error_handler: Arc<dyn ErrorHandler>,
    start_hooks: Vec<Hook>,
    stop_hooks: Vec<Hook>,
    accept_loops: Vec<JoinHandle<()>>,
    accept_token: CancellationToken,
    connection_token: CancellationToken,
    connections: TaskTracker,
}

impl HttpServer {
    pub fn builder(listeners: Vec<Listener>) -> HttpServerBuilder {
        HttpServerBuilder {
            listeners,
            config: ServerConfig::default(),
            error_handler: Arc::new(DefaultErrorHandler),
            driver_factory: None,
            client_handler: None,
            start_hooks: Vec::new(),
            stop_hooks: Vec::new(),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Listeners not yet handed to an accept loop; empty once started.
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Connections being served right now.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Runs the start hooks, then starts accepting clients for `handler`.
    ///
    /// When a start hook fails the listeners are closed and the stop hooks
    /// run before the error is returned; the server ends up `Stopped`.
    pub async fn start(&mut self, handler: impl Handler + 'static) -> Result<(), ServerError> {
        if self.status != ServerStatus::Stopped {
            return Err(ServerError::invalid_status("start", self.status));
        }
        if self.listeners_closed {
            return Err(ServerError::ListenersClosed);
        }

        let handler = self.wrap_handler(Arc::new(handler));

        self.status = ServerStatus::Starting;
        let failures = run_hooks(&self.start_hooks).await;
        if !failures.is_empty() {
            error!(failures = failures.len(), "start hooks failed, stopping");
            self.status = ServerStatus::Stopping;
            self.close_listeners().await;
            for e in run_hooks(&self.stop_hooks).await {
                warn!(cause = %e, "stop hook failed while aborting start");
            }
            self.status = ServerStatus::Stopped;
            return Err(CompositeError::new("start", failures).into());
        }
        self.status = ServerStatus::Started;

        let context = ClientContext {
            handler,
            error_handler: Arc::clone(&self.error_handler),
            shutdown: self.connection_token.clone(),
        };
        for mut listener in self.listeners.drain(..) {
            self.client_handler.set_up_listener(&mut listener);
            match listener.local_address() {
                Ok(address) => info!(%address, tls = listener.is_tls(), "start listening"),
                Err(e) => warn!(cause = %e, "listening on an unknown address"),
            }

            self.accept_loops.push(tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.client_handler),
                context.clone(),
                self.accept_token.clone(),
                self.connections.clone(),
            )));
        }

        Ok(())
    }

    /// Closes the listeners, ends the open connections and runs the stop hooks.
    ///
    /// Does nothing when the server is already stopped. Open connections get
    /// [`ServerConfig::drain_timeout`] to finish before they are closed.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        match self.status {
            ServerStatus::Stopped => return Ok(()),
            ServerStatus::Started => {}
            status => return Err(ServerError::invalid_status("stop", status)),
        }

        self.status = ServerStatus::Stopping;
        self.close_listeners().await;

        self.connections.close();
        if let Some(drain_timeout) = self.config.drain_timeout {
            debug!(connections = self.connections.len(), ?drain_timeout, "draining connections");
            if tokio::time::timeout(drain_timeout, self.connections.wait()).await.is_err() {
                warn!(connections = self.connections.len(), "drain timeout elapsed, closing remaining connections");
            }
        }
        self.connection_token.cancel();
        self.connections.wait().await;

        let failures = run_hooks(&self.stop_hooks).await;
        self.status = ServerStatus::Stopped;
        info!("server stopped");

        if failures.is_empty() { Ok(()) } else { Err(CompositeError::new("stop", failures).into()) }
    }

    #[cfg(feature = "compression")]
    fn wrap_handler(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        if self.config.compression {
            Arc::new(crate::compression::CompressionHandler::new(handler))
        } else {
            handler
        }
    }

    #[cfg(not(feature = "compression"))]
    fn wrap_handler(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        if self.config.compression {
            warn!("compression is enabled but was not compiled in, responses stay uncompressed");
        }
        handler
    }

    async fn close_listeners(&mut self) {
        self.accept_token.cancel();
        for accept_loop in self.accept_loops.drain(..) {
            if let Err(e) = accept_loop.await {
                error!(cause = %e, "accept loop failed");
            }
        }
        self.listeners.clear();
        self.listeners_closed = true;
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.accept_token.cancel();
        self.connection_token.cancel();
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("status", &self.status)
            .field("listeners", &self.listeners)
            .field("open_connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: Listener,
    client_handler: Arc<dyn ClientHandler>,
    context: ClientContext,
    accept_token: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        let socket = tokio::select! {
            () = accept_token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            },
        };

        let client_handler = Arc::clone(&client_handler);
        let context = context.clone();
        let remote_address = socket.remote_address.clone();
        let span = info_span!("connection", %remote_address);
        connections.spawn(
            async move {
                let handled = AssertUnwindSafe(client_handler.handle_client(socket, &context)).catch_unwind().await;
                match handled {
                    Ok(Ok(())) => debug!(%remote_address, "connection finished"),
                    Ok(Err(e @ ServerError::Handshake { .. })) => {
                        debug!(%remote_address, cause = %e, "tls handshake failed");
                    }
                    Ok(Err(e)) => warn!(%remote_address, cause = %e, "connection failed"),
                    Err(panic) => error!(%remote_address, cause = panic_message(panic.as_ref()), "connection task panicked"),
                }
            }
            .instrument(span),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

async fn run_hooks(hooks: &[Hook]) -> Vec<BoxError> {
    let mut tasks = JoinSet::new();
    for hook in hooks {
        tasks.spawn(hook());
    }

    let mut failures = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(e),
            Err(e) => failures.push(Box::new(e) as BoxError),
        }
    }
    failures
}
