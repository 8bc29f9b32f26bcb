//! Server builder and accept loop.
//!
//! The [`ServerBuilder`] collects routes and settings; [`Server::start`]
//! runs the lifecycle:
//! 1. Acquire the service name (the server fails and never accepts otherwise)
//! 2. Claim the connection's inbound queue
//! 3. Spawn the reply writer
//! 4. Spawn the accept loop, which pops calls and hands them to the strategy
//!
//! [`ServerHandle::shutdown`] reverses it: stop accepting, drain workers,
//! flush the writer, release the name, and only then let go of the
//! connection.
//!
//! # Example
//!
//! ```no_run
//! use busrpc::{BusConnection, BusType, Server, Strategy};
//!
//! #[tokio::main]
//! async fn main() -> busrpc::Result<()> {
//!     let conn = BusConnection::connect(BusType::Session)?;
//!
//!     let server = Server::builder(conn)
//!         .service_name("com.example.HelloService")
//!         .strategy(Strategy::ThreadPerRequest)
//!         .route("com.example.HelloInterface", "Hello", |name: String| {
//!             Ok(format!("Hello {name}!\n"))
//!         })
//!         .start()
//!         .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod strategy;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{BusConnection, Inbound, NameFlags};
use crate::config::ServerConfig;
use crate::error::{BusrpcError, Result};
use crate::handler::{HandlerResult, Router};
use crate::message::{FromArgs, IntoArgs, Message};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle, WriterSummary};

pub use strategy::{Strategy, DEFAULT_MAX_CONCURRENT};

use strategy::Executor;

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built, not started.
    Idle,
    /// Owns its name and accepts calls.
    Accepting,
    /// Could not acquire its name; never accepted anything.
    Failed,
    /// Stopped accepting; waiting for workers and queued replies.
    Draining,
    /// Done; the connection reference is released.
    Stopped,
}

/// Builder for configuring and creating a server.
pub struct ServerBuilder {
    conn: BusConnection,
    service_name: Option<String>,
    name_flags: NameFlags,
    strategy: Strategy,
    router: Router,
    writer_config: WriterConfig,
}

impl ServerBuilder {
    /// Create a builder serving on `conn`.
    pub fn new(conn: BusConnection) -> Self {
        Self {
            conn,
            service_name: None,
            name_flags: NameFlags::server(),
            strategy: Strategy::default(),
            router: Router::new(),
            writer_config: WriterConfig::default(),
        }
    }

    /// Apply a loaded configuration.
    pub fn config(mut self, config: &ServerConfig) -> Self {
        self.service_name = config.service_name.clone();
        self.name_flags = config.name_flags;
        self.strategy = config.strategy;
        self.router.set_standard_interfaces(config.standard_interfaces);
        self.writer_config = config.writer.clone();
        self
    }

    /// Well-known name to own.
    pub fn service_name(mut self, name: &str) -> Self {
        self.service_name = Some(name.to_string());
        self
    }

    /// Flags for the name request.
    ///
    /// Default: replace the owner if allowed, never queue.
    pub fn name_flags(mut self, flags: NameFlags) -> Self {
        self.name_flags = flags;
        self
    }

    /// Concurrency strategy.
    ///
    /// Default: task pool bounded at 256.
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Register a route.
    pub fn route<F, I, O>(mut self, interface: &str, method: &str, handler: F) -> Self
    where
        F: Fn(I) -> HandlerResult<O> + Send + Sync + 'static,
        I: FromArgs + 'static,
        O: IntoArgs + 'static,
    {
        self.router.register(interface, method, handler);
        self
    }

    /// Replace the routing table.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Answer `Introspect` and `Ping` automatically.
    pub fn standard_interfaces(mut self, enabled: bool) -> Self {
        self.router.set_standard_interfaces(enabled);
        self
    }

    /// Set the reply queue capacity. Workers wait when it is full.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Build the server without starting it.
    pub fn build(self) -> Server {
        let (state, _) = watch::channel(ServerState::Idle);
        Server {
            conn: self.conn,
            service_name: self.service_name,
            name_flags: self.name_flags,
            strategy: self.strategy,
            router: Arc::new(self.router),
            writer_config: self.writer_config,
            state,
        }
    }

    /// Build and start the server.
    pub async fn start(self) -> Result<ServerHandle> {
        self.build().start().await
    }
}

/// A configured server, not yet accepting.
pub struct Server {
    conn: BusConnection,
    service_name: Option<String>,
    name_flags: NameFlags,
    strategy: Strategy,
    router: Arc<Router>,
    writer_config: WriterConfig,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Create a new server builder.
    pub fn builder(conn: BusConnection) -> ServerBuilder {
        ServerBuilder::new(conn)
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Acquire the name and start accepting.
    ///
    /// # Errors
    ///
    /// - [`BusrpcError::Name`](crate::BusrpcError::Name) if the name is held by someone else
    /// - [`BusrpcError::AlreadyClaimed`](crate::BusrpcError::AlreadyClaimed) if another
    ///   accept loop reads this connection
    /// - [`BusrpcError::InvalidConfig`](crate::BusrpcError::InvalidConfig) for unusable
    ///   writer settings
    ///
    /// The state is [`ServerState::Failed`] after any of them.
    pub async fn start(self) -> Result<ServerHandle> {
        if let Err(e) = self.writer_config.validate() {
            self.fail(&e);
            return Err(e);
        }

        if let Some(name) = &self.service_name {
            if let Err(e) = self.conn.acquire_name(name, self.name_flags) {
                self.fail(&e);
                return Err(e);
            }
        }

        let inbound = match self.conn.take_inbound() {
            Ok(inbound) => inbound,
            Err(e) => {
                if let Some(name) = &self.service_name {
                    if let Err(release) = self.conn.release_name(name) {
                        tracing::warn!("Failed to release {}: {}", name, release);
                    }
                }
                self.fail(&e);
                return Err(e);
            }
        };

        let (writer, writer_task) = spawn_writer_task(self.conn.clone(), self.writer_config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let served = Arc::new(AtomicU64::new(0));

        let accept_task = tokio::spawn(accept_loop(
            inbound,
            self.router,
            writer,
            Executor::new(self.strategy),
            shutdown_rx,
            served.clone(),
        ));

        tracing::debug!(
            "Serving {} as {} ({})",
            self.service_name.as_deref().unwrap_or("<unique name>"),
            self.conn.unique_name(),
            self.strategy.name()
        );
        self.state.send_replace(ServerState::Accepting);

        Ok(ServerHandle {
            conn: Some(self.conn),
            service_name: self.service_name,
            state: self.state,
            shutdown_tx,
            accept_task: Some(accept_task),
            writer_task: Some(writer_task),
            served,
        })
    }

    fn fail(&self, error: &BusrpcError) {
        tracing::error!(
            "Server {} failed to start: {}",
            self.service_name.as_deref().unwrap_or(self.conn.unique_name()),
            error
        );
        self.state.send_replace(ServerState::Failed);
    }
}

/// What a shutdown drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Calls accepted over the server's lifetime.
    pub served: u64,
    /// Workers still running when shutdown began.
    pub drained: usize,
    /// Replies flushed by the writer.
    pub replies: WriterSummary,
}

/// Handle to a running server. Dropping it stops the accept loop.
pub struct ServerHandle {
    conn: Option<BusConnection>,
    service_name: Option<String>,
    state: watch::Sender<ServerState>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Option<JoinHandle<(usize, Box<dyn Inbound>)>>,
    writer_task: Option<JoinHandle<WriterSummary>>,
    served: Arc<AtomicU64>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Current state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Owned well-known name.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Unique name of the server's connection.
    pub fn unique_name(&self) -> &str {
        self.conn
            .as_ref()
            .map(|c| c.unique_name())
            .unwrap_or_default()
    }

    /// Calls accepted so far.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// Stop accepting and wait until every accepted call has its reply
    /// flushed.
    pub async fn shutdown(mut self) -> Result<ShutdownReport> {
        self.state.send_replace(ServerState::Draining);
        let _ = self.shutdown_tx.send(true);

        let mut report = ShutdownReport::default();

        // Dropped only after the writer: queued replies must still find
        // their callers.
        let mut inbound = None;
        if let Some(task) = self.accept_task.take() {
            match task.await {
                Ok((drained, queue)) => {
                    report.drained = drained;
                    inbound = Some(queue);
                }
                Err(e) => tracing::error!("Accept loop failed: {}", e),
            }
        }

        if let Some(task) = self.writer_task.take() {
            match task.await {
                Ok(summary) => report.replies = summary,
                Err(e) => tracing::error!("Reply writer failed: {}", e),
            }
        }

        if let (Some(conn), Some(name)) = (&self.conn, &self.service_name) {
            if let Err(e) = conn.release_name(name) {
                tracing::warn!("Failed to release {}: {}", name, e);
            }
        }

        drop(inbound);
        self.conn = None;
        report.served = self.served.load(Ordering::Relaxed);
        self.state.send_replace(ServerState::Stopped);

        tracing::debug!(
            "Server stopped: {} served, {} drained, {} replies sent",
            report.served,
            report.drained,
            report.replies.sent
        );
        Ok(report)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Accept loop - pops inbound calls and hands them to the strategy.
///
/// Returns the number of workers drained and the inbound queue, which the
/// caller drops once replies are flushed.
async fn accept_loop(
    mut inbound: Box<dyn Inbound>,
    router: Arc<Router>,
    writer: WriterHandle,
    mut executor: Executor,
    mut shutdown: watch::Receiver<bool>,
    served: Arc<AtomicU64>,
) -> (usize, Box<dyn Inbound>) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            ready = inbound.readable() => {
                if !ready {
                    tracing::warn!("Inbound queue closed, accept loop stopping");
                    break;
                }

                let Some(message) = inbound.pop() else {
                    continue;
                };

                match message {
                    Message::MethodCall(call) => {
                        served.fetch_add(1, Ordering::Relaxed);
                        executor.execute(call, &router, &writer).await;
                    }
                    other => {
                        tracing::debug!(
                            "Ignoring {:?} from {:?}",
                            other.kind(),
                            other.header().sender
                        );
                    }
                }
            }
        }
    }

    let live = executor.live();
    if live > 0 {
        tracing::debug!("Draining {} worker(s)", live);
    }
    let drained = executor.drain().await;
    (drained, inbound)
}
