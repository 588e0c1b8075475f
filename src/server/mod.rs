//! RPC server: builder, listener and per-connection dispatch.
//!
//! The [`ServerBuilder`] collects extension catalogs, the command runner
//! and configuration. [`RemoteServer::listen`] then:
//! 1. Binds the configured interface in a background task
//! 2. Reports the bound address (or the bind error) through
//!    [`ListenerHandle::started`]
//! 3. Serves every accepted client in its own task
//!
//! # Example
//!
//! ```no_run
//! use dfhack_remote::handler::{flags, RpcService};
//! use dfhack_remote::protocol::{EmptyMessage, IntMessage};
//! use dfhack_remote::RemoteServer;
//!
//! #[tokio::main]
//! async fn main() -> dfhack_remote::Result<()> {
//!     let server = RemoteServer::builder()
//!         .service("counter", || {
//!             let mut service = RpcService::new();
//!             service
//!                 .add_function("Answer", flags::NONE, |_ctx, _: EmptyMessage| {
//!                     Ok(IntMessage { value: 42 })
//!                 })
//!                 .expect("unique name");
//!             service
//!         })
//!         .build();
//!
//!     let mut listener = server.listen(0);
//!     let addr = listener.started().await?;
//!     println!("listening on {}", addr);
//!     Ok(())
//! }
//! ```

mod connection;
mod core_service;
mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handler::{CommandRunner, NoCommands, RpcService, ServiceRegistry};
use crate::suspend::SuspendCoordinator;

pub use core_service::{BIND_METHOD, CORE_RESUME, CORE_SUSPEND, RUN_COMMAND};
pub use listener::{ListenerHandle, MAX_ACCEPT_FAILURES};

use connection::Connection;

/// State shared by the listener and all connections.
pub(crate) struct ServerState {
    pub(crate) registry: Arc<ServiceRegistry>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) coordinator: Arc<SuspendCoordinator>,
}

/// Builder for configuring a [`RemoteServer`].
pub struct ServerBuilder {
    config: ServerConfig,
    registry: ServiceRegistry,
    runner: Arc<dyn CommandRunner>,
    coordinator: Option<Arc<SuspendCoordinator>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: ServiceRegistry::new(),
            runner: Arc::new(NoCommands),
            coordinator: None,
        }
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an extension catalog, built fresh for each connection
    /// that binds into it.
    pub fn service<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> RpcService + Send + Sync + 'static,
    {
        self.registry.register(name, factory);
        self
    }

    /// Set the collaborator that executes `RunCommand` requests.
    pub fn command_runner<R: CommandRunner>(mut self, runner: R) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    /// Share an existing coordinator (e.g. with other host subsystems).
    pub fn coordinator(mut self, coordinator: Arc<SuspendCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn build(self) -> RemoteServer {
        RemoteServer {
            config: self.config,
            state: Arc::new(ServerState {
                registry: Arc::new(self.registry),
                runner: self.runner,
                coordinator: self.coordinator.unwrap_or_default(),
            }),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured server, ready to listen.
pub struct RemoteServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl RemoteServer {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Coordinator shared by all connections; call
    /// [`block_all`](SuspendCoordinator::block_all) on it to shut
    /// remote access off.
    pub fn coordinator(&self) -> &Arc<SuspendCoordinator> {
        &self.state.coordinator
    }

    /// Start listening on `port` (0 for an ephemeral port).
    ///
    /// Returns at once; the bind happens in a background task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn listen(&self, port: u16) -> ListenerHandle {
        let addr = SocketAddr::new(self.config.listen_ip(), port);
        listener::spawn(addr, Arc::clone(&self.state))
    }

    /// Start listening on the configured port.
    pub fn start(&self) -> ListenerHandle {
        self.listen(self.config.port)
    }

    /// Serve one already-accepted stream until it ends.
    ///
    /// `peer` decides which functions the client may call.
    pub async fn serve_stream<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Connection::new(stream, peer, Arc::clone(&self.state))
            .run()
            .await
    }
}

impl std::fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServer")
            .field("config", &self.config)
            .field("registry", &self.state.registry)
            .field("blocked", &self.state.coordinator.is_blocked())
            .finish()
    }
}
