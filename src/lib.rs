//! # dfhack-remote
//!
//! Client and server for the DFHack remote procedure call protocol.
//!
//! A host process runs a [`RemoteServer`] that exposes catalogs of
//! functions over TCP; tools connect with a [`RemoteClient`], bind
//! functions by name and call them by id.
//!
//! ## Architecture
//!
//! - **Wire** ([`protocol`]): 12-byte handshake, then 8-byte headers with
//!   MsgPack payloads ([`codec`])
//! - **Server** ([`server`], [`handler`]): one task per connection,
//!   handlers on the blocking pool, host-mutating calls serialized by the
//!   [`SuspendCoordinator`]
//! - **Client** ([`client`]): sequential calls with live text relay
//!
//! ## Example
//!
//! ```no_run
//! use dfhack_remote::{RemoteClient, RemoteServer};
//!
//! #[tokio::main]
//! async fn main() -> dfhack_remote::Result<()> {
//!     let server = RemoteServer::builder().build();
//!     let mut listener = server.listen(0);
//!     let addr = listener.started().await?;
//!
//!     let mut client = RemoteClient::new();
//!     client.connect(addr.port()).await?;
//!     let status = client.run_command("help", &[]).await;
//!     println!("help: {}", status);
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod suspend;
pub mod text;

pub use client::{RemoteClient, RemoteFunction, SuspendToken};
pub use config::ServerConfig;
pub use error::{CommandResult, RemoteError, Result};
pub use handler::{CallContext, CommandRunner, RpcService};
pub use server::{ListenerHandle, RemoteServer, ServerBuilder};
pub use suspend::SuspendCoordinator;
pub use text::{Color, TextSink};
