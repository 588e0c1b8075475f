//! Handler module - server-side functions and their dispatch state.
//!
//! Provides:
//! - [`ServerFunction`] and [`flags`] - one callable function and its policy
//! - [`RpcService`] - a catalog of functions merged into connections
//! - [`ServiceRegistry`] - extension catalogs, built per connection on demand
//! - [`FunctionTable`] / [`CallBuffers`] - per-connection id table and buffers
//! - [`CallContext`] - what a handler sees during a call
//!
//! # Example
//!
//! ```
//! use dfhack_remote::handler::{flags, RpcService, ServiceRegistry};
//! use dfhack_remote::protocol::{IntMessage, StringMessage};
//!
//! let mut registry = ServiceRegistry::new();
//! registry.register("counter", || {
//!     let mut service = RpcService::new();
//!     service
//!         .add_function("Length", flags::ALLOW_REMOTE, |_ctx, input: StringMessage| {
//!             Ok(IntMessage { value: input.value.len() as i32 })
//!         })
//!         .unwrap();
//!     service
//! });
//! assert!(registry.contains("counter"));
//! ```

mod context;
mod registry;
mod table;

pub use context::{CallContext, CommandRunner, NoCommands};
pub(crate) use context::Session;
pub use registry::{
    flags, Handler, HandlerResult, RpcService, ServerFunction, ServiceFactory, ServiceRegistry,
    TypedHandler,
};
pub use table::{
    CallBuffers, FunctionSlot, FunctionTable, INPUT_RELEASE_THRESHOLD, OUTPUT_RELEASE_THRESHOLD,
};
