//! Function catalogs and their registration primitives.
//!
//! A [`RpcService`] is a named group of [`ServerFunction`]s. Registering a
//! function never assigns an id; ids are handed out when the catalog is
//! finalized into a connection's [`FunctionTable`], in registration order.
//!
//! # Example
//!
//! ```
//! use dfhack_remote::handler::{flags, RpcService};
//! use dfhack_remote::protocol::{EmptyMessage, IntMessage};
//!
//! let mut service = RpcService::new();
//! service
//!     .add_function("Answer", flags::ALLOW_REMOTE, |_ctx, _: EmptyMessage| {
//!         Ok(IntMessage { value: 42 })
//!     })
//!     .unwrap();
//! assert_eq!(service.len(), 1);
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use bytes::BytesMut;

use super::context::{CallContext, Session};
use super::table::FunctionTable;
use crate::codec::MsgPackCodec;
use crate::error::{CommandResult, RemoteError, Result};
use crate::protocol::{decode_message, Message};

/// Flag constants for [`ServerFunction`].
pub mod flags {
    /// No flags: loopback peers only, runs under the suspend lock.
    pub const NONE: u8 = 0;
    /// Callable from a non-loopback peer.
    pub const ALLOW_REMOTE: u8 = 0b0000_0001;
    /// Runs without the suspend lock; the handler locks by itself if needed.
    pub const DONT_SUSPEND: u8 = 0b0000_0010;
    /// Expected to be called once; its buffers are released after each call.
    pub const CALLED_ONCE: u8 = 0b0000_0100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Handler outcome: the output message or a non-`Ok` status.
pub type HandlerResult<Out> = std::result::Result<Out, CommandResult>;

/// Type-erased handler invoked by the dispatcher.
pub trait Handler: Send + Sync + 'static {
    /// Decode `input`, run, and encode the result into `output`.
    fn invoke(&self, ctx: &mut CallContext<'_>, input: &[u8], output: &mut BytesMut)
        -> CommandResult;
}

/// Wrapper that decodes the payload and encodes the result around a
/// typed closure.
pub struct TypedHandler<F, In, Out>
where
    F: Fn(&mut CallContext<'_>, In) -> HandlerResult<Out> + Send + Sync + 'static,
    In: Message,
    Out: Message,
{
    handler: F,
    _phantom: PhantomData<fn(In) -> Out>,
}

impl<F, In, Out> TypedHandler<F, In, Out>
where
    F: Fn(&mut CallContext<'_>, In) -> HandlerResult<Out> + Send + Sync + 'static,
    In: Message,
    Out: Message,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, In, Out> Handler for TypedHandler<F, In, Out>
where
    F: Fn(&mut CallContext<'_>, In) -> HandlerResult<Out> + Send + Sync + 'static,
    In: Message,
    Out: Message,
{
    fn invoke(
        &self,
        ctx: &mut CallContext<'_>,
        input: &[u8],
        output: &mut BytesMut,
    ) -> CommandResult {
        let parsed: In = match decode_message(input) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Bad input for {}: {}", ctx.function_name(), e);
                let msg = format!(
                    "In call to {}: could not decode input args.\n",
                    ctx.function_name()
                );
                ctx.printerr(&msg);
                return CommandResult::Failure;
            }
        };

        let result = if ctx.requires_suspend() {
            ctx.with_suspend(|ctx| (self.handler)(ctx, parsed))
        } else {
            (self.handler)(ctx, parsed)
        };

        match result {
            Ok(out) => match MsgPackCodec::encode_into(&out, output) {
                Ok(()) => CommandResult::Ok,
                Err(e) => {
                    let msg = format!(
                        "In call to {}: could not encode result: {}\n",
                        ctx.function_name(),
                        e
                    );
                    ctx.printerr(&msg);
                    CommandResult::LinkFailure
                }
            },
            Err(status) => status,
        }
    }
}

/// One registered function: name, flags, schemas and behavior.
pub struct ServerFunction {
    name: String,
    flags: u8,
    input_type: &'static str,
    output_type: &'static str,
    id: OnceLock<i16>,
    handler: Box<dyn Handler>,
}

impl ServerFunction {
    fn new<In: Message, Out: Message>(name: &str, flags: u8, handler: Box<dyn Handler>) -> Self {
        Self {
            name: name.to_string(),
            flags,
            input_type: In::NAME,
            output_type: Out::NAME,
            id: OnceLock::new(),
            handler,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    #[inline]
    pub fn has_flag(&self, flag: u8) -> bool {
        flags::has_flag(self.flags, flag)
    }

    /// Schema name of the input message.
    #[inline]
    pub fn input_type(&self) -> &'static str {
        self.input_type
    }

    /// Schema name of the output message.
    #[inline]
    pub fn output_type(&self) -> &'static str {
        self.output_type
    }

    /// Id assigned at finalize time, if any.
    #[inline]
    pub fn id(&self) -> Option<i16> {
        self.id.get().copied()
    }

    /// Run the handler on behalf of `session`.
    pub(crate) fn execute(
        &self,
        session: &mut Session,
        input: &[u8],
        output: &mut BytesMut,
    ) -> CommandResult {
        let mut ctx = CallContext::new(session, self);
        self.handler.invoke(&mut ctx, input, output)
    }
}

impl std::fmt::Debug for ServerFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerFunction")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("id", &self.id())
            .finish()
    }
}

/// A catalog of functions that can be merged into a connection.
#[derive(Debug, Default)]
pub struct RpcService {
    functions: Vec<Arc<ServerFunction>>,
    lookup: HashMap<String, Arc<ServerFunction>>,
    finalized: bool,
}

impl RpcService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a free function (closure) under `name`.
    pub fn add_function<In, Out, F>(&mut self, name: &str, flags: u8, handler: F) -> Result<&mut Self>
    where
        F: Fn(&mut CallContext<'_>, In) -> HandlerResult<Out> + Send + Sync + 'static,
        In: Message,
        Out: Message,
    {
        debug_assert!(!self.finalized, "catalog already attached to a connection");
        if self.functions.iter().any(|f| f.name == name) {
            return Err(RemoteError::DuplicateFunction(name.to_string()));
        }

        let typed = TypedHandler::new(handler);
        self.functions.push(Arc::new(ServerFunction::new::<In, Out>(
            name,
            flags,
            Box::new(typed),
        )));
        Ok(self)
    }

    /// Register a method of a shared receiver under `name`.
    pub fn add_method<S, In, Out>(
        &mut self,
        name: &str,
        flags: u8,
        receiver: Arc<S>,
        method: fn(&S, &mut CallContext<'_>, In) -> HandlerResult<Out>,
    ) -> Result<&mut Self>
    where
        S: Send + Sync + 'static,
        In: Message,
        Out: Message,
    {
        self.add_function(name, flags, move |ctx, input| method(&receiver, ctx, input))
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Assign ids from `table` to every function and index them by name.
    pub(crate) fn finalize(&mut self, table: &mut FunctionTable) -> Result<()> {
        for function in &self.functions {
            if function.id().is_none() {
                let id = table.push(Arc::clone(function))?;
                let _ = function.id.set(id);
            }
            self.lookup
                .insert(function.name.clone(), Arc::clone(function));
        }
        self.finalized = true;
        Ok(())
    }

    /// Look up a function by name. Only finalized catalogs answer.
    pub fn get_function(&self, name: &str) -> Option<Arc<ServerFunction>> {
        self.lookup.get(name).cloned()
    }
}

/// Factory producing a fresh catalog for each connection.
pub type ServiceFactory = Arc<dyn Fn() -> RpcService + Send + Sync>;

/// Extension catalogs known to a server, by name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for extension `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> RpcService + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a new catalog for extension `name`.
    pub fn create(&self, name: &str) -> Option<RpcService> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Registered extension names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("extensions", &self.names())
            .finish()
    }
}
