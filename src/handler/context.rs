//! Call context and per-connection session state.
//!
//! Handlers receive a [`CallContext`] for the duration of one call. It
//! gives access to the connection's text stream, the caller's address and
//! the suspend lock, and through crate-internal methods to the session
//! that owns the function table.
//!
//! # Example
//!
//! ```
//! use dfhack_remote::handler::{flags, CallContext, HandlerResult, RpcService};
//! use dfhack_remote::protocol::{EmptyMessage, StringMessage};
//!
//! fn whoami(ctx: &mut CallContext<'_>, _: EmptyMessage) -> HandlerResult<StringMessage> {
//!     ctx.print("looking up peer\n");
//!     Ok(StringMessage { value: ctx.peer_addr().to_string() })
//! }
//!
//! let mut service = RpcService::new();
//! service.add_function("WhoAmI", flags::ALLOW_REMOTE, whoami).unwrap();
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::registry::{flags, RpcService, ServerFunction, ServiceRegistry};
use super::table::FunctionTable;
use crate::error::{CommandResult, Result};
use crate::suspend::{OwnerId, SuspendCoordinator};
use crate::text::{Color, TextFragment};

/// Executes console commands for the core `RunCommand` function.
///
/// Any `Fn(&mut CallContext, &str, &[String]) -> CommandResult` closure
/// is a runner.
pub trait CommandRunner: Send + Sync + 'static {
    fn run_command(
        &self,
        ctx: &mut CallContext<'_>,
        command: &str,
        arguments: &[String],
    ) -> CommandResult;
}

impl<F> CommandRunner for F
where
    F: Fn(&mut CallContext<'_>, &str, &[String]) -> CommandResult + Send + Sync + 'static,
{
    fn run_command(
        &self,
        ctx: &mut CallContext<'_>,
        command: &str,
        arguments: &[String],
    ) -> CommandResult {
        self(ctx, command, arguments)
    }
}

/// Runner that knows no commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCommands;

impl CommandRunner for NoCommands {
    fn run_command(
        &self,
        ctx: &mut CallContext<'_>,
        command: &str,
        _arguments: &[String],
    ) -> CommandResult {
        ctx.printerr(&format!("{} is not a recognized command.\n", command));
        CommandResult::NotImplemented
    }
}

/// Text produced by handlers, waiting to be sent.
#[derive(Debug, Default)]
pub(crate) struct TextBuffer {
    fragments: Vec<TextFragment>,
    live: Option<mpsc::UnboundedSender<Vec<TextFragment>>>,
}

impl TextBuffer {
    fn add(&mut self, color: Color, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.fragments.last_mut() {
            Some(last) if last.color == color => last.text.push_str(text),
            _ => self.fragments.push(TextFragment::new(color, text)),
        }
    }

    /// Hand pending text to the live channel, if one is attached.
    fn flush(&mut self) {
        if self.fragments.is_empty() {
            return;
        }
        if let Some(live) = &self.live {
            let batch = std::mem::take(&mut self.fragments);
            if let Err(e) = live.send(batch) {
                // Receiver gone: keep the text for the final flush.
                self.fragments = e.0;
                self.live = None;
            }
        }
    }

    fn take(&mut self) -> Vec<TextFragment> {
        std::mem::take(&mut self.fragments)
    }
}

/// State of one client connection.
///
/// The session moves onto the blocking pool for every call and comes back
/// afterwards, so it is never shared.
pub(crate) struct Session {
    table: FunctionTable,
    core: RpcService,
    extensions: HashMap<String, RpcService>,
    registry: Arc<ServiceRegistry>,
    runner: Arc<dyn CommandRunner>,
    coordinator: Arc<SuspendCoordinator>,
    owner: OwnerId,
    suspend_depth: usize,
    peer: SocketAddr,
    text: TextBuffer,
}

impl Session {
    /// Create a session and merge `core` into its table at id 0.
    pub(crate) fn new(
        mut core: RpcService,
        registry: Arc<ServiceRegistry>,
        runner: Arc<dyn CommandRunner>,
        coordinator: Arc<SuspendCoordinator>,
        peer: SocketAddr,
    ) -> Result<Self> {
        let mut table = FunctionTable::new();
        core.finalize(&mut table)?;
        let owner = coordinator.register_owner();
        Ok(Self {
            table,
            core,
            extensions: HashMap::new(),
            registry,
            runner,
            coordinator,
            owner,
            suspend_depth: 0,
            peer,
            text: TextBuffer::default(),
        })
    }

    #[inline]
    pub(crate) fn table_mut(&mut self) -> &mut FunctionTable {
        &mut self.table
    }

    #[cfg(test)]
    pub(crate) fn suspend_depth(&self) -> usize {
        self.suspend_depth
    }

    /// Route on-demand flushes to `live` while a call runs.
    pub(crate) fn attach_text_channel(
        &mut self,
        live: Option<mpsc::UnboundedSender<Vec<TextFragment>>>,
    ) {
        self.text.live = live;
    }

    /// Queue text outside of a handler call.
    pub(crate) fn add_text(&mut self, color: Color, text: &str) {
        self.text.add(color, text);
    }

    /// Pending text not yet sent.
    pub(crate) fn take_text(&mut self) -> Vec<TextFragment> {
        self.text.take()
    }

    /// Resolve `plugin::name`, attaching the extension's catalog on first use.
    ///
    /// An empty `plugin` means the core catalog.
    pub(crate) fn find_function(&mut self, plugin: &str, name: &str) -> Option<Arc<ServerFunction>> {
        if plugin.is_empty() {
            return self.core.get_function(name);
        }

        if !self.extensions.contains_key(plugin) {
            let mut service = self.registry.create(plugin)?;
            if let Err(e) = service.finalize(&mut self.table) {
                tracing::warn!("Cannot attach RPC service {}: {}", plugin, e);
                return None;
            }
            tracing::debug!(
                "Attached RPC service {} ({} functions) for {}",
                plugin,
                service.len(),
                self.peer
            );
            self.extensions.insert(plugin.to_string(), service);
        }

        self.extensions.get(plugin)?.get_function(name)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.suspend_depth > 0 {
            tracing::debug!(
                "Releasing {} suspend level(s) held by {}",
                self.suspend_depth,
                self.peer
            );
            self.coordinator
                .release_many(self.owner, self.suspend_depth);
            self.suspend_depth = 0;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("functions", &self.table.len())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("suspend_depth", &self.suspend_depth)
            .finish()
    }
}

/// Context passed to handlers for one call.
pub struct CallContext<'a> {
    session: &'a mut Session,
    function: &'a ServerFunction,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(session: &'a mut Session, function: &'a ServerFunction) -> Self {
        Self { session, function }
    }

    /// Name of the function being called.
    #[inline]
    pub fn function_name(&self) -> &str {
        self.function.name()
    }

    /// Address of the calling client.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.session.peer
    }

    /// Queue plain text for the client.
    pub fn print(&mut self, text: &str) {
        self.add_text(Color::Reset, text);
    }

    /// Queue error text for the client.
    pub fn printerr(&mut self, text: &str) {
        self.add_text(Color::LightRed, text);
    }

    /// Queue colored text for the client.
    pub fn add_text(&mut self, color: Color, text: &str) {
        self.session.text.add(color, text);
    }

    /// Send queued text now instead of with the call's result.
    pub fn flush(&mut self) {
        self.session.text.flush();
    }

    /// Whether the dispatcher takes the suspend lock around this function.
    #[inline]
    pub fn requires_suspend(&self) -> bool {
        !self.function.has_flag(flags::DONT_SUSPEND)
    }

    /// Run `f` while holding the suspend lock for this connection.
    ///
    /// Blocks until no other connection holds the lock.
    pub fn with_suspend<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let coordinator = Arc::clone(&self.session.coordinator);
        let _guard = coordinator.suspend(self.session.owner);
        f(self)
    }

    /// Suspend levels held explicitly by this connection.
    #[inline]
    pub fn suspend_depth(&self) -> usize {
        self.session.suspend_depth
    }

    /// Take one explicit suspend level and return the new depth.
    pub(crate) fn hold_suspend(&mut self) -> usize {
        self.session.coordinator.acquire(self.session.owner);
        self.session.suspend_depth += 1;
        self.session.suspend_depth
    }

    /// Drop one explicit suspend level; `None` if none is held.
    pub(crate) fn release_suspend(&mut self) -> Option<usize> {
        if self.session.suspend_depth == 0 {
            return None;
        }
        self.session.coordinator.release(self.session.owner);
        self.session.suspend_depth -= 1;
        Some(self.session.suspend_depth)
    }

    pub(crate) fn find_function(&mut self, plugin: &str, name: &str) -> Option<Arc<ServerFunction>> {
        self.session.find_function(plugin, name)
    }

    pub(crate) fn command_runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.session.runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;
    use crate::protocol::{EmptyMessage, IntMessage};
    use bytes::BytesMut;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 40000))
    }

    fn session_with(core: RpcService, registry: ServiceRegistry) -> Session {
        Session::new(
            core,
            Arc::new(registry),
            Arc::new(NoCommands),
            Arc::new(SuspendCoordinator::new()),
            loopback(),
        )
        .unwrap()
    }

    fn call(session: &mut Session, id: i16, input: &[u8]) -> (CommandResult, BytesMut) {
        let function = Arc::clone(session.table_mut().get(id).unwrap().function());
        let mut output = BytesMut::new();
        let status = function.execute(session, input, &mut output);
        (status, output)
    }

    #[test]
    fn test_text_fragments_merge_by_color() {
        let mut buffer = TextBuffer::default();
        buffer.add(Color::Reset, "a");
        buffer.add(Color::Reset, "b");
        buffer.add(Color::LightRed, "c");
        buffer.add(Color::LightRed, "");

        let fragments = buffer.take();
        assert_eq!(
            fragments,
            vec![
                TextFragment::new(Color::Reset, "ab"),
                TextFragment::new(Color::LightRed, "c"),
            ]
        );
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_flush_without_channel_keeps_text() {
        let mut buffer = TextBuffer::default();
        buffer.add(Color::Green, "kept");
        buffer.flush();
        assert_eq!(buffer.take().len(), 1);
    }

    #[test]
    fn test_flush_sends_to_live_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut buffer = TextBuffer {
            live: Some(tx),
            ..TextBuffer::default()
        };
        buffer.add(Color::Reset, "now");
        buffer.flush();

        assert_eq!(rx.try_recv().unwrap()[0].text, "now");
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_flush_with_closed_channel_keeps_text() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut buffer = TextBuffer {
            live: Some(tx),
            ..TextBuffer::default()
        };
        buffer.add(Color::Reset, "later");
        buffer.flush();

        assert_eq!(buffer.take()[0].text, "later");
    }

    #[test]
    fn test_handler_runs_under_suspend_lock() {
        let coordinator = Arc::new(SuspendCoordinator::new());
        let observed = Arc::clone(&coordinator);

        let mut core = RpcService::new();
        core.add_function("Locked", flags::NONE, move |_ctx, _: EmptyMessage| {
            Ok(IntMessage {
                value: observed.holder().is_some() as i32,
            })
        })
        .unwrap();

        let mut session = Session::new(
            core,
            Arc::new(ServiceRegistry::new()),
            Arc::new(NoCommands),
            Arc::clone(&coordinator),
            loopback(),
        )
        .unwrap();

        let input = MsgPackCodec::encode(&EmptyMessage {}).unwrap();
        let (status, output) = call(&mut session, 0, &input);
        assert_eq!(status, CommandResult::Ok);
        let reply: IntMessage = MsgPackCodec::decode(&output).unwrap();
        assert_eq!(reply.value, 1);
        assert_eq!(coordinator.holder(), None);
    }

    #[test]
    fn test_dont_suspend_skips_lock() {
        let coordinator = Arc::new(SuspendCoordinator::new());
        let observed = Arc::clone(&coordinator);

        let mut core = RpcService::new();
        core.add_function("Free", flags::DONT_SUSPEND, move |_ctx, _: EmptyMessage| {
            Ok(IntMessage {
                value: observed.holder().is_some() as i32,
            })
        })
        .unwrap();

        let mut session = Session::new(
            core,
            Arc::new(ServiceRegistry::new()),
            Arc::new(NoCommands),
            coordinator,
            loopback(),
        )
        .unwrap();

        let input = MsgPackCodec::encode(&EmptyMessage {}).unwrap();
        let (_, output) = call(&mut session, 0, &input);
        let reply: IntMessage = MsgPackCodec::decode(&output).unwrap();
        assert_eq!(reply.value, 0);
    }

    #[test]
    fn test_undecodable_input_is_failure_with_text() {
        let mut core = RpcService::new();
        core.add_function("Typed", flags::NONE, |_ctx, input: IntMessage| Ok(input))
            .unwrap();
        let mut session = session_with(core, ServiceRegistry::new());

        let (status, output) = call(&mut session, 0, b"\xc1garbage");
        assert_eq!(status, CommandResult::Failure);
        assert!(output.is_empty());

        let text = session.take_text();
        assert_eq!(text[0].color, Color::LightRed);
        assert_eq!(text[0].text, "In call to Typed: could not decode input args.\n");
    }

    #[test]
    fn test_handler_status_passes_through() {
        let mut core = RpcService::new();
        core.add_function("Refuse", flags::NONE, |ctx, _: EmptyMessage| {
            ctx.print("refusing\n");
            Err::<EmptyMessage, _>(CommandResult::WrongUsage)
        })
        .unwrap();
        let mut session = session_with(core, ServiceRegistry::new());

        let input = MsgPackCodec::encode(&EmptyMessage {}).unwrap();
        let (status, _) = call(&mut session, 0, &input);
        assert_eq!(status, CommandResult::WrongUsage);
        assert_eq!(session.take_text()[0].text, "refusing\n");
    }

    #[test]
    fn test_extension_catalog_attached_once() {
        let mut registry = ServiceRegistry::new();
        registry.register("sample", || {
            let mut service = RpcService::new();
            service
                .add_function("Ping", flags::NONE, |_ctx, _: EmptyMessage| {
                    Ok(EmptyMessage {})
                })
                .unwrap();
            service
        });

        let mut core = RpcService::new();
        core.add_function("Core", flags::NONE, |_ctx, _: EmptyMessage| {
            Ok(EmptyMessage {})
        })
        .unwrap();
        let mut session = session_with(core, registry);

        let first = session.find_function("sample", "Ping").unwrap();
        let second = session.find_function("sample", "Ping").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), Some(1));
        assert_eq!(session.table_mut().len(), 2);

        assert!(session.find_function("sample", "Missing").is_none());
        assert!(session.find_function("absent", "Ping").is_none());
        assert!(session.find_function("", "Ping").is_none());
        assert!(session.find_function("", "Core").is_some());
    }

    #[test]
    fn test_dropping_session_releases_held_levels() {
        let coordinator = Arc::new(SuspendCoordinator::new());
        let mut core = RpcService::new();
        core.add_function("Hold", flags::DONT_SUSPEND, |ctx, _: EmptyMessage| {
            Ok(IntMessage {
                value: ctx.hold_suspend() as i32,
            })
        })
        .unwrap();

        let mut session = Session::new(
            core,
            Arc::new(ServiceRegistry::new()),
            Arc::new(NoCommands),
            Arc::clone(&coordinator),
            loopback(),
        )
        .unwrap();

        let input = MsgPackCodec::encode(&EmptyMessage {}).unwrap();
        call(&mut session, 0, &input);
        call(&mut session, 0, &input);
        assert_eq!(session.suspend_depth(), 2);
        assert!(coordinator.holder().is_some());

        drop(session);
        assert_eq!(coordinator.holder(), None);
    }

    #[test]
    fn test_closure_command_runner() {
        let runner = |ctx: &mut CallContext<'_>, command: &str, args: &[String]| {
            ctx.print(&format!("{} {}\n", command, args.join(" ")));
            CommandResult::Ok
        };

        let mut core = RpcService::new();
        let runner: Arc<dyn CommandRunner> = Arc::new(runner);
        let shared = Arc::clone(&runner);
        core.add_function("Run", flags::DONT_SUSPEND, move |ctx, _: EmptyMessage| {
            match shared.run_command(ctx, "echo", &["hi".to_string()]) {
                CommandResult::Ok => Ok(EmptyMessage {}),
                other => Err(other),
            }
        })
        .unwrap();
        let mut session = session_with(core, ServiceRegistry::new());

        let input = MsgPackCodec::encode(&EmptyMessage {}).unwrap();
        let (status, _) = call(&mut session, 0, &input);
        assert_eq!(status, CommandResult::Ok);
        assert_eq!(session.take_text()[0].text, "echo hi\n");
    }
}
