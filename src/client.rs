//! RPC client: connection, typed remote functions and suspend windows.
//!
//! A [`RemoteClient`] owns one TCP connection to a host. Functions are
//! called through [`RemoteFunction`] handles, which bind by name once and
//! then call by id. Text the host prints during a call is delivered to a
//! [`TextSink`] as each text frame arrives.
//!
//! # Example
//!
//! ```no_run
//! use dfhack_remote::protocol::{EmptyMessage, IntMessage};
//! use dfhack_remote::{RemoteClient, RemoteFunction};
//!
//! #[tokio::main]
//! async fn main() -> dfhack_remote::Result<()> {
//!     let mut client = RemoteClient::new();
//!     client.connect(0).await?;
//!
//!     let status = client.run_command("help", &[]).await;
//!     println!("help: {}", status);
//!
//!     let mut answer = RemoteFunction::<EmptyMessage, IntMessage>::new();
//!     answer.bind(&mut client, "Answer", "counter").await?;
//!     if let Ok(reply) = answer.call(&mut client, &EmptyMessage {}).await {
//!         println!("answer: {}", reply.value);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec::MsgPackCodec;
use crate::config::default_port;
use crate::error::{CommandResult, RemoteError, Result};
use crate::handler::OUTPUT_RELEASE_THRESHOLD;
use crate::protocol::{
    decode_message, read_handshake, read_header, read_payload, reply, write_handshake,
    write_header, write_message, CoreBindReply, CoreBindRequest, CoreRunCommandRequest,
    CoreTextNotification, EmptyMessage, HandshakeHeader, IntMessage, Message, MessageHeader,
    BIND_METHOD_ID, MAX_MESSAGE_SIZE, RUN_COMMAND_ID,
};
use crate::server::{BIND_METHOD, CORE_RESUME, CORE_SUSPEND, RUN_COMMAND};
use crate::text::{decode_notification, Color, ConsoleSink, TextSink};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

fn printerr(sink: &mut dyn TextSink, text: &str) {
    sink.add_text(Color::LightRed, text);
}

/// Proof of a successful [`RemoteClient::suspend`].
#[must_use = "pass the token to RemoteClient::resume"]
#[derive(Debug)]
pub struct SuspendToken {
    depth: i32,
    connection: u64,
}

impl SuspendToken {
    /// Suspend depth reported by the host after this suspend.
    pub fn depth(&self) -> i32 {
        self.depth
    }
}

/// Client side of one connection.
pub struct RemoteClient {
    stream: Option<TcpStream>,
    connection: u64,
    output: Box<dyn TextSink>,
    send: BytesMut,
    recv: BytesMut,
    suspend_ids: Option<(i16, i16)>,
}

impl RemoteClient {
    /// Disconnected client printing host text to stdout.
    pub fn new() -> Self {
        Self::with_output(ConsoleSink::new())
    }

    /// Disconnected client delivering host text to `output`.
    pub fn with_output(output: impl TextSink + 'static) -> Self {
        Self {
            stream: None,
            connection: 0,
            output: Box::new(output),
            send: BytesMut::new(),
            recv: BytesMut::new(),
            suspend_ids: None,
        }
    }

    /// Replace the default text sink.
    pub fn set_output(&mut self, output: impl TextSink + 'static) {
        self.output = Box::new(output);
    }

    /// Port used by `connect(0)`.
    pub fn default_port() -> u16 {
        default_port()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect to the host on loopback and perform the handshake.
    ///
    /// Port 0 means [`default_port`](Self::default_port). An existing
    /// connection is closed first. On failure the client stays
    /// disconnected.
    pub async fn connect(&mut self, port: u16) -> Result<()> {
        if self.is_connected() {
            self.disconnect().await;
        }

        let port = if port == 0 { default_port() } else { port };
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

        match Self::open(addr).await {
            Ok(stream) => {
                tracing::debug!("Connected to {}", addr);
                self.stream = Some(stream);
                self.connection = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
                self.suspend_ids = None;
                Ok(())
            }
            Err(e) => {
                printerr(
                    self.output.as_mut(),
                    &format!("Could not connect to localhost: {}: {}\n", port, e),
                );
                Err(e)
            }
        }
    }

    async fn open(addr: SocketAddr) -> Result<TcpStream> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        write_handshake(&mut stream, &HandshakeHeader::request()).await?;
        read_handshake(&mut stream).await?.validate_response()?;
        Ok(stream)
    }

    /// Send the quit frame and close the socket.
    pub async fn disconnect(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        self.suspend_ids = None;

        if let Err(e) = write_header(&mut stream, &MessageHeader::quit()).await {
            printerr(
                self.output.as_mut(),
                &format!("Could not send the disconnect message: {}\n", e),
            );
        }
        if let Err(e) = stream.shutdown().await {
            tracing::debug!("Socket shutdown failed: {}", e);
        }
    }

    /// Run a console command on the host.
    pub async fn run_command(&mut self, command: &str, arguments: &[String]) -> CommandResult {
        self.run_command_inner(None, command, arguments).await
    }

    /// Like [`run_command`](Self::run_command), sending text to `sink`.
    pub async fn run_command_with(
        &mut self,
        sink: &mut dyn TextSink,
        command: &str,
        arguments: &[String],
    ) -> CommandResult {
        self.run_command_inner(Some(sink), command, arguments).await
    }

    async fn run_command_inner(
        &mut self,
        sink: Option<&mut dyn TextSink>,
        command: &str,
        arguments: &[String],
    ) -> CommandResult {
        let request = CoreRunCommandRequest {
            command: command.to_string(),
            arguments: arguments.to_vec(),
        };
        let mut scratch = std::mem::take(&mut self.send);
        let result: std::result::Result<EmptyMessage, _> = self
            .roundtrip(RUN_COMMAND_ID, RUN_COMMAND, &request, &mut scratch, sink)
            .await;
        self.send = scratch;
        match result {
            Ok(_) => CommandResult::Ok,
            Err(status) => status,
        }
    }

    /// Enter a suspend window on the host; suspending calls made on this
    /// connection until [`resume`](Self::resume) run inside it.
    pub async fn suspend(&mut self) -> std::result::Result<SuspendToken, CommandResult> {
        let (suspend_id, _) = self.suspend_ids().await?;
        let mut scratch = std::mem::take(&mut self.send);
        let result: std::result::Result<IntMessage, _> = self
            .roundtrip(suspend_id, CORE_SUSPEND, &EmptyMessage {}, &mut scratch, None)
            .await;
        self.send = scratch;
        result.map(|reply| SuspendToken {
            depth: reply.value,
            connection: self.connection,
        })
    }

    /// Leave a suspend window and return the remaining depth.
    ///
    /// A token from an earlier connection is ignored: the host released
    /// its levels when that connection ended.
    pub async fn resume(&mut self, token: SuspendToken) -> std::result::Result<i32, CommandResult> {
        if token.connection != self.connection || !self.is_connected() {
            return Ok(0);
        }
        let Some((_, resume_id)) = self.suspend_ids else {
            return Ok(0);
        };
        let mut scratch = std::mem::take(&mut self.send);
        let result: std::result::Result<IntMessage, _> = self
            .roundtrip(resume_id, CORE_RESUME, &EmptyMessage {}, &mut scratch, None)
            .await;
        self.send = scratch;
        result.map(|reply| reply.value)
    }

    async fn suspend_ids(&mut self) -> std::result::Result<(i16, i16), CommandResult> {
        if let Some(ids) = self.suspend_ids {
            return Ok(ids);
        }
        let suspend = self
            .bind_method::<EmptyMessage, IntMessage>(CORE_SUSPEND, "")
            .await?;
        let resume = self
            .bind_method::<EmptyMessage, IntMessage>(CORE_RESUME, "")
            .await?;
        self.suspend_ids = Some((suspend, resume));
        Ok((suspend, resume))
    }

    /// Ask the host for the id of `plugin::name` with this signature.
    async fn bind_method<In: Message, Out: Message>(
        &mut self,
        name: &str,
        plugin: &str,
    ) -> std::result::Result<i16, CommandResult> {
        let request = CoreBindRequest {
            method: name.to_string(),
            input_msg: In::NAME.to_string(),
            output_msg: Out::NAME.to_string(),
            plugin: (!plugin.is_empty()).then(|| plugin.to_string()),
        };
        let mut scratch = std::mem::take(&mut self.send);
        let result: std::result::Result<CoreBindReply, _> = self
            .roundtrip(BIND_METHOD_ID, BIND_METHOD, &request, &mut scratch, None)
            .await;
        self.send = scratch;

        let reply = result?;
        i16::try_from(reply.assigned_id).map_err(|_| {
            printerr(
                self.output.as_mut(),
                &format!("Invalid id {} bound for {}\n", reply.assigned_id, name),
            );
            CommandResult::LinkFailure
        })
    }

    /// One complete call: send `input` to `id`, relay text, decode the result.
    ///
    /// The shared receive buffer is released afterwards if a reply grew it
    /// past [`OUTPUT_RELEASE_THRESHOLD`].
    async fn roundtrip<In: Message, Out: Message>(
        &mut self,
        id: i16,
        label: &str,
        input: &In,
        scratch: &mut BytesMut,
        sink: Option<&mut dyn TextSink>,
    ) -> std::result::Result<Out, CommandResult> {
        let result = self.exchange_typed(id, label, input, scratch, sink).await;
        release_large(&mut self.recv);
        result
    }

    async fn exchange_typed<In: Message, Out: Message>(
        &mut self,
        id: i16,
        label: &str,
        input: &In,
        scratch: &mut BytesMut,
        sink: Option<&mut dyn TextSink>,
    ) -> std::result::Result<Out, CommandResult> {
        let Self {
            stream,
            output,
            recv,
            ..
        } = self;
        let sink: &mut dyn TextSink = match sink {
            Some(sink) => sink,
            None => output.as_mut(),
        };

        let Some(socket) = stream.as_mut() else {
            printerr(sink, &format!("In call to {}: client connection not valid.\n", label));
            return Err(CommandResult::LinkFailure);
        };

        if let Err(e) = MsgPackCodec::encode_into(input, scratch) {
            printerr(sink, &format!("In call to {}: could not encode input: {}\n", label, e));
            return Err(CommandResult::LinkFailure);
        }
        if scratch.len() > MAX_MESSAGE_SIZE {
            printerr(
                sink,
                &format!("In call to {}: message too large: {}.\n", label, scratch.len()),
            );
            return Err(CommandResult::LinkFailure);
        }

        let status = match exchange(socket, id, scratch, recv, sink).await {
            Ok(status) => status,
            Err(e) => {
                printerr(sink, &format!("In call to {}: {}\n", label, e));
                tracing::debug!("Closing connection after {} failed: {}", label, e);
                *stream = None;
                return Err(CommandResult::LinkFailure);
            }
        };
        if !status.is_ok() {
            return Err(status);
        }

        decode_message(recv).map_err(|e| {
            printerr(
                sink,
                &format!("In call to {}: error parsing received result: {}\n", label, e),
            );
            CommandResult::LinkFailure
        })
    }
}

impl Default for RemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("connected", &self.is_connected())
            .field("connection", &self.connection)
            .field("suspend_ids", &self.suspend_ids)
            .finish()
    }
}

/// Drop a receive buffer's memory once it outgrew the reuse threshold.
fn release_large(buf: &mut BytesMut) {
    if buf.capacity() > OUTPUT_RELEASE_THRESHOLD {
        *buf = BytesMut::new();
    } else {
        buf.clear();
    }
}

/// Send one request and read frames until its outcome.
///
/// `Ok` carries the host's status; on `Ok(CommandResult::Ok)` the result
/// payload is in `recv`. Text frames go to `sink` as they arrive. `Err`
/// means the link itself failed.
async fn exchange<S>(
    stream: &mut S,
    id: i16,
    input: &[u8],
    recv: &mut BytesMut,
    sink: &mut dyn TextSink,
) -> Result<CommandResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(stream, id, input).await?;

    loop {
        let header = read_header(stream).await?;
        if header.is_fail() {
            return Ok(header.status());
        }

        let len = header.payload_len()?;
        read_payload(stream, len, recv).await?;

        match header.id {
            reply::RESULT => return Ok(CommandResult::Ok),
            reply::TEXT => {
                let notification: CoreTextNotification = decode_message(recv)?;
                decode_notification(&notification, sink);
            }
            other => {
                return Err(RemoteError::Protocol(format!(
                    "unexpected reply id {}",
                    other
                )))
            }
        }
    }
}

/// Typed handle to a host function, bound by name.
pub struct RemoteFunction<In: Message, Out: Message> {
    name: String,
    plugin: String,
    id: Option<i16>,
    connection: u64,
    input: BytesMut,
    _phantom: PhantomData<fn(In) -> Out>,
}

impl<In: Message, Out: Message> RemoteFunction<In, Out> {
    /// Unbound handle.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            plugin: String::new(),
            id: None,
            connection: 0,
            input: BytesMut::new(),
            _phantom: PhantomData,
        }
    }

    /// Bind to `plugin::name` on `client`'s connection.
    ///
    /// Binding again to the same target is a no-op (or a fresh bind after
    /// a reconnect). Binding to a different target is an error.
    ///
    /// # Errors
    ///
    /// [`RemoteError::AlreadyBound`] for a different target,
    /// [`RemoteError::Call`] if the host refuses the bind.
    pub async fn bind(&mut self, client: &mut RemoteClient, name: &str, plugin: &str) -> Result<()> {
        if self.id.is_some() {
            if self.name != name || self.plugin != plugin {
                let err = RemoteError::AlreadyBound {
                    plugin: self.plugin.clone(),
                    name: self.name.clone(),
                };
                printerr(client.output.as_mut(), &format!("{}\n", err));
                return Err(err);
            }
            if self.connection == client.connection && client.is_connected() {
                return Ok(());
            }
        }

        self.name = name.to_string();
        self.plugin = plugin.to_string();
        self.id = None;

        let id = client
            .bind_method::<In, Out>(name, plugin)
            .await
            .map_err(RemoteError::Call)?;
        self.id = Some(id);
        self.connection = client.connection;
        Ok(())
    }

    /// Call the function; host text goes to the client's sink.
    pub async fn call(
        &mut self,
        client: &mut RemoteClient,
        input: &In,
    ) -> std::result::Result<Out, CommandResult> {
        self.call_inner(client, None, input).await
    }

    /// Call the function; host text goes to `sink`.
    pub async fn call_with(
        &mut self,
        client: &mut RemoteClient,
        sink: &mut dyn TextSink,
        input: &In,
    ) -> std::result::Result<Out, CommandResult> {
        self.call_inner(client, Some(sink), input).await
    }

    async fn call_inner(
        &mut self,
        client: &mut RemoteClient,
        sink: Option<&mut dyn TextSink>,
        input: &In,
    ) -> std::result::Result<Out, CommandResult> {
        let id = match self.id {
            Some(id) if self.connection == client.connection => id,
            _ => {
                let text = format!(
                    "Calling an unbound RPC function {}::{}.\n",
                    self.plugin, self.name
                );
                match sink {
                    Some(sink) => printerr(sink, &text),
                    None => printerr(client.output.as_mut(), &text),
                }
                return Err(CommandResult::NotImplemented);
            }
        };

        let label = if self.plugin.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", self.plugin, self.name)
        };
        client
            .roundtrip(id, &label, input, &mut self.input, sink)
            .await
    }

    /// Drop cached encoding state; `free` also releases its memory.
    pub fn reset(&mut self, free: bool) {
        if free {
            self.input = BytesMut::new();
        } else {
            self.input.clear();
        }
    }

    /// Assigned id, if bound.
    pub fn id(&self) -> Option<i16> {
        self.id
    }

    pub fn is_bound(&self) -> bool {
        self.id.is_some()
    }
}

impl<In: Message, Out: Message> Default for RemoteFunction<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: Message, Out: Message> std::fmt::Debug for RemoteFunction<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("id", &self.id)
            .field("input", &In::NAME)
            .field("output", &Out::NAME)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, CoreTextFragment, StringMessage};
    use crate::text::CaptureSink;
    use tokio::io::{duplex, AsyncReadExt};

    async fn read_request(server: &mut tokio::io::DuplexStream) -> (MessageHeader, Vec<u8>) {
        let header = read_header(server).await.unwrap();
        let mut payload = BytesMut::new();
        read_payload(server, header.payload_len().unwrap(), &mut payload)
            .await
            .unwrap();
        (header, payload.to_vec())
    }

    fn text_frame(text: &str) -> Vec<u8> {
        let payload = MsgPackCodec::encode(&CoreTextNotification {
            fragments: vec![CoreTextFragment {
                text: text.to_string(),
                color: None,
            }],
        })
        .unwrap();
        build_frame(
            &MessageHeader::new(reply::TEXT, payload.len() as i32),
            &payload,
        )
    }

    #[tokio::test]
    async fn test_exchange_relays_text_then_result() {
        let (mut client, mut server) = duplex(4096);

        let host = tokio::spawn(async move {
            let (header, payload) = read_request(&mut server).await;
            assert_eq!(header.id, 7);
            let request: StringMessage = decode_message(&payload).unwrap();

            server.write_all(&text_frame("working\n")).await.unwrap();
            server.write_all(&text_frame("done\n")).await.unwrap();
            let result = MsgPackCodec::encode(&request).unwrap();
            server
                .write_all(&build_frame(
                    &MessageHeader::new(reply::RESULT, result.len() as i32),
                    &result,
                ))
                .await
                .unwrap();
        });

        let input = MsgPackCodec::encode(&StringMessage {
            value: "hi".to_string(),
        })
        .unwrap();
        let mut recv = BytesMut::new();
        let mut sink = CaptureSink::new();
        let status = exchange(&mut client, 7, &input, &mut recv, &mut sink)
            .await
            .unwrap();

        assert_eq!(status, CommandResult::Ok);
        assert_eq!(sink.batches(), 2);
        assert_eq!(sink.text(), "working\ndone\n");
        let output: StringMessage = decode_message(&recv).unwrap();
        assert_eq!(output.value, "hi");
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_fail_frame_status() {
        let (mut client, mut server) = duplex(4096);

        let host = tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(&MessageHeader::fail(CommandResult::WrongUsage).encode())
                .await
                .unwrap();
            // A failure that claims Ok is still a failure.
            read_request(&mut server).await;
            server
                .write_all(&MessageHeader::new(reply::FAIL, 0).encode())
                .await
                .unwrap();
        });

        let mut recv = BytesMut::new();
        let mut sink = CaptureSink::new();
        let first = exchange(&mut client, 2, &[], &mut recv, &mut sink).await.unwrap();
        let second = exchange(&mut client, 2, &[], &mut recv, &mut sink).await.unwrap();
        assert_eq!(first, CommandResult::WrongUsage);
        assert_eq!(second, CommandResult::Failure);
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_unexpected_id_is_link_error() {
        let (mut client, mut server) = duplex(4096);

        let host = tokio::spawn(async move {
            read_request(&mut server).await;
            server
                .write_all(&build_frame(&MessageHeader::new(12, 0), &[]))
                .await
                .unwrap();
        });

        let mut recv = BytesMut::new();
        let mut sink = CaptureSink::new();
        let result = exchange(&mut client, 2, &[], &mut recv, &mut sink).await;
        assert!(matches!(result, Err(RemoteError::Protocol(_))));
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_oversized_reply_not_read() {
        let (mut client, mut server) = duplex(4096);

        let host = tokio::spawn(async move {
            read_request(&mut server).await;
            let header = MessageHeader::new(reply::RESULT, (MAX_MESSAGE_SIZE + 1) as i32);
            server.write_all(&header.encode()).await.unwrap();
            server
        });

        let mut recv = BytesMut::new();
        let mut sink = CaptureSink::new();
        let result = exchange(&mut client, 2, &[], &mut recv, &mut sink).await;
        assert!(matches!(result, Err(RemoteError::MessageTooLarge(_))));
        assert!(recv.is_empty());

        let mut server = host.await.unwrap();
        drop(client);
        let mut rest = Vec::new();
        assert_eq!(server.read_to_end(&mut rest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_client_reports_link_failure() {
        let mut client = RemoteClient::with_output(CaptureSink::new());
        assert!(!client.is_connected());

        let mut sink = CaptureSink::new();
        let status = client.run_command_with(&mut sink, "ls", &[]).await;
        assert_eq!(status, CommandResult::LinkFailure);
        assert!(sink.text().contains("client connection not valid"));

        assert!(matches!(
            client.suspend().await,
            Err(CommandResult::LinkFailure)
        ));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_unbound_function_is_not_implemented() {
        let mut client = RemoteClient::with_output(CaptureSink::new());
        let mut function = RemoteFunction::<EmptyMessage, IntMessage>::new();
        assert!(!function.is_bound());
        assert_eq!(function.id(), None);

        let mut sink = CaptureSink::new();
        let result = function
            .call_with(&mut client, &mut sink, &EmptyMessage {})
            .await;
        assert_eq!(result, Err(CommandResult::NotImplemented));
        assert!(sink.text().starts_with("Calling an unbound RPC function"));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_client_disconnected() {
        // Grab a free port, then close it so nothing listens there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = RemoteClient::with_output(CaptureSink::new());
        assert!(client.connect(port).await.is_err());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_reset_releases_input_buffer() {
        let mut function = RemoteFunction::<StringMessage, StringMessage>::new();
        function.input.extend_from_slice(&[0u8; 64]);

        function.reset(false);
        assert!(function.input.is_empty());
        assert!(function.input.capacity() >= 64);

        function.reset(true);
        assert_eq!(function.input.capacity(), 0);
    }

    #[test]
    fn test_release_large_keeps_small_buffers() {
        let mut buf = BytesMut::with_capacity(1024);
        buf.extend_from_slice(b"reply");
        release_large(&mut buf);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 1024);

        let mut big = BytesMut::with_capacity(OUTPUT_RELEASE_THRESHOLD + 1);
        release_large(&mut big);
        assert_eq!(big.capacity(), 0);
    }

    #[tokio::test]
    async fn test_large_reply_does_not_pin_receive_buffer() {
        use crate::handler::{flags, RpcService};
        use crate::server::RemoteServer;

        let server = RemoteServer::builder()
            .service("bulk", || {
                let mut service = RpcService::new();
                service
                    .add_function("Fill", flags::NONE, |_ctx, input: IntMessage| {
                        Ok(StringMessage {
                            value: "x".repeat(input.value as usize),
                        })
                    })
                    .unwrap();
                service
            })
            .build();
        let addr = server.listen(0).started().await.unwrap();

        let mut client = RemoteClient::with_output(CaptureSink::new());
        client.connect(addr.port()).await.unwrap();
        let mut fill = RemoteFunction::<IntMessage, StringMessage>::new();
        fill.bind(&mut client, "Fill", "bulk").await.unwrap();

        let reply = fill
            .call(&mut client, &IntMessage { value: 1 << 20 })
            .await
            .unwrap();
        assert_eq!(reply.value.len(), 1 << 20);
        assert!(client.recv.capacity() <= OUTPUT_RELEASE_THRESHOLD);

        let reply = fill.call(&mut client, &IntMessage { value: 16 }).await.unwrap();
        assert_eq!(reply.value.len(), 16);
        assert!(client.recv.is_empty());
        client.disconnect().await;
    }
}
