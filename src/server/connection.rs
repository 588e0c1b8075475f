//! One client connection: handshake, then a strictly sequential
//! read-dispatch-reply loop.
//!
//! Handlers run on tokio's blocking pool. While one runs, text it flushes
//! on demand is forwarded to the socket; everything else it printed goes
//! out right before the reply.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::ServerState;
use crate::codec::MsgPackCodec;
use crate::error::{CommandResult, RemoteError, Result};
use crate::handler::{flags, CallBuffers, ServerFunction, Session, INPUT_RELEASE_THRESHOLD};
use crate::protocol::{
    read_handshake, read_header, read_payload, reply, write_handshake, write_header,
    write_message, HandshakeHeader, MessageHeader, MAX_MESSAGE_SIZE,
};
use crate::text::{encode_notification, Color, TextFragment};

/// Whether `ip` is a loopback address, including IPv4-mapped IPv6.
pub(crate) fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Server side of one connection.
pub(crate) struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    state: Arc<ServerState>,
    discard: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(stream: S, peer: SocketAddr, state: Arc<ServerState>) -> Self {
        Self {
            stream,
            peer,
            state,
            discard: BytesMut::new(),
        }
    }

    /// Serve until the client quits, the link fails or the server is blocked.
    pub(crate) async fn run(mut self) -> Result<()> {
        let request = read_handshake(&mut self.stream).await?;
        if let Err(e) = request.validate_request() {
            tracing::warn!("Rejecting connection from {}: {}", self.peer, e);
            return Err(e);
        }
        write_handshake(&mut self.stream, &HandshakeHeader::response()).await?;

        let mut session = Session::new(
            super::core_service::core_service()?,
            Arc::clone(&self.state.registry),
            Arc::clone(&self.state.runner),
            Arc::clone(&self.state.coordinator),
            self.peer,
        )?;
        tracing::debug!("Client connection established: {}", self.peer);

        loop {
            let header = read_header(&mut self.stream).await?;
            if header.is_quit() {
                tracing::debug!("Client {} quit", self.peer);
                break;
            }

            let len = header.payload_len().map_err(|e| {
                tracing::debug!("Invalid received size {} from {}", header.size, self.peer);
                e
            })?;

            let slot = session
                .table_mut()
                .get_mut(header.id)
                .map(|slot| (Arc::clone(slot.function()), slot.take_buffers()));

            let Some((function, mut buffers)) = slot else {
                read_payload(&mut self.stream, len, &mut self.discard).await?;
                self.release_discard();
                self.check_blocked()?;

                session.add_text(
                    Color::LightRed,
                    &format!("RPC call of invalid id {}\n", header.id),
                );
                self.finish(&mut session, CommandResult::Failure, &[]).await?;
                continue;
            };

            read_payload(&mut self.stream, len, &mut buffers.input).await?;
            self.check_blocked()?;

            if !function.has_flag(flags::ALLOW_REMOTE) && !is_loopback(self.peer.ip()) {
                tracing::warn!(
                    "Refusing {} from non-loopback client {}",
                    function.name(),
                    self.peer
                );
                session.add_text(
                    Color::LightRed,
                    &format!("In call to {}: forbidden host.\n", function.name()),
                );
                self.finish(&mut session, CommandResult::Failure, &[]).await?;
                buffers.reset_after_call(function.flags());
                restore(&mut session, header.id, buffers);
                continue;
            }

            let (returned, mut buffers, mut status) =
                self.dispatch(session, Arc::clone(&function), buffers).await?;
            session = returned;

            if status.is_ok() && buffers.output.len() > MAX_MESSAGE_SIZE {
                tracing::warn!(
                    "Result of {} is {} bytes, over the message limit",
                    function.name(),
                    buffers.output.len()
                );
                status = CommandResult::LinkFailure;
            }

            self.finish(&mut session, status, &buffers.output).await?;
            buffers.reset_after_call(function.flags());
            restore(&mut session, header.id, buffers);
        }

        Ok(())
    }

    /// Run the handler off the async threads, forwarding flushed text
    /// while it runs.
    async fn dispatch(
        &mut self,
        mut session: Session,
        function: Arc<ServerFunction>,
        mut buffers: CallBuffers,
    ) -> Result<(Session, CallBuffers, CommandResult)> {
        let (live_tx, mut live_rx) = mpsc::unbounded_channel::<Vec<TextFragment>>();
        session.attach_text_channel(Some(live_tx));

        let mut task = tokio::task::spawn_blocking(move || {
            let status = function.execute(&mut session, &buffers.input, &mut buffers.output);
            session.attach_text_channel(None);
            (session, buffers, status)
        });

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                Some(batch) = live_rx.recv() => self.send_text(&batch).await?,
            }
        };

        while let Ok(batch) = live_rx.try_recv() {
            self.send_text(&batch).await?;
        }

        joined.map_err(RemoteError::from)
    }

    /// Send pending text, then the result or failure frame.
    async fn finish(
        &mut self,
        session: &mut Session,
        status: CommandResult,
        output: &[u8],
    ) -> Result<()> {
        let pending = session.take_text();
        if !pending.is_empty() {
            self.send_text(&pending).await?;
        }

        if status.is_ok() {
            write_message(&mut self.stream, reply::RESULT, output).await
        } else {
            write_header(&mut self.stream, &MessageHeader::fail(status)).await
        }
    }

    async fn send_text(&mut self, fragments: &[TextFragment]) -> Result<()> {
        let payload = MsgPackCodec::encode(&encode_notification(fragments))?;
        write_message(&mut self.stream, reply::TEXT, &payload).await
    }

    fn check_blocked(&self) -> Result<()> {
        if self.state.coordinator.is_blocked() {
            tracing::debug!("Dropping client {}: server blocked", self.peer);
            return Err(RemoteError::Protocol("server blocked".to_string()));
        }
        Ok(())
    }

    fn release_discard(&mut self) {
        if self.discard.capacity() > INPUT_RELEASE_THRESHOLD {
            self.discard = BytesMut::new();
        } else {
            self.discard.clear();
        }
    }
}

fn restore(session: &mut Session, id: i16, buffers: CallBuffers) {
    if let Some(slot) = session.table_mut().get_mut(id) {
        slot.restore_buffers(buffers);
    }
}
