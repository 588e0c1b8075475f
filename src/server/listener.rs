//! TCP accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::ServerState;
use crate::error::{RemoteError, Result};

/// Consecutive accept failures after which the listener gives up.
pub const MAX_ACCEPT_FAILURES: u32 = 5;

const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to a background listener task.
///
/// Dropping the handle leaves the listener running.
pub struct ListenerHandle {
    started: Option<oneshot::Receiver<Result<SocketAddr>>>,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Wait until the socket is bound and return its address.
    ///
    /// # Errors
    ///
    /// Returns the bind error, or a protocol error if the listener task
    /// ended before reporting.
    pub async fn started(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }
        let rx = self
            .started
            .take()
            .ok_or_else(|| RemoteError::Protocol("listener failed to start".to_string()))?;
        let addr = rx.await.map_err(|_| {
            RemoteError::Protocol("listener ended before binding".to_string())
        })??;
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop accepting. Established connections are not affected.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    /// Whether the accept loop has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(addr: SocketAddr, state: Arc<ServerState>) -> ListenerHandle {
    let (started_tx, started_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let bound = match TcpListener::bind(addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(e) => Err(e),
        };
        let listener = match bound {
            Ok((listener, local)) => {
                info!("Remote server listening on {}", local);
                let _ = started_tx.send(Ok(local));
                listener
            }
            Err(e) => {
                error!("Could not listen on {}: {}", addr, e);
                let _ = started_tx.send(Err(e.into()));
                return;
            }
        };
        accept_loop(listener, state).await;
    });

    ListenerHandle {
        started: Some(started_rx),
        local_addr: None,
        task,
    }
}

/// Consecutive accept failures; any successful accept resets the count.
#[derive(Debug, Default)]
struct AcceptFailures {
    count: u32,
}

impl AcceptFailures {
    /// Count one failure; `true` once the listener should give up.
    fn record_error(&mut self) -> bool {
        self.count += 1;
        self.count >= MAX_ACCEPT_FAILURES
    }

    fn record_success(&mut self) {
        self.count = 0;
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    let mut failures = AcceptFailures::default();

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                failures.record_success();

                if state.coordinator.is_blocked() {
                    debug!("Refusing {}: server blocked", peer);
                    continue;
                }
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Cannot set TCP_NODELAY for {}: {}", peer, e);
                }

                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    debug!("Connection from {}", peer);
                    match Connection::new(stream, peer, state).run().await {
                        Ok(()) => debug!("Shutting down client connection {}", peer),
                        Err(RemoteError::Io(e)) => {
                            debug!("Client connection {} closed: {}", peer, e)
                        }
                        Err(e) => warn!("Client connection {} dropped: {}", peer, e),
                    }
                });
            }
            Err(e) => {
                let give_up = failures.record_error();
                warn!(
                    "Accept error ({}/{}): {}",
                    failures.count, MAX_ACCEPT_FAILURES, e
                );
                if give_up {
                    error!(
                        "Remote server giving up after {} consecutive accept errors",
                        failures.count
                    );
                    break;
                }
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AcceptFailures, MAX_ACCEPT_FAILURES};
    use crate::config::ServerConfig;
    use crate::protocol::{read_handshake, HandshakeHeader};
    use crate::server::RemoteServer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn test_five_consecutive_accept_errors_stop() {
        let mut failures = AcceptFailures::default();
        for _ in 1..MAX_ACCEPT_FAILURES {
            assert!(!failures.record_error());
        }
        assert!(failures.record_error());
    }

    #[test]
    fn test_successful_accept_resets_error_count() {
        let mut failures = AcceptFailures::default();
        for _ in 0..4 {
            assert!(!failures.record_error());
        }
        failures.record_success();
        for _ in 0..4 {
            assert!(!failures.record_error());
        }
        assert_eq!(failures.count, 4);
    }

    #[tokio::test]
    async fn test_listen_on_ephemeral_port() {
        let server = RemoteServer::builder().build();
        let mut handle = server.listen(0);
        let addr = handle.started().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(handle.started().await.unwrap(), addr);

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&HandshakeHeader::request().encode())
            .await
            .unwrap();
        let response = read_handshake(&mut stream).await.unwrap();
        response.validate_response().unwrap();

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_bind_error_is_reported() {
        let server = RemoteServer::builder().build();
        let mut first = server.listen(0);
        let addr = first.started().await.unwrap();

        let other = RemoteServer::builder()
            .config(ServerConfig {
                allow_remote: false,
                port: addr.port(),
            })
            .build();
        let mut second = other.start();
        assert!(second.started().await.is_err());
        assert!(second.started().await.is_err());
    }

    #[tokio::test]
    async fn test_blocked_listener_drops_new_clients() {
        let server = RemoteServer::builder().build();
        let mut handle = server.listen(0);
        let addr = handle.started().await.unwrap();
        server.coordinator().block_all();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let _ = stream.write_all(&HandshakeHeader::request().encode()).await;
        let mut buf = Vec::new();
        let read = stream.read_to_end(&mut buf).await;
        assert!(read.map(|n| n == 0).unwrap_or(true));
        assert!(!handle.is_finished());
    }
}
