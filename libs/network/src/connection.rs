//! One TCP channel to a peer
//!
//! A `Connection` is shared between its reader task, its writer task, the
//! peer registry and any caller holding it for `ViaConnection` sends. Writes
//! are queued on an unbounded channel drained by the single writer task, so
//! concurrent senders never interleave frames.

use crate::error::{Result, TransportError};
use crate::metrics::TrafficObserver;
use crate::send::{PendingWrites, WriteCompletion, WriteHandle};
use codec::{wire_size, MessageCodec, ProtocolError};
use config::IdleSettings;
use futures::SinkExt;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use types::{MessageBuilder, MetaType, MultiplexerMessage, PeerId, PeerType};

pub type ConnectionId = u64;

/// Identity announced by a peer's welcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub peer_id: PeerId,
    pub peer_type: PeerType,
}

/// Frame queued for the writer task
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) message: MultiplexerMessage,
    pub(crate) completion: WriteCompletion,
}

pub(crate) type Registration = oneshot::Sender<Result<PeerIdentity>>;

pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    /// Address we dialed, remembered for reconnection
    dial_addr: Option<SocketAddr>,
    identity: Mutex<Option<PeerIdentity>>,
    idle: Mutex<IdleSettings>,
    welcome_sent: AtomicBool,
    registration: Mutex<Option<Registration>>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    pending: Arc<PendingWrites>,
    closed: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        dial_addr: Option<SocketAddr>,
        idle: IdleSettings,
        pending: Arc<PendingWrites>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id,
            remote_addr,
            dial_addr,
            identity: Mutex::new(None),
            idle: Mutex::new(idle),
            welcome_sent: AtomicBool::new(false),
            registration: Mutex::new(None),
            outbound,
            pending,
            closed: CancellationToken::new(),
        });
        (connection, rx)
    }

    /// A connection backed by no socket; every write to it fails
    pub fn detached(id: ConnectionId, remote_addr: SocketAddr) -> Arc<Self> {
        let (connection, _queue) = Self::new(
            id,
            remote_addr,
            None,
            IdleSettings::default(),
            Arc::new(PendingWrites::new()),
        );
        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn dial_addr(&self) -> Option<SocketAddr> {
        self.dial_addr
    }

    /// True if this side initiated the connection
    pub fn is_outbound(&self) -> bool {
        self.dial_addr.is_some()
    }

    /// Identity from the first valid welcome, if received yet
    pub fn identity(&self) -> Option<PeerIdentity> {
        *self.identity.lock()
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.identity().map(|i| i.peer_id)
    }

    pub fn peer_type(&self) -> Option<PeerType> {
        self.identity().map(|i| i.peer_type)
    }

    pub(crate) fn set_identity(&self, identity: PeerIdentity) {
        *self.identity.lock() = Some(identity);
    }

    pub fn idle(&self) -> IdleSettings {
        *self.idle.lock()
    }

    pub(crate) fn set_idle(&self, idle: IdleSettings) {
        *self.idle.lock() = idle;
    }

    /// Claim the right to send our welcome; true only for the first caller
    pub(crate) fn mark_welcome_sent(&self) -> bool {
        !self.welcome_sent.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn install_registration(&self, registration: Registration) {
        *self.registration.lock() = Some(registration);
    }

    /// Resolve the pending registration future, if one is still waiting
    pub(crate) fn complete_registration(&self, result: Result<PeerIdentity>) {
        if let Some(registration) = self.registration.lock().take() {
            let _ = registration.send(result);
        }
    }

    /// Queue `message` for the writer task
    pub fn write(&self, message: MultiplexerMessage) -> WriteHandle {
        if self.is_closed() {
            return WriteHandle::failed(self.id, TransportError::closed(self.id, "already closed"));
        }

        let (completion, handle) = WriteCompletion::new(&self.pending);
        // A rejected item drops its completion, which fails the handle.
        let _ = self.outbound.send(Outgoing {
            message,
            completion,
        });
        handle.for_connection(self.id)
    }

    /// Close the channel; idempotent
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(connection = self.id, remote = %self.remote_addr, "Closing connection");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub(crate) fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("outbound", &self.is_outbound())
            .field("identity", &self.identity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Drain the write queue into the socket.
///
/// Sends a heartbeat whenever the queue stays empty for the write-idle
/// threshold. A message too large to frame fails only its own write; any
/// other write error closes the connection.
pub(crate) async fn run_writer<W>(
    connection: Arc<Connection>,
    mut sink: FramedWrite<W, MessageCodec>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    local_id: PeerId,
    observer: Arc<dyn TrafficObserver>,
) where
    W: AsyncWrite + Unpin,
{
    let closed = connection.close_token();

    loop {
        let write_idle = connection.idle().write_idle();

        tokio::select! {
            _ = closed.cancelled() => break,
            next = tokio::time::timeout(write_idle, queue.recv()) => match next {
                Ok(Some(Outgoing { message, completion })) => {
                    let size = wire_size(&message);
                    match sink.send(message.clone()).await {
                        Ok(()) => {
                            observer.on_sent(&connection, &message, size);
                            completion.written();
                        }
                        Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                            warn!(connection = connection.id, message_id = message.id, error = %e, "Dropping oversized message");
                            completion.failed(TransportError::from(e));
                        }
                        Err(e) => {
                            warn!(connection = connection.id, error = %e, "Write failed");
                            completion.failed(TransportError::from(e));
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let heartbeat = MessageBuilder::meta(MetaType::Heartbit).from(local_id).build();
                    trace!(connection = connection.id, "Write idle, sending heartbeat");
                    let size = wire_size(&heartbeat);
                    if let Err(e) = sink.send(heartbeat.clone()).await {
                        warn!(connection = connection.id, error = %e, "Heartbeat write failed");
                        break;
                    }
                    observer.on_sent(&connection, &heartbeat, size);
                }
            },
        }
    }

    connection.close();
    // Remaining queued writes fail as their completions drop with the queue.
    queue.close();
}
