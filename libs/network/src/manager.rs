//! Connection Manager
//!
//! Owns every TCP connection of one peer process. Per connection the inbound
//! path is a fixed pipeline:
//!
//! ```text
//! socket → MessageCodec → read-idle timer → welcome handshake
//!        → heartbeat filter → duplicate filter → MessageListener
//! ```
//!
//! and the outbound path is a single writer task per socket that emits a
//! heartbeat whenever it has been idle for the write-idle threshold.
//!
//! Connections this side dialed remember their address and are re-dialed
//! after `reconnect_delay` when they drop, until [`ConnectionManager::shutdown`].

use crate::connection::{run_writer, Connection, PeerIdentity, Registration};
use crate::error::{Result, RoutingError, TransportError};
use crate::listener::{Incoming, MessageListener};
use crate::metrics::{NoopObserver, TrafficObserver};
use crate::recent::RecentIdPool;
use crate::registry::PeerRegistry;
use crate::send::{PendingWrites, SendGroup, SendPolicy};
use codec::{wire_size, MessageCodec};
use config::ConnectionSettings;
use futures::StreamExt;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use types::{
    random_id, MessageBuilder, MessageType, MetaType, MultiplexerMessage, PeerId, PeerType,
    WelcomeMessage,
};

/// Handle to a connection manager; clones share the same state
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    settings: ConnectionSettings,
    peer_type: PeerType,
    instance_id: PeerId,
    registry: PeerRegistry,
    recent: Mutex<RecentIdPool>,
    listener: Option<Arc<dyn MessageListener>>,
    observer: Arc<dyn TrafficObserver>,
    pending: Arc<PendingWrites>,
    shutdown: CancellationToken,
    next_connection_id: AtomicU64,
}

/// Consecutive handshakes the remote closes before a reconnect loop stops
const MAX_HANDSHAKE_REJECTIONS: u32 = 3;

/// Configures a [`ConnectionManager`] before any connection exists
pub struct ConnectionManagerBuilder {
    settings: ConnectionSettings,
    peer_type: PeerType,
    instance_id: Option<PeerId>,
    listener: Option<Arc<dyn MessageListener>>,
    observer: Arc<dyn TrafficObserver>,
}

impl ConnectionManagerBuilder {
    pub fn listener(mut self, listener: impl MessageListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn shared_listener(mut self, listener: Arc<dyn MessageListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TrafficObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Fix the instance id instead of drawing a random one
    pub fn instance_id(mut self, instance_id: PeerId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn build(self) -> ConnectionManager {
        let instance_id = self.instance_id.unwrap_or_else(random_id);
        let recent = RecentIdPool::new(self.settings.recent_id_capacity);

        info!(
            instance_id,
            peer_type = self.peer_type,
            "Connection manager created"
        );

        ConnectionManager {
            inner: Arc::new(ManagerInner {
                settings: self.settings,
                peer_type: self.peer_type,
                instance_id,
                registry: PeerRegistry::new(),
                recent: Mutex::new(recent),
                listener: self.listener,
                observer: self.observer,
                pending: Arc::new(PendingWrites::new()),
                shutdown: CancellationToken::new(),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }
}

impl ConnectionManager {
    pub fn builder(settings: ConnectionSettings, peer_type: PeerType) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            settings,
            peer_type,
            instance_id: None,
            listener: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn new(
        settings: ConnectionSettings,
        peer_type: PeerType,
        listener: impl MessageListener,
    ) -> Self {
        Self::builder(settings, peer_type).listener(listener).build()
    }

    /// Random id identifying this process to its peers, stable across reconnects
    pub fn instance_id(&self) -> PeerId {
        self.inner.instance_id
    }

    pub fn peer_type(&self) -> PeerType {
        self.inner.peer_type
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    /// Dial `addr` and complete the welcome handshake.
    ///
    /// Fails on connect errors, on a password mismatch and when the handshake
    /// does not finish within the connect timeout. Once established, the
    /// connection is re-dialed automatically whenever it drops.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Arc<Connection>> {
        self.inner.establish(addr).await
    }

    /// Accept inbound connections until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::io("listener address", e))?;
        info!(%local, "Accepting connections");

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    info!(%local, "Stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "Accepted connection");
                        self.inner.attach(stream, remote, None, None);
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }
    }

    /// Start an application message from this instance
    pub fn create_message(&self, message_type: MessageType) -> MessageBuilder {
        MessageBuilder::new(message_type).from(self.inner.instance_id)
    }

    /// Start a response to `request` from this instance
    pub fn create_response(
        &self,
        request: &MultiplexerMessage,
        message_type: MessageType,
    ) -> MessageBuilder {
        MessageBuilder::response_to(request, message_type).from(self.inner.instance_id)
    }

    /// Queue `message` on the connections selected by `policy`.
    ///
    /// Lookup failures are returned synchronously. Write failures surface
    /// through the returned group.
    pub fn send(
        &self,
        message: MultiplexerMessage,
        policy: SendPolicy,
    ) -> std::result::Result<SendGroup, RoutingError> {
        let registry = &self.inner.registry;
        let targets = match policy {
            SendPolicy::OneOfType(peer_type) => vec![registry.pick_round_robin(peer_type)?],
            SendPolicy::AllOfType(peer_type) => registry.all_of_type(peer_type)?,
            SendPolicy::ViaConnection(connection) => {
                if connection.is_closed() {
                    return Err(RoutingError::ConnectionClosed(connection.id()));
                }
                vec![connection]
            }
            SendPolicy::ViaPeerId(peer_id) => vec![registry.by_peer_id(peer_id)?],
        };

        trace!(
            id = message.id,
            message_type = message.message_type,
            targets = targets.len(),
            "Sending"
        );

        let writes = targets
            .iter()
            .map(|connection| connection.write(message.clone()))
            .collect();
        Ok(SendGroup::new(writes))
    }

    /// Wait until every write issued so far has completed.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn flush_all(&self, timeout: Duration) -> bool {
        self.inner.pending.wait_drained(timeout).await
    }

    /// Connections currently tracked, bound or still handshaking
    pub fn connection_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn peers_of_type(&self, peer_type: PeerType) -> Vec<PeerIdentity> {
        self.inner.registry.peers_of_type(peer_type)
    }

    pub fn connections_of_type(&self, peer_type: PeerType) -> Vec<Arc<Connection>> {
        self.inner
            .registry
            .all_of_type(peer_type)
            .unwrap_or_default()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once shutdown has begun
    pub async fn shutdown_requested(&self) {
        self.inner.shutdown.cancelled().await
    }

    /// Stop accepting and reconnecting, and close every connection.
    ///
    /// Connect attempts made afterwards fail immediately.
    pub fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        info!(
            instance_id = self.inner.instance_id,
            connections = self.inner.registry.len(),
            "Shutting down connection manager"
        );
        self.inner.shutdown.cancel();
        for connection in self.inner.registry.all() {
            connection.close();
        }
    }
}

impl ManagerInner {
    fn required_password(&self) -> Option<&str> {
        self.settings.password.as_deref().filter(|p| !p.is_empty())
    }

    fn welcome_message(&self) -> MultiplexerMessage {
        let welcome = WelcomeMessage::new(
            self.peer_type,
            self.instance_id,
            self.settings.password.as_deref(),
        );
        MessageBuilder::meta(MetaType::ConnectionWelcome)
            .from(self.instance_id)
            .encoded_payload(&welcome)
            .build()
    }

    async fn establish(self: &Arc<Self>, addr: SocketAddr) -> Result<Arc<Connection>> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Shutdown);
        }

        let timeout = self.settings.connect_timeout();
        let deadline = Instant::now() + timeout;
        let timeout_ms = self.settings.connect_timeout_ms;

        let stream = match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::connect(addr, e)),
            Err(_) => {
                return Err(TransportError::timeout(format!("connect to {addr}"), timeout_ms))
            }
        };

        if self.shutdown.is_cancelled() {
            return Err(TransportError::Shutdown);
        }

        let (registration, registered) = oneshot::channel();
        let connection = self.attach(stream, addr, Some(addr), Some(registration));
        connection.mark_welcome_sent();
        connection.write(self.welcome_message());

        match tokio::time::timeout_at(deadline, registered).await {
            Ok(Ok(Ok(identity))) => {
                info!(
                    connection = connection.id(),
                    %addr,
                    peer_id = identity.peer_id,
                    peer_type = identity.peer_type,
                    "Connected"
                );
                Ok(connection)
            }
            Ok(Ok(Err(e))) => {
                connection.close();
                Err(e)
            }
            Ok(Err(_)) => {
                connection.close();
                Err(TransportError::handshake_closed(addr))
            }
            Err(_) => {
                connection.close();
                Err(TransportError::timeout(
                    format!("welcome handshake with {addr}"),
                    timeout_ms,
                ))
            }
        }
    }

    /// Wrap a socket in a connection and start its reader and writer tasks
    fn attach(
        self: &Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        dial_addr: Option<SocketAddr>,
        registration: Option<Registration>,
    ) -> Arc<Connection> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (connection, queue) = Connection::new(
            id,
            remote_addr,
            dial_addr,
            self.settings.idle,
            Arc::clone(&self.pending),
        );
        if let Some(registration) = registration {
            connection.install_registration(registration);
        }

        self.registry.add_provisional(Arc::clone(&connection));
        self.observer.on_opened(&connection);

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(run_writer(
            Arc::clone(&connection),
            FramedWrite::new(write_half, MessageCodec::new()),
            queue,
            self.instance_id,
            Arc::clone(&self.observer),
        ));
        tokio::spawn(Arc::clone(self).run_reader(
            Arc::clone(&connection),
            FramedRead::new(read_half, MessageCodec::new()),
        ));

        // Shutdown may have started while this socket was being set up.
        if self.shutdown.is_cancelled() {
            connection.close();
        }

        connection
    }

    async fn run_reader<R>(
        self: Arc<Self>,
        connection: Arc<Connection>,
        mut frames: FramedRead<R, MessageCodec>,
    ) where
        R: AsyncRead + Unpin,
    {
        let closed = connection.close_token();

        loop {
            let read_idle = connection.idle().read_idle();

            tokio::select! {
                _ = closed.cancelled() => break,
                next = tokio::time::timeout(read_idle, frames.next()) => match next {
                    Ok(Some(Ok(message))) => {
                        self.observer.on_received(&connection, &message, wire_size(&message));
                        self.handle_inbound(&connection, message);
                    }
                    Ok(Some(Err(e))) => {
                        if e.is_corruption() {
                            error!(connection = connection.id(), error = %e, "Corrupt stream, closing");
                        } else {
                            warn!(connection = connection.id(), error = %e, "Read failed, closing");
                        }
                        break;
                    }
                    Ok(None) => {
                        debug!(connection = connection.id(), "Peer closed connection");
                        break;
                    }
                    Err(_) => {
                        info!(
                            connection = connection.id(),
                            peer_id = ?connection.peer_id(),
                            idle_ms = read_idle.as_millis() as u64,
                            "Read idle, closing connection"
                        );
                        break;
                    }
                },
            }
        }

        connection.close();
        self.on_closed(&connection);
    }

    fn handle_inbound(self: &Arc<Self>, connection: &Arc<Connection>, message: MultiplexerMessage) {
        match message.meta_type() {
            Some(MetaType::ConnectionWelcome) => return self.handle_welcome(connection, &message),
            Some(MetaType::Heartbit) => {
                trace!(connection = connection.id(), "Heartbeat");
                return;
            }
            _ => {}
        }

        if connection.identity().is_none() {
            warn!(
                connection = connection.id(),
                message_type = message.message_type,
                "Message before welcome, dropping"
            );
            return;
        }

        if !self.recent.lock().add(message.id) {
            debug!(
                connection = connection.id(),
                id = message.id,
                "Duplicate message dropped"
            );
            return;
        }

        match &self.listener {
            Some(listener) => {
                let manager = ConnectionManager {
                    inner: Arc::clone(self),
                };
                listener.on_message(
                    &manager,
                    Incoming {
                        message,
                        connection: Arc::clone(connection),
                    },
                );
            }
            None => debug!(
                id = message.id,
                message_type = message.message_type,
                "Unhandled message, no listener installed"
            ),
        }
    }

    fn handle_welcome(self: &Arc<Self>, connection: &Arc<Connection>, message: &MultiplexerMessage) {
        if let Some(identity) = connection.identity() {
            warn!(
                connection = connection.id(),
                peer_id = identity.peer_id,
                from = message.from,
                "Repeated welcome ignored"
            );
            return;
        }

        let welcome = match message.welcome() {
            Ok(welcome) => welcome,
            Err(e) => {
                warn!(connection = connection.id(), error = %e, "Malformed welcome, closing");
                connection.complete_registration(Err(TransportError::handshake(
                    connection.remote_addr(),
                    e.to_string(),
                )));
                connection.close();
                return;
            }
        };

        if let Some(required) = self.required_password() {
            if !welcome.password_matches(required) {
                warn!(
                    connection = connection.id(),
                    remote = %connection.remote_addr(),
                    peer_id = welcome.id,
                    "Welcome password mismatch, closing"
                );
                connection.complete_registration(Err(TransportError::password_mismatch(
                    connection.remote_addr(),
                )));
                connection.close();
                return;
            }
        }

        let identity = PeerIdentity {
            peer_id: welcome.id,
            peer_type: welcome.peer_type,
        };
        connection.set_idle(self.settings.idle_for(identity.peer_type));

        if let Some(previous) = self
            .registry
            .bind(connection, identity.peer_id, identity.peer_type)
        {
            info!(
                peer_id = identity.peer_id,
                previous = previous.id(),
                current = connection.id(),
                "Peer re-registered, closing previous connection"
            );
            previous.close();
        }

        info!(
            connection = connection.id(),
            peer_id = identity.peer_id,
            peer_type = identity.peer_type,
            "Peer registered"
        );

        if connection.is_outbound() {
            connection.complete_registration(Ok(identity));
        } else if connection.mark_welcome_sent() {
            connection.write(self.welcome_message());
        }
    }

    fn on_closed(self: &Arc<Self>, connection: &Arc<Connection>) {
        self.registry.remove(connection);
        connection.complete_registration(Err(TransportError::handshake_closed(
            connection.remote_addr(),
        )));
        self.observer.on_closed(connection);

        info!(
            connection = connection.id(),
            remote = %connection.remote_addr(),
            peer_id = ?connection.peer_id(),
            "Connection closed"
        );

        if self.shutdown.is_cancelled() {
            return;
        }
        let (Some(addr), Some(identity)) = (connection.dial_addr(), connection.identity()) else {
            return;
        };
        if self.registry.by_peer_id(identity.peer_id).is_ok() {
            debug!(
                peer_id = identity.peer_id,
                "Peer still reachable over a newer connection, not reconnecting"
            );
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect(addr).await });
    }

    async fn reconnect(self: Arc<Self>, addr: SocketAddr) {
        let delay = self.settings.reconnect_delay();
        let mut rejections = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.establish(addr).await {
                Ok(connection) => {
                    info!(connection = connection.id(), %addr, "Reconnected");
                    return;
                }
                Err(e @ TransportError::HandshakeClosed { .. }) => {
                    rejections += 1;
                    if rejections >= MAX_HANDSHAKE_REJECTIONS {
                        error!(%addr, error = %e, rejections, "Peer keeps refusing our welcome, giving up reconnecting");
                        return;
                    }
                    warn!(%addr, error = %e, rejections, "Reconnect refused during handshake");
                }
                Err(e) if e.is_retryable() => {
                    rejections = 0;
                    warn!(%addr, error = %e, retry_in_ms = delay.as_millis() as u64, "Reconnect failed");
                }
                Err(e) => {
                    error!(%addr, error = %e, "Giving up reconnecting");
                    return;
                }
            }
        }
    }
}
