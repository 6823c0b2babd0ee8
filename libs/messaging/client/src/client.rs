//! Multiplexer client
//!
//! A [`ConnectionManager`] whose listener splits inbound traffic in two:
//! replies claimed by the correlation table go to the waiting query, and
//! everything else is queued for [`MultiplexerClient::receive`].

use crate::correlation::CorrelationTable;
use crate::query::{Query, QueryResult};
use bytes::Bytes;
use config::{MultiplexerConfig, QuerySettings};
use network::{
    Connection, ConnectionManager, Incoming, MessageListener, RoutingError, SendGroup, SendPolicy,
    TrafficObserver, TransportError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use types::{peers, MessageType, MultiplexerMessage, PeerId, PeerType};

struct ClientListener {
    table: Arc<CorrelationTable>,
    inbox: mpsc::UnboundedSender<Incoming>,
}

impl MessageListener for ClientListener {
    fn on_message(&self, _manager: &ConnectionManager, incoming: Incoming) {
        if let Err(unclaimed) = self.table.route(incoming) {
            if self.inbox.send(unclaimed).is_err() {
                debug!("Client inbox closed, dropping message");
            }
        }
    }
}

pub struct MultiplexerClient {
    manager: ConnectionManager,
    table: Arc<CorrelationTable>,
    inbox: Mutex<mpsc::UnboundedReceiver<Incoming>>,
    query: QuerySettings,
}

impl MultiplexerClient {
    /// Create a client announcing itself as `peer_type`
    pub fn new(config: &MultiplexerConfig, peer_type: PeerType) -> Self {
        Self::build(config, peer_type, None)
    }

    pub fn with_observer(
        config: &MultiplexerConfig,
        peer_type: PeerType,
        observer: Arc<dyn TrafficObserver>,
    ) -> Self {
        Self::build(config, peer_type, Some(observer))
    }

    fn build(
        config: &MultiplexerConfig,
        peer_type: PeerType,
        observer: Option<Arc<dyn TrafficObserver>>,
    ) -> Self {
        let table = CorrelationTable::new();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let mut builder = ConnectionManager::builder(config.connection.clone(), peer_type).listener(
            ClientListener {
                table: Arc::clone(&table),
                inbox: inbox_tx,
            },
        );
        if let Some(observer) = observer {
            builder = builder.observer(observer);
        }

        Self {
            manager: builder.build(),
            table,
            inbox: Mutex::new(inbox),
            query: config.query.clone(),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn instance_id(&self) -> PeerId {
        self.manager.instance_id()
    }

    /// Connect to a broker
    pub async fn connect(&self, addr: SocketAddr) -> Result<Arc<Connection>, TransportError> {
        self.manager.connect(addr).await
    }

    /// Fire-and-forget: one broker routes it, nobody answers
    pub fn send_event(
        &self,
        payload: impl Into<Bytes>,
        message_type: MessageType,
    ) -> Result<SendGroup, RoutingError> {
        let event = self.manager.create_message(message_type).payload(payload).build();
        self.manager
            .send(event, SendPolicy::OneOfType(peers::MULTIPLEXER))
    }

    pub fn send(
        &self,
        message: MultiplexerMessage,
        policy: SendPolicy,
    ) -> Result<SendGroup, RoutingError> {
        self.manager.send(message, policy)
    }

    /// Request/response with backend discovery failover.
    ///
    /// Every phase waits up to `timeout`, so a query that reaches phase 3
    /// can take up to three times as long.
    pub async fn query(
        &self,
        payload: impl Into<Bytes>,
        message_type: MessageType,
        timeout: Duration,
    ) -> QueryResult {
        Query::new(
            &self.manager,
            &self.table,
            self.query.cleanup_grace(),
            message_type,
            payload.into(),
            timeout,
        )
        .run()
        .await
    }

    /// Next inbound message no query claimed, waiting up to `timeout`
    pub async fn receive(&self, timeout: Duration) -> Option<Incoming> {
        let mut inbox = self.inbox.lock().await;
        tokio::time::timeout(timeout, inbox.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn flush_all(&self, timeout: Duration) -> bool {
        self.manager.flush_all(timeout).await
    }

    pub fn is_shutdown(&self) -> bool {
        self.manager.is_shutdown()
    }

    pub fn shutdown(&self) {
        info!(instance_id = self.instance_id(), "Client shutting down");
        self.manager.shutdown();
        self.table.close();
    }
}
