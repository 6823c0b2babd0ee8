//! Core E2E testing framework
//!
//! [`TestCluster`] runs a real broker on an ephemeral loopback port and hands
//! out connected clients and backends. [`RawPeer`] speaks the wire protocol
//! directly for scenarios a well-behaved client never produces.

use anyhow::{bail, Context, Result};
use broker::Broker;
use client::{Backend, MessageHandler, MultiplexerClient};
use codec::MessageCodec;
use config::{MultiplexerConfig, RoutingTable};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::info;
use types::{
    peers, Fanout, MessageBuilder, MessageType, MetaType, MultiplexerMessage, PeerId, PeerType,
    WelcomeMessage,
};

pub const QUERY_TYPE: MessageType = 1000;
pub const QUERY_RESPONSE_TYPE: MessageType = 1001;
pub const EVENT_TYPE: MessageType = 2000;
pub const UNROUTED_TYPE: MessageType = 5000;

pub const BACKEND: PeerType = 300;
pub const FRONTEND: PeerType = 400;
pub const AUDIT: PeerType = 500;

static LOGGING: Once = Once::new();

/// Route test output through `RUST_LOG`, once per test binary
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fast timeouts and the standard test routing table
pub fn test_config() -> MultiplexerConfig {
    let mut config = MultiplexerConfig::default();
    config.connection.connect_timeout_ms = 2_000;
    config.connection.reconnect_delay_ms = 200;
    config.query.cleanup_grace_ms = 200;
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config.routing = RoutingTable::new()
        .with_rule(QUERY_TYPE, vec![BACKEND], Fanout::One)
        .with_rule(EVENT_TYPE, vec![FRONTEND], Fanout::One)
        .with_peer("backend", BACKEND)
        .with_peer("frontend", FRONTEND)
        .with_peer("audit", AUDIT);
    config
}

/// A broker plus every peer a test connected to it
pub struct TestCluster {
    config: MultiplexerConfig,
    broker: Arc<Broker>,
    addr: SocketAddr,
    clients: Mutex<Vec<Arc<MultiplexerClient>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TestCluster {
    pub async fn start() -> Result<Self> {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: MultiplexerConfig) -> Result<Self> {
        init_test_logging();

        let broker = Arc::new(Broker::new(config.clone()));
        let addr = broker
            .spawn("127.0.0.1:0".parse()?)
            .await
            .context("starting broker")?;
        info!(%addr, "Test broker listening");

        Ok(Self {
            config,
            broker,
            addr,
            clients: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    /// Connect a client using the cluster's own settings
    pub async fn client(&self, peer_type: PeerType) -> Result<Arc<MultiplexerClient>> {
        self.client_with(&self.config, peer_type).await
    }

    /// Connect a client with its own settings, e.g. a different password
    pub async fn client_with(
        &self,
        config: &MultiplexerConfig,
        peer_type: PeerType,
    ) -> Result<Arc<MultiplexerClient>> {
        let client = Arc::new(MultiplexerClient::new(config, peer_type));
        self.clients.lock().await.push(Arc::clone(&client));
        client
            .connect(self.addr)
            .await
            .with_context(|| format!("connecting peer type {peer_type}"))?;
        Ok(client)
    }

    /// Connect a client and serve `handler` on it in the background
    pub async fn backend<H>(&self, peer_type: PeerType, handler: H) -> Result<Arc<MultiplexerClient>>
    where
        H: MessageHandler + 'static,
    {
        let client = self.client(peer_type).await?;
        let backend = Backend::new(Arc::clone(&client), handler);
        let task = tokio::spawn(async move { backend.run().await });
        self.tasks.lock().await.push(task);
        Ok(client)
    }

    /// Wait until the broker has bound `count` peers of `peer_type`
    pub async fn wait_for_peers(&self, peer_type: PeerType, count: usize) -> Result<()> {
        let manager = self.broker.manager();
        let reached = eventually(Duration::from_secs(5), || {
            manager.peers_of_type(peer_type).len() == count
        })
        .await;
        if !reached {
            bail!(
                "broker has {} peers of type {peer_type}, wanted {count}",
                manager.peers_of_type(peer_type).len()
            );
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        for client in self.clients.lock().await.drain(..) {
            client.shutdown();
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.broker.shutdown();
    }
}

/// Poll `check` every 20ms until it holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A hand-driven peer on a bare socket
pub struct RawPeer {
    id: PeerId,
    frames: Framed<TcpStream, MessageCodec>,
}

impl RawPeer {
    /// Connect and send a welcome, without waiting for the broker's reply
    pub async fn connect(
        addr: SocketAddr,
        peer_type: PeerType,
        id: PeerId,
        password: Option<&str>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let mut peer = Self {
            id,
            frames: Framed::new(stream, MessageCodec::new()),
        };
        let welcome = MessageBuilder::meta(MetaType::ConnectionWelcome)
            .from(id)
            .encoded_payload(&WelcomeMessage::new(peer_type, id, password))
            .build();
        peer.send(welcome).await?;
        Ok(peer)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub async fn send(&mut self, message: MultiplexerMessage) -> Result<()> {
        self.frames.send(message).await?;
        Ok(())
    }

    /// Next non-heartbeat message, `None` on close or timeout
    pub async fn next(&mut self, timeout: Duration) -> Option<MultiplexerMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.frames.next()).await {
                Ok(Some(Ok(message))) if message.is_type(MetaType::Heartbit) => continue,
                Ok(Some(Ok(message))) => return Some(message),
                _ => return None,
            }
        }
    }

    /// Wait for the broker's welcome and check it came from a broker
    pub async fn expect_welcome(&mut self, timeout: Duration) -> Result<WelcomeMessage> {
        let Some(message) = self.next(timeout).await else {
            bail!("no welcome from broker");
        };
        let welcome = message.welcome()?;
        if welcome.peer_type != peers::MULTIPLEXER {
            bail!("welcome from peer type {}", welcome.peer_type);
        }
        Ok(welcome)
    }

    /// True if the broker closes the socket within `timeout`
    pub async fn closed_within(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.frames.next()).await {
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(_))) | Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }
}
