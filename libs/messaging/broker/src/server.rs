//! Broker server
//!
//! A [`ConnectionManager`] of peer type `MULTIPLEXER` whose listener is the
//! [`BrokerRouter`], plus an optional periodic traffic report.

use crate::router::BrokerRouter;
use crate::stats::{TrafficCounters, TrafficSnapshot};
use anyhow::{Context, Result};
use config::MultiplexerConfig;
use network::{ConnectionManager, TrafficObserver};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use types::{peers, PeerId};

pub struct Broker {
    manager: ConnectionManager,
    counters: Arc<TrafficCounters>,
    config: MultiplexerConfig,
}

impl Broker {
    pub fn new(config: MultiplexerConfig) -> Self {
        let counters = Arc::new(TrafficCounters::new());
        let router = BrokerRouter::new(
            config.routing.clone(),
            config.server.emit_delivery_errors,
        );
        let manager = ConnectionManager::builder(config.connection.clone(), peers::MULTIPLEXER)
            .listener(router)
            .observer(Arc::clone(&counters) as Arc<dyn TrafficObserver>)
            .build();

        info!(
            instance_id = manager.instance_id(),
            rules = config.routing.rules.len(),
            emit_delivery_errors = config.server.emit_delivery_errors,
            "Broker created"
        );

        Self {
            manager,
            counters,
            config,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn instance_id(&self) -> PeerId {
        self.manager.instance_id()
    }

    pub fn config(&self) -> &MultiplexerConfig {
        &self.config
    }

    pub fn stats(&self) -> TrafficSnapshot {
        self.counters.snapshot()
    }

    /// Bind the configured `host:port`
    pub async fn listen(&self) -> Result<TcpListener> {
        let address = self.config.server.bind_address();
        TcpListener::bind(&address)
            .await
            .with_context(|| format!("binding broker to {address}"))
    }

    /// Accept and route until [`Broker::shutdown`]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if let Some(every) = self.config.server.stats_interval() {
            tokio::spawn(report_stats(
                self.manager.clone(),
                Arc::clone(&self.counters),
                every,
            ));
        }
        self.manager.serve(listener).await?;
        Ok(())
    }

    /// Bind `addr` and serve in a background task; returns the bound address
    pub async fn spawn(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding broker to {addr}"))?;
        let local = listener.local_addr()?;
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = broker.serve(listener).await {
                error!(error = %e, "Broker stopped");
            }
        });
        Ok(local)
    }

    pub fn shutdown(&self) {
        info!(stats = %self.counters.snapshot(), "Broker shutting down");
        self.manager.shutdown();
    }
}

async fn report_stats(manager: ConnectionManager, counters: Arc<TrafficCounters>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = manager.shutdown_requested() => return,
            _ = ticker.tick() => {
                info!(connections = manager.connection_count(), "{}", counters.snapshot());
            }
        }
    }
}
