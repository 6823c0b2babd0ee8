//! Backend run loop
//!
//! A backend is a client that serves requests. [`Backend::run`] pulls
//! uncorrelated messages from the client and handles the protocol chores
//! itself: answering `PING`, announcing itself to discovery probes for the
//! types it serves, and guaranteeing every request gets an answer.

use crate::client::MultiplexerClient;
use async_trait::async_trait;
use bytes::Bytes;
use network::{Connection, ConnectionManager, Incoming, RoutingError, SendGroup, SendPolicy};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use types::{MessageBuilder, MessageType, MetaType, MultiplexerMessage};

/// How long `run` waits on the inbox before re-checking for shutdown
const RECEIVE_POLL: Duration = Duration::from_millis(250);

/// One request being handled, and whether it has been answered
pub struct MessageContext {
    manager: ConnectionManager,
    incoming: Incoming,
    response_required: bool,
    response_sent: bool,
}

impl MessageContext {
    pub fn new(manager: ConnectionManager, incoming: Incoming) -> Self {
        Self {
            manager,
            incoming,
            response_required: true,
            response_sent: false,
        }
    }

    pub fn message(&self) -> &MultiplexerMessage {
        &self.incoming.message
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.incoming.connection
    }

    /// Start a response addressed to the requester
    pub fn create_response(&self, message_type: MessageType) -> MessageBuilder {
        self.manager
            .create_response(&self.incoming.message, message_type)
    }

    /// Send `response` back over the connection the request arrived on
    pub fn reply(&mut self, response: MultiplexerMessage) -> Result<SendGroup, RoutingError> {
        let sent = self.manager.send(
            response,
            SendPolicy::ViaConnection(Arc::clone(&self.incoming.connection)),
        )?;
        self.response_sent = true;
        Ok(sent)
    }

    /// Reply with `payload` as a message of `message_type`
    pub fn respond(
        &mut self,
        message_type: MessageType,
        payload: impl Into<Bytes>,
    ) -> Result<SendGroup, RoutingError> {
        let response = self.create_response(message_type).payload(payload).build();
        self.reply(response)
    }

    /// Answer with `BACKEND_ERROR` carrying `cause` as text
    pub fn report_error(&mut self, cause: impl Display) -> Result<SendGroup, RoutingError> {
        let description = cause.to_string();
        self.respond(MetaType::BackendError.code(), description.into_bytes())
    }

    pub fn set_response_required(&mut self, required: bool) {
        self.response_required = required;
    }

    pub fn response_required(&self) -> bool {
        self.response_required
    }

    pub fn has_sent_response(&self) -> bool {
        self.response_sent
    }
}

/// Application logic of a backend
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Application message types this backend answers discovery probes for
    fn handled_types(&self) -> Vec<MessageType>;

    /// Handle one request.
    ///
    /// An error is sent to the requester as `BACKEND_ERROR` unless a response
    /// already went out, and is then logged by the run loop.
    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()>;
}

pub struct Backend<H> {
    client: Arc<MultiplexerClient>,
    handler: H,
}

impl<H: MessageHandler> Backend<H> {
    pub fn new(client: Arc<MultiplexerClient>, handler: H) -> Self {
        Self { client, handler }
    }

    pub fn client(&self) -> &Arc<MultiplexerClient> {
        &self.client
    }

    /// Serve until the client shuts down
    pub async fn run(&self) {
        while !self.client.is_shutdown() {
            let Some(incoming) = self.client.receive(RECEIVE_POLL).await else {
                continue;
            };
            let id = incoming.message.id;
            let message_type = incoming.message.message_type;
            if let Err(e) = self.dispatch(incoming).await {
                error!(id, message_type, error = ?e, "Handler failed");
            }
        }
        debug!("Backend run loop stopped");
    }

    /// Process one inbound message
    pub async fn dispatch(&self, incoming: Incoming) -> anyhow::Result<()> {
        if let Some(references) = incoming.message.references {
            debug!(
                id = incoming.message.id,
                references,
                message_type = incoming.message.message_type,
                "Unclaimed reply, not handling as a request"
            );
            return Ok(());
        }

        let manager = self.client.manager().clone();

        match incoming.message.meta_type() {
            None => {}
            Some(MetaType::Ping) => {
                let pong = manager
                    .create_response(&incoming.message, MetaType::Ping.code())
                    .build();
                manager.send(pong, SendPolicy::ViaConnection(incoming.connection))?;
                return Ok(());
            }
            Some(MetaType::BackendForPacketSearch) => {
                self.announce(&manager, incoming)?;
                return Ok(());
            }
            Some(other) => {
                debug!(meta = ?other, id = incoming.message.id, "Ignoring meta message");
                return Ok(());
            }
        }

        let mut ctx = MessageContext::new(manager, incoming);
        match self.handler.handle(&mut ctx).await {
            Ok(()) => {
                if ctx.response_required() && !ctx.has_sent_response() {
                    warn!(
                        id = ctx.message().id,
                        message_type = ctx.message().message_type,
                        "Handler sent no response"
                    );
                    ctx.report_error("no response produced by backend")?;
                }
                Ok(())
            }
            Err(e) => {
                if !ctx.has_sent_response() {
                    if let Err(send_error) = ctx.report_error(format!("{e:#}")) {
                        warn!(error = %send_error, "Could not report handler failure");
                    }
                }
                Err(e)
            }
        }
    }

    fn announce(&self, manager: &ConnectionManager, probe: Incoming) -> anyhow::Result<()> {
        let search = probe.message.packet_search()?;
        if !self.handler.handled_types().contains(&search.packet_type) {
            debug!(packet_type = search.packet_type, "Not serving probed type");
            return Ok(());
        }

        let announcement = manager
            .create_response(&probe.message, MetaType::BackendForPacketSearch.code())
            .encoded_payload(&search)
            .build();
        manager.send(announcement, SendPolicy::ViaConnection(probe.connection))?;
        debug!(packet_type = search.packet_type, "Announced to discovery probe");
        Ok(())
    }
}
