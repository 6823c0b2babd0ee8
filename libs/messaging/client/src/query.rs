//! Three-phase failover query
//!
//! 1. **Direct**: send the request round-robin to a broker and wait.
//! 2. **Discovery**: broadcast `BACKEND_FOR_PACKET_SEARCH` to every broker
//!    and wait for a backend to announce itself (or for all searches to fail).
//! 3. **Retry**: send a fresh copy of the request addressed to the announced
//!    backend, over the connection its announcement arrived on.
//!
//! Each phase gets the full timeout, measured from the start of that phase.
//! Replies for any id the query sent may arrive in any later phase and are
//! judged by which id they reference.

use crate::correlation::{CorrelationTable, QueryRegistration};
use crate::error::QueryError;
use bytes::Bytes;
use network::{Connection, ConnectionManager, Incoming, SendPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};
use types::{
    peers, BackendForPacketSearch, MessageId, MessageType, MetaType, MultiplexerMessage, PeerId,
};

pub type QueryResult = Result<MultiplexerMessage, QueryError>;

/// State of one `query` call
pub(crate) struct Query<'a> {
    manager: &'a ConnectionManager,
    registration: QueryRegistration,
    responses: mpsc::UnboundedReceiver<Incoming>,
    message_type: MessageType,
    payload: Bytes,
    timeout: Duration,
    /// Most recent BACKEND_ERROR seen, preferred over `BackendUnreachable`
    backend_error: Option<MultiplexerMessage>,
    direct_failed: bool,
}

enum Discovery {
    Answered(MultiplexerMessage),
    Candidate(PeerId, Arc<Connection>),
}

impl<'a> Query<'a> {
    pub(crate) fn new(
        manager: &'a ConnectionManager,
        table: &Arc<CorrelationTable>,
        grace: Duration,
        message_type: MessageType,
        payload: Bytes,
        timeout: Duration,
    ) -> Self {
        let (registration, responses) = QueryRegistration::new(table, grace);
        Self {
            manager,
            registration,
            responses,
            message_type,
            payload,
            timeout,
            backend_error: None,
            direct_failed: false,
        }
    }

    pub(crate) async fn run(mut self) -> QueryResult {
        let request = self
            .manager
            .create_message(self.message_type)
            .payload(self.payload.clone())
            .build();
        let request_id = request.id;

        if let Some(answer) = self.direct(request).await? {
            return Ok(answer);
        }

        match self.discover(request_id).await? {
            Discovery::Answered(answer) => Ok(answer),
            Discovery::Candidate(backend, connection) => {
                self.retry(request_id, backend, connection).await
            }
        }
    }

    /// Phase 1
    async fn direct(
        &mut self,
        request: MultiplexerMessage,
    ) -> Result<Option<MultiplexerMessage>, QueryError> {
        let request_id = request.id;
        self.registration.register(request_id);
        self.manager
            .send(request, SendPolicy::OneOfType(peers::MULTIPLEXER))?;

        let deadline = Instant::now() + self.timeout;
        while let Some(reply) = self.next_reply(deadline).await {
            if !reply.references_id(request_id) {
                continue;
            }
            if reply.is_error() {
                debug!(id = request_id, error_type = reply.message_type, "Direct request failed");
                self.capture(reply);
                self.direct_failed = true;
                return Ok(None);
            }
            return Ok(Some(reply));
        }

        debug!(id = request_id, "No direct answer, searching for a backend");
        Ok(None)
    }

    /// Phase 2
    async fn discover(&mut self, request_id: MessageId) -> Result<Discovery, QueryError> {
        let probe = self
            .manager
            .create_message(MetaType::BackendForPacketSearch.code())
            .encoded_payload(&BackendForPacketSearch {
                packet_type: self.message_type,
            })
            .build();
        let probe_id = probe.id;
        self.registration.register(probe_id);

        let sent = self
            .manager
            .send(probe, SendPolicy::AllOfType(peers::MULTIPLEXER))?;

        self.await_discovery(request_id, probe_id, sent.len()).await
    }

    /// Judge phase 2 replies until a backend announces or every search fails
    async fn await_discovery(
        &mut self,
        request_id: MessageId,
        probe_id: MessageId,
        mut active_searches: usize,
    ) -> Result<Discovery, QueryError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let Some(incoming) = self.next_incoming(deadline).await else {
                return Err(QueryError::timeout("phase 2"));
            };
            let reply = &incoming.message;

            if reply.references_id(request_id) {
                if !reply.is_error() {
                    return Ok(Discovery::Answered(incoming.message));
                }
                self.capture(incoming.message);
                self.direct_failed = true;
            } else if reply.references_id(probe_id) {
                if !reply.is_error() {
                    debug!(backend = reply.from, "Backend announced itself");
                    return Ok(Discovery::Candidate(reply.from, incoming.connection));
                }
                self.capture(incoming.message);
                active_searches = active_searches.saturating_sub(1);
                if active_searches == 0 {
                    return match self.backend_error.take() {
                        Some(captured) => Ok(Discovery::Answered(captured)),
                        None => Err(self.give_up()),
                    };
                }
            }
        }
    }

    /// Phase 3
    async fn retry(
        &mut self,
        request_id: MessageId,
        backend: PeerId,
        connection: Arc<Connection>,
    ) -> QueryResult {
        let retry = self
            .manager
            .create_message(self.message_type)
            .to(backend)
            .payload(self.payload.clone())
            .build();
        let retry_id = retry.id;
        self.registration.register(retry_id);
        self.manager
            .send(retry, SendPolicy::ViaConnection(connection))?;

        self.await_retry(request_id, retry_id).await
    }

    /// Judge phase 3 replies to the original request and its retry
    async fn await_retry(&mut self, request_id: MessageId, retry_id: MessageId) -> QueryResult {
        let mut retry_failed = false;
        let deadline = Instant::now() + self.timeout;
        loop {
            let Some(reply) = self.next_reply(deadline).await else {
                return Err(QueryError::timeout("phase 3"));
            };

            let to_request = reply.references_id(request_id);
            let to_retry = reply.references_id(retry_id);
            if !to_request && !to_retry {
                trace!(references = ?reply.references, "Ignoring stale discovery reply");
                continue;
            }
            if !reply.is_error() {
                return Ok(reply);
            }

            self.capture(reply);
            if to_request {
                if retry_failed {
                    return self.prefer_backend_error(self.give_up());
                }
                self.direct_failed = true;
            } else {
                if self.direct_failed {
                    return self.prefer_backend_error(self.give_up());
                }
                retry_failed = true;
            }
        }
    }

    fn capture(&mut self, reply: MultiplexerMessage) {
        if reply.is_type(MetaType::BackendError) {
            self.backend_error = Some(reply);
        }
    }

    fn give_up(&self) -> QueryError {
        QueryError::unreachable(self.message_type)
    }

    fn prefer_backend_error(&mut self, error: QueryError) -> QueryResult {
        match self.backend_error.take() {
            Some(captured) => Ok(captured),
            None => Err(error),
        }
    }

    /// Next reply on the private queue, or `None` once `deadline` passes
    async fn next_incoming(&mut self, deadline: Instant) -> Option<Incoming> {
        tokio::time::timeout_at(deadline, self.responses.recv())
            .await
            .ok()
            .flatten()
    }

    async fn next_reply(&mut self, deadline: Instant) -> Option<MultiplexerMessage> {
        self.next_incoming(deadline).await.map(|i| i.message)
    }
}
