//! Backend handlers used by the scenarios

use crate::framework::{QUERY_RESPONSE_TYPE, QUERY_TYPE};
use async_trait::async_trait;
use bytes::Bytes;
use client::{MessageContext, MessageHandler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use types::MessageType;

/// Answers `QUERY_TYPE` with its own payload and counts requests
#[derive(Debug, Clone, Default)]
pub struct EchoHandler {
    served: Arc<AtomicUsize>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter, readable after the handler moved into its backend
    pub fn served(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.served)
    }
}

#[async_trait]
impl MessageHandler for EchoHandler {
    fn handled_types(&self) -> Vec<MessageType> {
        vec![QUERY_TYPE]
    }

    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()> {
        self.served.fetch_add(1, Ordering::SeqCst);
        let payload = Bytes::copy_from_slice(ctx.message().payload());
        ctx.respond(QUERY_RESPONSE_TYPE, payload)?;
        Ok(())
    }
}

/// Fails every request with `reason`
#[derive(Debug, Clone)]
pub struct FailingHandler {
    reason: &'static str,
}

impl FailingHandler {
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

#[async_trait]
impl MessageHandler for FailingHandler {
    fn handled_types(&self) -> Vec<MessageType> {
        vec![QUERY_TYPE]
    }

    async fn handle(&self, _ctx: &mut MessageContext) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.reason)
    }
}

/// Accepts requests and never answers them
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentHandler;

#[async_trait]
impl MessageHandler for SilentHandler {
    fn handled_types(&self) -> Vec<MessageType> {
        vec![QUERY_TYPE]
    }

    async fn handle(&self, ctx: &mut MessageContext) -> anyhow::Result<()> {
        ctx.set_response_required(false);
        Ok(())
    }
}
