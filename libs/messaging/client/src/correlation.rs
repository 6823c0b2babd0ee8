//! Query correlation table
//!
//! Maps the ids a query has sent to that query's private response queue.
//! Entries outlive their query by a grace period so late replies are
//! swallowed by the orphaned queue instead of reaching unrelated receivers.

use network::Incoming;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use types::MessageId;

pub type ResponseQueue = mpsc::UnboundedSender<Incoming>;

#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<MessageId, ResponseQueue>>,
    shutdown: CancellationToken,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, id: MessageId, queue: ResponseQueue) {
        self.entries.lock().insert(id, queue);
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `incoming` to the queue waiting on its `references` id.
    ///
    /// Returns the message back when no query claims it. A claimed message
    /// whose query already finished is dropped.
    pub fn route(&self, incoming: Incoming) -> Result<(), Incoming> {
        let Some(references) = incoming.message.references else {
            return Err(incoming);
        };

        let queue = self.entries.lock().get(&references).cloned();
        match queue {
            Some(queue) => {
                if queue.send(incoming).is_err() {
                    trace!(references, "Late reply for finished query dropped");
                }
                Ok(())
            }
            None => Err(incoming),
        }
    }

    pub fn remove_all(&self, ids: &[MessageId]) {
        let mut entries = self.entries.lock();
        for id in ids {
            entries.remove(id);
        }
    }

    /// Remove `ids` once `grace` has elapsed, without blocking the caller
    pub fn release_after(self: &Arc<Self>, ids: Vec<MessageId>, grace: Duration) {
        if ids.is_empty() {
            return;
        }
        let runtime = tokio::runtime::Handle::try_current();
        match runtime {
            Ok(handle) if !grace.is_zero() && !self.shutdown.is_cancelled() => {
                let table = Arc::clone(self);
                handle.spawn(async move {
                    tokio::select! {
                        _ = table.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(grace) => {}
                    }
                    table.remove_all(&ids);
                });
            }
            _ => self.remove_all(&ids),
        }
    }

    /// Drop every entry and cut pending grace periods short
    pub fn close(&self) {
        self.shutdown.cancel();
        self.entries.lock().clear();
    }
}

/// The ids one query registered; released with a grace period on drop.
///
/// Dropping also covers a query future that is cancelled mid-flight.
pub(crate) struct QueryRegistration {
    table: Arc<CorrelationTable>,
    queue: ResponseQueue,
    ids: Vec<MessageId>,
    grace: Duration,
}

impl QueryRegistration {
    pub(crate) fn new(
        table: &Arc<CorrelationTable>,
        grace: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Incoming>) {
        let (queue, responses) = mpsc::unbounded_channel();
        let registration = Self {
            table: Arc::clone(table),
            queue,
            ids: Vec::new(),
            grace,
        };
        (registration, responses)
    }

    /// Route replies referencing `id` into this query's queue
    pub(crate) fn register(&mut self, id: MessageId) {
        self.table.insert(id, self.queue.clone());
        self.ids.push(id);
    }
}

impl Drop for QueryRegistration {
    fn drop(&mut self) {
        let ids = std::mem::take(&mut self.ids);
        self.table.release_after(ids, self.grace);
    }
}
