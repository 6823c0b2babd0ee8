//! Send policies and write completion tracking
//!
//! Every write queued on a connection yields a [`WriteHandle`] that resolves
//! once the writer task has flushed the frame (or given up on it). A send that
//! targets several connections aggregates its handles into a [`SendGroup`].

use crate::connection::Connection;
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use types::{PeerId, PeerType};

/// Which connections a message goes to
#[derive(Debug, Clone)]
pub enum SendPolicy {
    /// Round-robin to one live connection of the type
    OneOfType(PeerType),
    /// Every live connection of the type
    AllOfType(PeerType),
    /// This exact connection
    ViaConnection(Arc<Connection>),
    /// The connection currently bound to this peer id
    ViaPeerId(PeerId),
}

/// Progress of one queued write
#[derive(Debug, Clone)]
pub enum WriteStatus {
    Pending,
    Written,
    Failed(Arc<TransportError>),
}

impl WriteStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Completion side of a queued write, owned by the writer task
#[derive(Debug)]
pub(crate) struct WriteCompletion {
    status: watch::Sender<WriteStatus>,
    _pending: PendingGuard,
}

impl WriteCompletion {
    pub(crate) fn new(pending: &Arc<PendingWrites>) -> (Self, WriteHandle) {
        let (status, rx) = watch::channel(WriteStatus::Pending);
        let completion = Self {
            status,
            _pending: PendingGuard::new(pending),
        };
        (completion, WriteHandle { connection: 0, rx })
    }

    pub(crate) fn written(self) {
        self.status.send_replace(WriteStatus::Written);
    }

    pub(crate) fn failed(self, error: TransportError) {
        self.status.send_replace(WriteStatus::Failed(Arc::new(error)));
    }
}

/// Awaitable result of one write.
///
/// If the connection goes away before the frame is written the handle
/// resolves as failed.
#[derive(Debug, Clone)]
pub struct WriteHandle {
    connection: u64,
    rx: watch::Receiver<WriteStatus>,
}

impl WriteHandle {
    pub(crate) fn for_connection(mut self, connection: u64) -> Self {
        self.connection = connection;
        self
    }

    /// Handle that has already failed
    pub(crate) fn failed(connection: u64, error: TransportError) -> Self {
        let (_tx, rx) = watch::channel(WriteStatus::Failed(Arc::new(error)));
        Self { connection, rx }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    pub fn status(&self) -> WriteStatus {
        let current = self.rx.borrow().clone();
        match current {
            WriteStatus::Pending if self.rx.has_changed().is_err() => self.dropped(),
            status => status,
        }
    }

    pub fn is_done(&self) -> bool {
        !self.status().is_pending()
    }

    pub async fn wait(&self) -> WriteStatus {
        let mut rx = self.rx.clone();
        let finished = match rx.wait_for(|s| !s.is_pending()).await {
            Ok(status) => Some(status.clone()),
            Err(_) => None,
        };
        finished.unwrap_or_else(|| self.status())
    }

    fn dropped(&self) -> WriteStatus {
        WriteStatus::Failed(Arc::new(TransportError::closed(
            self.connection,
            "write dropped before completion",
        )))
    }
}

/// Aggregate of the writes issued by one `send` call.
///
/// Failure of one member does not affect the others.
#[derive(Debug, Clone, Default)]
pub struct SendGroup {
    writes: Vec<WriteHandle>,
}

impl SendGroup {
    pub(crate) fn new(writes: Vec<WriteHandle>) -> Self {
        Self { writes }
    }

    /// Number of connections the message was queued on
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[WriteHandle] {
        &self.writes
    }

    /// True once every member write has finished, successfully or not
    pub fn is_done(&self) -> bool {
        self.writes.iter().all(WriteHandle::is_done)
    }

    /// True once every member write has finished successfully
    pub fn is_success(&self) -> bool {
        self.writes
            .iter()
            .all(|w| matches!(w.status(), WriteStatus::Written))
    }

    /// First failure among finished writes
    pub fn cause(&self) -> Option<Arc<TransportError>> {
        self.writes.iter().find_map(|w| match w.status() {
            WriteStatus::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Wait for every member write
    pub async fn wait(&self) {
        for write in &self.writes {
            write.wait().await;
        }
    }

    /// Wait up to `timeout`, returning whether the group finished
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

/// Writes queued but not yet finished, across all connections.
///
/// Each write takes the next sequence number so a flush can wait for exactly
/// the writes issued before it started.
#[derive(Debug, Default)]
pub struct PendingWrites {
    state: Mutex<PendingState>,
    progress: Notify,
}

#[derive(Debug, Default)]
struct PendingState {
    next: u64,
    outstanding: BTreeSet<u64>,
}

impl PendingState {
    fn settled_before(&self, mark: u64) -> bool {
        self.outstanding.first().map_or(true, |&oldest| oldest >= mark)
    }
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Wait until every write issued before this call has finished, or
    /// `timeout` elapses. Writes queued afterwards are not waited for.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mark = self.state.lock().next;
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().settled_before(mark) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.state.lock().settled_before(mark);
            }
        }
    }

    fn acquire(&self) -> u64 {
        let mut state = self.state.lock();
        let seq = state.next;
        state.next += 1;
        state.outstanding.insert(seq);
        seq
    }

    fn release(&self, seq: u64) {
        self.state.lock().outstanding.remove(&seq);
        self.progress.notify_waiters();
    }
}

#[derive(Debug)]
struct PendingGuard {
    pending: Arc<PendingWrites>,
    seq: u64,
}

impl PendingGuard {
    fn new(pending: &Arc<PendingWrites>) -> Self {
        let seq = pending.acquire();
        Self {
            pending: Arc::clone(pending),
            seq,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.release(self.seq);
    }
}
