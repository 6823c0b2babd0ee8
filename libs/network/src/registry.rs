//! Peer Registry
//!
//! Tracks every connection a manager owns and indexes bound ones by peer type
//! (ordered, for round-robin) and by peer id (one current connection each).
//! All operations run under one mutex, so round-robin rotation is atomic with
//! selection.

use crate::connection::{Connection, ConnectionId, PeerIdentity};
use crate::error::RoutingError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use types::{PeerId, PeerType};

#[derive(Debug, Default)]
pub struct PeerRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Every known connection, bound or provisional
    connections: HashMap<ConnectionId, Arc<Connection>>,
    by_type: HashMap<PeerType, VecDeque<Arc<Connection>>>,
    by_peer_id: HashMap<PeerId, Arc<Connection>>,
    /// Reverse index so removal never scans `by_peer_id`
    identity_of: HashMap<ConnectionId, PeerIdentity>,
}

impl RegistryState {
    fn unbind(&mut self, connection_id: ConnectionId) {
        let Some(identity) = self.identity_of.remove(&connection_id) else {
            return;
        };

        if let Some(queue) = self.by_type.get_mut(&identity.peer_type) {
            queue.retain(|c| c.id() != connection_id);
            if queue.is_empty() {
                self.by_type.remove(&identity.peer_type);
            }
        }

        let owns_peer_id = self
            .by_peer_id
            .get(&identity.peer_id)
            .is_some_and(|c| c.id() == connection_id);
        if owns_peer_id {
            self.by_peer_id.remove(&identity.peer_id);
        }
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection whose identity is not known yet
    pub fn add_provisional(&self, connection: Arc<Connection>) {
        self.state
            .lock()
            .connections
            .insert(connection.id(), connection);
    }

    /// Associate `connection` with a peer identity.
    ///
    /// Returns the connection previously bound to the same peer id, which the
    /// caller must close. A connection re-binding itself returns `None`.
    pub fn bind(
        &self,
        connection: &Arc<Connection>,
        peer_id: PeerId,
        peer_type: PeerType,
    ) -> Option<Arc<Connection>> {
        let identity = PeerIdentity { peer_id, peer_type };
        let mut state = self.state.lock();

        state.unbind(connection.id());
        state
            .connections
            .insert(connection.id(), Arc::clone(connection));

        let previous = state.by_peer_id.insert(peer_id, Arc::clone(connection));
        let previous = previous.filter(|old| old.id() != connection.id());
        if let Some(old) = &previous {
            state.unbind(old.id());
            state.connections.remove(&old.id());
        }

        state
            .by_type
            .entry(peer_type)
            .or_default()
            .push_back(Arc::clone(connection));
        state.identity_of.insert(connection.id(), identity);
        connection.set_identity(identity);

        previous
    }

    /// Drop `connection` from every index; true if it was known
    pub fn remove(&self, connection: &Connection) -> bool {
        let mut state = self.state.lock();
        let known = state.connections.remove(&connection.id()).is_some();
        let bound = state.identity_of.contains_key(&connection.id());
        state.unbind(connection.id());
        known || bound
    }

    /// Next live connection of `peer_type`, rotating the order.
    ///
    /// Closed connections met on the way are dropped from the rotation.
    pub fn pick_round_robin(&self, peer_type: PeerType) -> Result<Arc<Connection>, RoutingError> {
        let mut state = self.state.lock();
        let queue = state
            .by_type
            .get_mut(&peer_type)
            .ok_or(RoutingError::NoPeerForType(peer_type))?;

        while let Some(candidate) = queue.pop_front() {
            if candidate.is_closed() {
                continue;
            }
            queue.push_back(Arc::clone(&candidate));
            return Ok(candidate);
        }

        state.by_type.remove(&peer_type);
        Err(RoutingError::NoPeerForType(peer_type))
    }

    /// Snapshot of the live connections of `peer_type`, in rotation order
    pub fn all_of_type(&self, peer_type: PeerType) -> Result<Vec<Arc<Connection>>, RoutingError> {
        let state = self.state.lock();
        let live: Vec<_> = state
            .by_type
            .get(&peer_type)
            .into_iter()
            .flatten()
            .filter(|c| !c.is_closed())
            .cloned()
            .collect();

        if live.is_empty() {
            Err(RoutingError::NoPeerForType(peer_type))
        } else {
            Ok(live)
        }
    }

    pub fn by_peer_id(&self, peer_id: PeerId) -> Result<Arc<Connection>, RoutingError> {
        self.state
            .lock()
            .by_peer_id
            .get(&peer_id)
            .filter(|c| !c.is_closed())
            .cloned()
            .ok_or(RoutingError::NoPeerForPeerId(peer_id))
    }

    /// Identities of live peers of `peer_type`
    pub fn peers_of_type(&self, peer_type: PeerType) -> Vec<PeerIdentity> {
        let state = self.state.lock();
        state
            .by_type
            .get(&peer_type)
            .into_iter()
            .flatten()
            .filter(|c| !c.is_closed())
            .filter_map(|c| state.identity_of.get(&c.id()).copied())
            .collect()
    }

    /// Every tracked connection, bound or provisional
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.state.lock().connections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
