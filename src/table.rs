//! Bounded registry of live client connections.
//!
//! Owned by the event loop and passed explicitly to the dispatcher. Ids are
//! handed out monotonically, so iterating the map yields insertion order.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no command seen yet
    Open,
    /// Has issued at least one command
    Active,
    Closed,
}

#[derive(Debug)]
pub struct Connection<S> {
    pub id: ConnectionId,
    pub stream: S,
    pub peer: SocketAddr,
    pub state: ConnectionState,
}

/// Returned by [`ConnectionTable::insert`] when every slot is taken. Hands the
/// stream back so the caller can reject it.
pub struct CapacityExceeded<S> {
    pub stream: S,
    pub peer: SocketAddr,
    pub capacity: usize,
}

impl<S> fmt::Debug for CapacityExceeded<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityExceeded")
            .field("peer", &self.peer)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<S> fmt::Display for CapacityExceeded<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection table full ({} clients), rejecting {}",
            self.capacity, self.peer
        )
    }
}

impl<S> std::error::Error for CapacityExceeded<S> {}

pub struct ConnectionTable<S> {
    slots: BTreeMap<ConnectionId, Connection<S>>,
    capacity: usize,
    next_id: u64,
}

impl<S> ConnectionTable<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            capacity,
            next_id: 1,
        }
    }

    pub fn insert(
        &mut self,
        stream: S,
        peer: SocketAddr,
    ) -> Result<ConnectionId, CapacityExceeded<S>> {
        if self.is_full() {
            return Err(CapacityExceeded {
                stream,
                peer,
                capacity: self.capacity,
            });
        }
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            Connection {
                id,
                stream,
                peer,
                state: ConnectionState::Open,
            },
        );
        Ok(id)
    }

    /// Remove and return a connection. Removing an unknown id is a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection<S>> {
        self.slots.remove(&id).map(|mut conn| {
            conn.state = ConnectionState::Closed;
            conn
        })
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection<S>> {
        self.slots.get_mut(&id)
    }

    /// Peer addresses of every tracked connection, in insertion order.
    pub fn peers(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.slots.values().map(|c| (c.id, c.peer)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.slots.values()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn insert_until_full_then_reject() {
        let mut table = ConnectionTable::new(2);
        table.insert("a", addr(1)).unwrap();
        table.insert("b", addr(2)).unwrap();
        assert!(table.is_full());

        let err = table.insert("c", addr(3)).unwrap_err();
        assert_eq!(err.stream, "c");
        assert_eq!(err.capacity, 2);
        assert_eq!(table.peers().len(), 2);
    }

    #[test]
    fn remove_is_idempotent_and_frees_slot() {
        let mut table = ConnectionTable::new(1);
        let id = table.insert((), addr(1)).unwrap();
        let removed = table.remove(id).unwrap();
        assert_eq!(removed.state, ConnectionState::Closed);
        assert!(table.remove(id).is_none());
        assert!(table.peers().is_empty());
        assert!(table.insert((), addr(2)).is_ok());
    }

    #[test]
    fn peers_follow_insertion_order() {
        let mut table = ConnectionTable::new(4);
        let a = table.insert((), addr(10)).unwrap();
        let b = table.insert((), addr(20)).unwrap();
        let c = table.insert((), addr(30)).unwrap();
        table.remove(b);
        let d = table.insert((), addr(40)).unwrap();

        let peers = table.peers();
        assert_eq!(
            peers,
            vec![(a, addr(10)), (c, addr(30)), (d, addr(40))]
        );
    }

    #[test]
    fn new_connections_start_open() {
        let mut table = ConnectionTable::new(1);
        let id = table.insert((), addr(5)).unwrap();
        assert_eq!(table.get_mut(id).unwrap().state, ConnectionState::Open);
        table.get_mut(id).unwrap().state = ConnectionState::Active;
        let states: Vec<_> = table.iter().map(|c| c.state).collect();
        assert_eq!(states, vec![ConnectionState::Active]);
    }
}
