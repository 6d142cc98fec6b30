use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use log::log_enabled;

use crate::connection::{Connection, ConnectionId};
use crate::packet::Packet;

/// The set of every live [`Connection`] in the router.
///
/// Connections are held by weak reference: the pool does not keep a
/// connection alive by itself, it only offers packets to whichever
/// connections are still around. Ownership lives with whoever built the
/// connection (typically an [`InterfaceThreader`](crate::threader::InterfaceThreader)).
#[derive(Default)]
pub struct ConnectionPool {
    connections: RwLock<HashMap<ConnectionId, Weak<Connection>>>,
}

impl ConnectionPool {
    pub fn new() -> ConnectionPool {
        ConnectionPool::default()
    }

    /// Register `connection` with the pool.
    pub fn add(&self, connection: &Arc<Connection>) {
        let mut connections = self.connections.write().unwrap();
        connections.insert(connection.id(), Arc::downgrade(connection));
    }

    /// Drop `id` from the pool. Connections that have simply been dropped
    /// elsewhere are cleaned up lazily by [`send`](Self::send), but removing
    /// them eagerly on shutdown keeps the pool from accumulating dead
    /// entries in a long-running process with frequent reconnects.
    pub fn remove(&self, id: ConnectionId) {
        self.connections.write().unwrap().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offer `packet` to every live connection in the pool, logging at
    /// verbosity level 2 or higher how many accepted it.
    ///
    /// Connections whose weak reference has expired are pruned from the
    /// pool as a side effect.
    pub fn send(&self, packet: Arc<Packet>) {
        let snapshot: Vec<(ConnectionId, Weak<Connection>)> = {
            let connections = self.connections.read().unwrap();
            connections
                .iter()
                .map(|(id, weak)| (*id, weak.clone()))
                .collect()
        };

        let mut accepted = 0usize;
        let mut dead = Vec::new();
        for (id, weak) in snapshot {
            match weak.upgrade() {
                Some(connection) => {
                    if connection.send(&packet) {
                        accepted += 1;
                    }
                }
                None => dead.push(id),
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.write().unwrap();
            for id in dead {
                connections.remove(&id);
            }
        }

        if log_enabled!(log::Level::Debug) {
            log::debug!(
                "dispatched {} to {} of {} connections",
                packet,
                accepted,
                self.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MavAddress;
    use crate::filter::AcceptAll;
    use crate::packet::MavlinkVersion;
    use crate::pool::AddressPool;
    use crate::queue::PriorityQueue;
    use std::time::Duration;

    fn connection() -> Arc<Connection> {
        Arc::new(Connection::new(
            "test",
            Arc::new(AcceptAll),
            false,
            AddressPool::with_default_ttl(),
            PriorityQueue::unnotified(),
        ))
    }

    fn packet() -> Arc<Packet> {
        Arc::new(Packet::new(
            vec![],
            MavlinkVersion::V1,
            0,
            "HEARTBEAT",
            MavAddress::new(1, 1),
            None,
        ))
    }

    #[test]
    fn broadcasts_to_all_registered_connections() {
        let pool = ConnectionPool::new();
        let a = connection();
        let b = connection();
        // Each connection needs something other than the packet's own
        // source reachable to have a broadcast candidate to accept.
        a.pool().add(MavAddress::new(9, 9));
        b.pool().add(MavAddress::new(9, 9));
        pool.add(&a);
        pool.add(&b);
        pool.send(packet());
        assert!(a.next_packet(Duration::ZERO).is_some());
        assert!(b.next_packet(Duration::ZERO).is_some());
    }

    #[test]
    fn dropped_connection_is_pruned_on_next_send() {
        let pool = ConnectionPool::new();
        {
            let a = connection();
            pool.add(&a);
        }
        assert_eq!(pool.len(), 1);
        pool.send(packet());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn remove_drops_a_connection_immediately() {
        let pool = ConnectionPool::new();
        let a = connection();
        pool.add(&a);
        pool.remove(a.id());
        assert!(pool.is_empty());
    }
}
