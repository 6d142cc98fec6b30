use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connection::Connection;
use crate::filter::Filter;
use crate::pool::AddressPool;
use crate::queue::PriorityQueue;
use crate::semaphore::Semaphore;

/// Builds [`Connection`]s that all push into the same semaphore, and lets a
/// single thread wait for "any of my connections has something to send"
/// instead of polling each one's queue in turn.
///
/// This is the piece that makes a single
/// [`InterfaceThreader`](crate::threader::InterfaceThreader) able to own
/// several connections (e.g. a UDP interface with one connection per peer)
/// without spinning up a transmit thread per connection.
pub struct ConnectionFactory {
    semaphore: Arc<Semaphore>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionFactory {
    pub fn new() -> ConnectionFactory {
        ConnectionFactory {
            semaphore: Arc::new(Semaphore::new(0)),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Return the existing connection named `name`, or build one with
    /// `filter`/`mirror`/`ttl` and register it.
    pub fn get(
        &self,
        name: &str,
        filter: Arc<dyn Filter>,
        mirror: bool,
        ttl: Duration,
    ) -> Arc<Connection> {
        let mut connections = self.connections.lock().unwrap();
        if let Some(existing) = connections.get(name) {
            return existing.clone();
        }
        let semaphore = self.semaphore.clone();
        let queue = PriorityQueue::new(move || semaphore.notify());
        let connection = Arc::new(Connection::new(
            name.to_string(),
            filter,
            mirror,
            AddressPool::new(ttl),
            queue,
        ));
        connections.insert(name.to_string(), connection.clone());
        connection
    }

    /// All connections built so far, in unspecified order.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().unwrap().values().cloned().collect()
    }

    /// Block up to `timeout` for any connection built by this factory to
    /// have a packet ready. Returns `true` if something became ready;
    /// callers still need to poll each connection's `next_packet` since this
    /// only reports that *something* is ready, not which connection.
    pub fn wait_any(&self, timeout: Duration) -> bool {
        self.semaphore.wait_for(timeout)
    }

    pub fn shutdown(&self) {
        for connection in self.connections() {
            connection.shutdown();
        }
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        ConnectionFactory::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::AcceptAll;

    #[test]
    fn get_is_idempotent_by_name() {
        let factory = ConnectionFactory::new();
        let a = factory.get("gcs", Arc::new(AcceptAll), false, Duration::from_secs(60));
        let b = factory.get("gcs", Arc::new(AcceptAll), false, Duration::from_secs(60));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn wait_any_wakes_on_push_to_any_connection() {
        let factory = ConnectionFactory::new();
        let conn = factory.get("a", Arc::new(AcceptAll), false, Duration::from_secs(60));
        conn.pool().add(crate::address::MavAddress::new(1, 1));
        assert!(!factory.wait_any(Duration::from_millis(10)));
        conn.send(&Arc::new(crate::packet::Packet::new(
            vec![],
            crate::packet::MavlinkVersion::V1,
            0,
            "HEARTBEAT",
            crate::address::MavAddress::new(9, 9),
            None,
        )));
        assert!(factory.wait_any(Duration::from_millis(200)));
    }
}
