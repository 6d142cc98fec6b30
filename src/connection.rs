use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::address::MavAddress;
use crate::filter::Filter;
use crate::packet::Packet;
use crate::pool::AddressPool;
use crate::queue::PriorityQueue;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A stable, cheaply-copyable identifier for a [`Connection`].
///
/// Packets remember which connection they arrived on by id rather than by
/// holding a strong reference back to it (a [`Packet`] can easily outlive
/// the connection that produced it, e.g. while it sits in another
/// connection's outbound queue after its source has been torn down). Ids are
/// handed out from a single process-wide counter, so they are unique for the
/// lifetime of the process and never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> ConnectionId {
        ConnectionId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Construct an id from a raw value. Only meant for tests and for
    /// reconstructing an id read back out of logs or debug output; normal
    /// code gets its id from [`Connection::id`].
    pub fn from_raw(value: u64) -> ConnectionId {
        ConnectionId(value)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One endpoint of the router: a named, filtered, address-learning mailbox
/// that an [`Interface`](crate::interface::Interface) thread drains to find
/// packets to transmit.
///
/// A `Connection` does not itself own a transport or a thread; it is the
/// shared state between the receive side (which calls [`Connection::send`]
/// whenever any *other* connection accepts a packet) and the transmit side
/// (which calls [`Connection::next_packet`] in a loop).
pub struct Connection {
    id: ConnectionId,
    name: String,
    filter: Arc<dyn Filter>,
    mirror: bool,
    pool: AddressPool,
    queue: PriorityQueue,
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        filter: Arc<dyn Filter>,
        mirror: bool,
        pool: AddressPool,
        queue: PriorityQueue,
    ) -> Connection {
        Connection {
            id: ConnectionId::next(),
            name: name.into(),
            filter,
            mirror,
            pool,
            queue,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` if this connection also receives a copy of packets it itself
    /// sent out, rather than only packets sourced elsewhere.
    pub fn mirror(&self) -> bool {
        self.mirror
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    /// Record that `addr` is reachable through this connection.
    pub fn add_address(&self, addr: MavAddress) {
        self.pool.add(addr);
    }

    /// Offer `packet` to this connection.
    ///
    /// A packet that arrived on this very connection is dropped unless the
    /// connection mirrors its own traffic. Otherwise, a packet with a
    /// specific (non-broadcast, non-component-broadcast) destination is
    /// forwarded only if that destination is currently reachable through
    /// this connection's address pool and the filter accepts it. Every
    /// other case -- no destination, a full broadcast (`0.0`), a
    /// component broadcast (`sys.0`), or a mirroring connection ignoring
    /// its destination entirely -- fans the filter out over every
    /// currently reachable address (other than the packet's own source)
    /// and forwards at the highest priority any of them was accepted at.
    ///
    /// Returns `true` if the packet was accepted and queued.
    pub fn send(&self, packet: &Arc<Packet>) -> bool {
        if packet.connection() == Some(self.id) && !self.mirror {
            return false;
        }

        let dest = packet.dest();
        let targeted = !self.mirror
            && dest.is_some_and(|d| !d.is_broadcast() && !d.is_component_broadcast());

        if targeted {
            let dest = dest.unwrap();
            if !self.pool.contains(dest) {
                return false;
            }
            let (accept, priority) = self.filter.will_accept(packet, dest);
            if !accept {
                return false;
            }
            self.queue.push(packet.clone(), priority);
            return true;
        }

        let source = packet.source();
        let component_broadcast_system =
            dest.filter(|d| d.is_component_broadcast() && !d.is_broadcast())
                .map(|d| d.system());

        let mut accept = false;
        let mut best_priority = i16::MIN;
        for candidate in self.pool.addresses() {
            if candidate == source {
                continue;
            }
            if let Some(system) = component_broadcast_system {
                if candidate.system() != system {
                    continue;
                }
            }
            let (candidate_accept, priority) = self.filter.will_accept(packet, candidate);
            if candidate_accept {
                accept = true;
                best_priority = best_priority.max(priority);
            }
        }

        if accept {
            self.queue.push(packet.clone(), best_priority);
        }
        accept
    }

    /// Block up to `timeout` for the next queued outbound packet.
    pub fn next_packet(&self, timeout: Duration) -> Option<Arc<Packet>> {
        self.queue.pop(timeout)
    }

    /// Unblock any thread waiting in [`next_packet`](Self::next_packet).
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mirror", &self.mirror)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AcceptAll, Filter};
    use crate::packet::MavlinkVersion;

    fn packet_to(dest: Option<MavAddress>) -> Arc<Packet> {
        Arc::new(Packet::new(
            vec![],
            MavlinkVersion::V1,
            0,
            "HEARTBEAT",
            MavAddress::new(1, 1),
            dest,
        ))
    }

    fn connection(mirror: bool) -> Connection {
        Connection::new(
            "test",
            Arc::new(AcceptAll),
            mirror,
            AddressPool::with_default_ttl(),
            PriorityQueue::unnotified(),
        )
    }

    fn connection_with(filter: Arc<dyn Filter>, mirror: bool) -> Connection {
        Connection::new(
            "test",
            filter,
            mirror,
            AddressPool::with_default_ttl(),
            PriorityQueue::unnotified(),
        )
    }

    /// Accepts a fixed set of `(address, priority)` pairs, rejecting
    /// everything else, regardless of what the packet itself looks like.
    struct PerAddress(Vec<(MavAddress, i16)>);

    impl Filter for PerAddress {
        fn will_accept(&self, _packet: &Packet, dest: MavAddress) -> (bool, i16) {
            match self.0.iter().find(|(a, _)| *a == dest) {
                Some((_, priority)) => (true, *priority),
                None => (false, 0),
            }
        }
    }

    #[test]
    fn ids_are_distinct() {
        let a = connection(false);
        let b = connection(false);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn non_mirroring_connection_skips_its_own_packets() {
        let conn = connection(false);
        let p = packet_to(None);
        p.set_connection(conn.id());
        assert!(!conn.send(&p));
        assert!(conn.next_packet(Duration::ZERO).is_none());
    }

    #[test]
    fn mirroring_connection_accepts_its_own_packets() {
        let conn = connection(true);
        conn.pool().add(MavAddress::new(9, 9));
        let p = packet_to(None);
        p.set_connection(conn.id());
        assert!(conn.send(&p));
    }

    #[test]
    fn shutdown_unblocks_next_packet() {
        let conn = connection(false);
        conn.shutdown();
        assert!(conn.next_packet(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn targeted_accept() {
        // Scenario: pool has {10.10, 172.16, 192.168}; filter accepts
        // 192.168 at priority 2 and nothing else. dest=192.168 is
        // forwarded once at priority 2.
        let filter = Arc::new(PerAddress(vec![(MavAddress::new(192, 168), 2)]));
        let conn = connection_with(filter, false);
        for addr in [
            MavAddress::new(10, 10),
            MavAddress::new(172, 16),
            MavAddress::new(192, 168),
        ] {
            conn.pool().add(addr);
        }
        let p = packet_to(Some(MavAddress::new(192, 168)));
        assert!(conn.send(&p));
        let popped = conn.next_packet(Duration::ZERO).unwrap();
        assert_eq!(popped.priority(), 2);
        assert!(conn.next_packet(Duration::ZERO).is_none());
    }

    #[test]
    fn targeted_unreachable_is_dropped() {
        // Scenario: pool has {10.10, 172.16}; dest=192.168 was never
        // learned, so nothing is enqueued even though the filter would
        // have accepted it.
        let filter = Arc::new(PerAddress(vec![(MavAddress::new(192, 168), 2)]));
        let conn = connection_with(filter, false);
        conn.pool().add(MavAddress::new(10, 10));
        conn.pool().add(MavAddress::new(172, 16));
        let p = packet_to(Some(MavAddress::new(192, 168)));
        assert!(!conn.send(&p));
        assert!(conn.next_packet(Duration::ZERO).is_none());
    }

    #[test]
    fn broadcast_uses_max_priority_across_accepted_candidates() {
        // Scenario: pool has {10.10, 172.16, 192.168}; filter accepts
        // 172.16 at -3 and 192.168 at 2, rejects 10.10. A broadcast
        // (dest=None) is forwarded once at priority 2.
        let filter = Arc::new(PerAddress(vec![
            (MavAddress::new(172, 16), -3),
            (MavAddress::new(192, 168), 2),
        ]));
        let conn = connection_with(filter, false);
        for addr in [
            MavAddress::new(10, 10),
            MavAddress::new(172, 16),
            MavAddress::new(192, 168),
        ] {
            conn.pool().add(addr);
        }
        let p = packet_to(None);
        assert!(conn.send(&p));
        assert_eq!(conn.next_packet(Duration::ZERO).unwrap().priority(), 2);
    }

    #[test]
    fn component_broadcast_limits_candidates_to_the_target_system() {
        // dest=123.0 (system 123, every component); pool has
        // {10.10, 123.16, 123.17, 123.168}; filter accepts 123.168 at 2
        // and 123.16 at -3. Only system-123 candidates are considered, so
        // the result is one push at priority 2.
        let filter = Arc::new(PerAddress(vec![
            (MavAddress::new(123, 168), 2),
            (MavAddress::new(123, 16), -3),
        ]));
        let conn = connection_with(filter, false);
        for addr in [
            MavAddress::new(10, 10),
            MavAddress::new(123, 16),
            MavAddress::new(123, 17),
            MavAddress::new(123, 168),
        ] {
            conn.pool().add(addr);
        }
        let p = packet_to(Some(MavAddress::new(123, 0)));
        assert!(conn.send(&p));
        assert_eq!(conn.next_packet(Duration::ZERO).unwrap().priority(), 2);
        assert!(conn.next_packet(Duration::ZERO).is_none());
    }

    #[test]
    fn mirror_bypasses_destination_and_considers_every_reachable_address() {
        // Scenario: mirror=true, packet carries a concrete dest, but every
        // reachable non-source address is still a candidate, exactly as a
        // broadcast would be.
        let filter = Arc::new(PerAddress(vec![(MavAddress::new(192, 168), 2)]));
        let conn = connection_with(filter, true);
        conn.pool().add(MavAddress::new(10, 10));
        conn.pool().add(MavAddress::new(192, 168));
        let p = packet_to(Some(MavAddress::new(192, 168)));
        assert!(conn.send(&p));
        assert_eq!(conn.next_packet(Duration::ZERO).unwrap().priority(), 2);
    }

    #[test]
    fn broadcast_candidates_exclude_the_packets_own_source() {
        let filter = Arc::new(PerAddress(vec![(MavAddress::new(1, 1), 5)]));
        let conn = connection_with(filter, false);
        conn.pool().add(MavAddress::new(1, 1)); // the packet's own source
        let p = packet_to(None); // source is 1.1, see packet_to()
        assert!(!conn.send(&p));
    }
}
