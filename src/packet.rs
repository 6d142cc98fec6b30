use std::fmt;
use std::sync::Mutex;

use crate::address::MavAddress;
use crate::connection::ConnectionId;

/// Which MAVLink wire framing a packet was parsed as.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MavlinkVersion {
    V1,
    V2,
}

impl fmt::Display for MavlinkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MavlinkVersion::V1 => write!(f, "1.0"),
            MavlinkVersion::V2 => write!(f, "2.0"),
        }
    }
}

/// A single parsed MAVLink frame.
///
/// Everything is fixed at construction time except `priority` and
/// `connection`, which are filled in as the packet moves through the
/// routing fabric (the filter assigns a priority, the receiving
/// [`Interface`](crate::interface::Interface) stamps the originating
/// connection). Both are only ever written before the packet is handed to
/// [`ConnectionPool::send`](crate::connection_pool::ConnectionPool::send),
/// i.e. before any other thread can observe them, so a `Mutex` guarding a
/// handful of writes before first publication is adequate -- it is never
/// contended in practice.
pub struct Packet {
    bytes: Vec<u8>,
    version: MavlinkVersion,
    id: u32,
    name: &'static str,
    source: MavAddress,
    dest: Option<MavAddress>,
    priority: Mutex<i16>,
    connection: Mutex<Option<ConnectionId>>,
}

impl Packet {
    /// Construct a new packet with the default priority (0) and no
    /// originating connection.
    pub fn new(
        bytes: Vec<u8>,
        version: MavlinkVersion,
        id: u32,
        name: &'static str,
        source: MavAddress,
        dest: Option<MavAddress>,
    ) -> Packet {
        Packet {
            bytes,
            version,
            id,
            name,
            source,
            dest,
            priority: Mutex::new(0),
            connection: Mutex::new(None),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn version(&self) -> MavlinkVersion {
        self.version
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn source(&self) -> MavAddress {
        self.source
    }

    pub fn dest(&self) -> Option<MavAddress> {
        self.dest
    }

    pub fn priority(&self) -> i16 {
        *self.priority.lock().unwrap()
    }

    /// Set the packet's priority, returning the new value.
    pub fn set_priority(&self, priority: i16) -> i16 {
        *self.priority.lock().unwrap() = priority;
        priority
    }

    /// The connection this packet was received on, if any.
    pub fn connection(&self) -> Option<ConnectionId> {
        *self.connection.lock().unwrap()
    }

    /// Record which connection this packet was received on.
    pub fn set_connection(&self, connection: ConnectionId) {
        *self.connection.lock().unwrap() = Some(connection);
    }
}

impl fmt::Display for Packet {
    /// Format like `"HEARTBEAT (#1) from 16.8 to 128.4 (v2.0) with priority 3"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{}) from {}", self.name, self.id, self.source)?;
        if let Some(dest) = self.dest {
            write!(f, " to {}", dest)?;
        }
        write!(f, " (v{}) with priority {}", self.version, self.priority())
    }
}
