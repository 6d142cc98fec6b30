use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::MavlinkCodec;
use crate::connection::Connection;
use crate::connection_factory::ConnectionFactory;
use crate::connection_pool::ConnectionPool;
use crate::error::{Result, RouterError};
use crate::filter::Filter;
use crate::ip::IpEndpoint;
use crate::transport::{SerialPort, UdpTransport};

/// The wire-level half of a connection: turn outgoing packets into bytes on
/// a transport, and incoming bytes into packets dispatched through a
/// [`ConnectionPool`].
///
/// An `Interface` owns the codec state, the transport, and the
/// [`Connection`](s) that feed it; routing decisions (what to accept, where
/// else to forward it) stay in [`Connection::send`] and
/// [`ConnectionPool::send`] — an interface just drains whichever connections
/// it owns and writes their packets to the wire, and hands whatever it reads
/// back to the pool.
pub trait Interface: Send {
    /// Drain at most one packet per owned connection (exactly one, for a
    /// single-connection interface) and write it to the transport. A
    /// connection with nothing ready within `timeout` contributes nothing.
    fn send_packet(&mut self, timeout: Duration) -> Result<()>;

    /// Read from the transport for up to `timeout`, feed the codec, and
    /// forward any packets that completed framing to the connection pool.
    /// A read timeout with nothing to parse is not an error.
    fn receive_packet(&mut self, timeout: Duration) -> Result<()>;

    /// Unblock any thread parked inside `send_packet`/`receive_packet` on
    /// this interface's connection(s), so a threader can join promptly on
    /// shutdown.
    fn shutdown(&self);
}

/// An interface over a serial port: a single peer, full duplex, byte stream,
/// with exactly one [`Connection`].
pub struct SerialInterface {
    port: Box<dyn SerialPort>,
    codec: MavlinkCodec,
    connection: Arc<Connection>,
    pool: Arc<ConnectionPool>,
}

impl SerialInterface {
    pub fn new(
        port: Box<dyn SerialPort>,
        connection: Arc<Connection>,
        pool: Arc<ConnectionPool>,
    ) -> SerialInterface {
        pool.add(&connection);
        SerialInterface {
            port,
            codec: MavlinkCodec::new(),
            connection,
            pool,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }
}

impl Interface for SerialInterface {
    fn send_packet(&mut self, timeout: Duration) -> Result<()> {
        if let Some(packet) = self.connection.next_packet(timeout) {
            self.port.write_all(packet.bytes())?;
        }
        Ok(())
    }

    fn receive_packet(&mut self, timeout: Duration) -> Result<()> {
        let mut buf = [0u8; 2048];
        let n = self.port.read(timeout, &mut buf)?;
        if n == 0 {
            return Ok(());
        }
        for packet in self.codec.accept(&buf[..n]) {
            self.connection.add_address(packet.source());
            packet.set_connection(self.connection.id());
            self.pool.send(Arc::new(packet));
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.connection.shutdown();
    }
}

/// An interface over a UDP socket, multiplexed by peer.
///
/// Unlike a serial port, one socket carries traffic from any number of
/// peers. Each distinct source [`IpEndpoint`] gets its own [`Connection`],
/// built on demand through an internal [`ConnectionFactory`] so that a
/// single transmit pass can block on "any of my peers has something to
/// send" rather than polling each one in turn. A fixed remote (`udpout`
/// style) pre-creates that one peer's connection at construction time so
/// packets can be enqueued for it before
/// any datagram has ever arrived; without one (`udpin` style), connections
/// are created lazily as new peers are heard from.
pub struct UdpInterface {
    socket: Box<dyn UdpTransport>,
    codec: MavlinkCodec,
    factory: ConnectionFactory,
    filter: Arc<dyn Filter>,
    mirror: bool,
    ttl: Duration,
    pool: Arc<ConnectionPool>,
    connections: HashMap<IpEndpoint, Arc<Connection>>,
    last_peer: Option<IpEndpoint>,
}

impl UdpInterface {
    pub fn new(
        socket: Box<dyn UdpTransport>,
        filter: Arc<dyn Filter>,
        mirror: bool,
        ttl: Duration,
        pool: Arc<ConnectionPool>,
        fixed_remote: Option<IpEndpoint>,
    ) -> UdpInterface {
        let mut iface = UdpInterface {
            socket,
            codec: MavlinkCodec::new(),
            factory: ConnectionFactory::new(),
            filter,
            mirror,
            ttl,
            pool,
            connections: HashMap::new(),
            last_peer: None,
        };
        if let Some(remote) = fixed_remote {
            iface.connection_for(remote);
        }
        iface
    }

    /// Number of distinct peers currently multiplexed. Exposed for tests;
    /// production code has no need to enumerate peers directly.
    pub fn peer_count(&self) -> usize {
        self.connections.len()
    }

    fn connection_for(&mut self, endpoint: IpEndpoint) -> Arc<Connection> {
        if let Some(connection) = self.connections.get(&endpoint) {
            return connection.clone();
        }
        let connection = self
            .factory
            .get(&endpoint.to_string(), self.filter.clone(), self.mirror, self.ttl);
        self.pool.add(&connection);
        self.connections.insert(endpoint, connection.clone());
        connection
    }
}

impl Interface for UdpInterface {
    fn send_packet(&mut self, timeout: Duration) -> Result<()> {
        if !self.factory.wait_any(timeout) {
            return Ok(());
        }

        let endpoints: Vec<IpEndpoint> = self.connections.keys().copied().collect();
        let mut drained = 0usize;
        for endpoint in endpoints {
            let connection = match self.connections.get(&endpoint) {
                Some(connection) => connection.clone(),
                None => continue,
            };
            if let Some(packet) = connection.next_packet(Duration::ZERO) {
                let addr = SocketAddr::V4(SocketAddrV4::new(endpoint.address(), endpoint.port()));
                self.socket.send_to(packet.bytes(), addr)?;
                drained += 1;
            }
        }

        // The `wait_any` above already accounts for one packet; every packet
        // drained beyond the first needs its own semaphore decrement or the
        // count drifts out of balance with what was actually pushed.
        for _ in 1..drained {
            self.factory.wait_any(Duration::ZERO);
        }
        Ok(())
    }

    fn receive_packet(&mut self, timeout: Duration) -> Result<()> {
        let mut buf = [0u8; 2048];
        let (n, addr) = match self.socket.recv_from(timeout, &mut buf)? {
            Some(received) => received,
            None => return Ok(()),
        };
        let endpoint = match addr {
            SocketAddr::V4(v4) => IpEndpoint::from(v4),
            SocketAddr::V6(_) => {
                return Err(RouterError::InvalidArgument(
                    "IPv6 peers are not supported".to_string(),
                ));
            }
        };

        if self.last_peer != Some(endpoint) {
            // A half-received frame from the previous peer is meaningless
            // spliced with bytes from this one.
            self.codec.clear();
            self.last_peer = Some(endpoint);
        }

        let connection = self.connection_for(endpoint);
        for packet in self.codec.accept(&buf[..n]) {
            connection.add_address(packet.source());
            packet.set_connection(connection.id());
            self.pool.send(Arc::new(packet));
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.factory.shutdown();
    }
}
