//! Thin traits over the two byte-level transports the router speaks,
//! letting [`interface`](crate::interface) and [`threader`](crate::threader)
//! be tested against an in-memory fake instead of a real serial port or
//! socket.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, RouterError};

/// A byte-stream transport, implemented by a serial port.
pub trait SerialPort: Send {
    /// Read whatever is available into `buf`, blocking up to `timeout`.
    /// Returns the number of bytes read (zero on timeout, never an error
    /// for a timeout).
    fn read(&mut self, timeout: Duration, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the entirety of `buf`, returning
    /// [`RouterError::PartialSend`] if the underlying device only accepted
    /// part of it.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;
}

/// A real serial port opened with the `serial` crate.
pub struct UnixSerialPort {
    port: serial::SystemPort,
    configured_timeout: Duration,
}

impl UnixSerialPort {
    pub fn open(device: &str, baud: u32) -> Result<UnixSerialPort> {
        use serial::core::{BaudRate, PortSettings};
        use serial::SerialPort as _;

        let mut port = serial::open(device)?;
        let settings = PortSettings {
            baud_rate: BaudRate::from_speed(baud as usize),
            char_size: serial::Bits8,
            parity: serial::ParityNone,
            stop_bits: serial::Stop1,
            flow_control: serial::FlowNone,
        };
        port.configure(&settings)?;
        let configured_timeout = Duration::from_millis(100);
        port.set_timeout(configured_timeout)?;
        Ok(UnixSerialPort {
            port,
            configured_timeout,
        })
    }
}

impl SerialPort for UnixSerialPort {
    fn read(&mut self, timeout: Duration, buf: &mut [u8]) -> io::Result<usize> {
        use serial::SerialPort as _;
        use std::io::Read;

        if timeout != self.configured_timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            self.configured_timeout = timeout;
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            // A POLLERR on the underlying fd surfaces as some other I/O
            // error; the caller reopens the transport on these.
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        use std::io::Write;
        let wrote = self.port.write(buf)?;
        if wrote != buf.len() {
            return Err(RouterError::PartialSend {
                wrote,
                total: buf.len(),
            });
        }
        Ok(())
    }
}

/// A UDP transport, addressed per-datagram rather than connection-oriented.
pub trait UdpTransport: Send {
    /// Receive one datagram, blocking up to `timeout`. Returns `None` on
    /// timeout or a transient receive error.
    fn recv_from(&mut self, timeout: Duration, buf: &mut [u8])
        -> io::Result<Option<(usize, SocketAddr)>>;

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<()>;
}

/// A real UDP socket.
pub struct StdUdpSocket {
    socket: std::net::UdpSocket,
}

impl StdUdpSocket {
    pub fn bind(addr: SocketAddr) -> Result<StdUdpSocket> {
        let socket = std::net::UdpSocket::bind(addr)?;
        Ok(StdUdpSocket { socket })
    }
}

impl UdpTransport for StdUdpSocket {
    fn recv_from(
        &mut self,
        timeout: Duration,
        buf: &mut [u8],
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        if timeout.is_zero() {
            self.socket.set_nonblocking(true)?;
        } else {
            self.socket.set_nonblocking(false)?;
            self.socket.set_read_timeout(Some(timeout))?;
        }
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<()> {
        let wrote = self.socket.send_to(buf, addr)?;
        if wrote != buf.len() {
            return Err(RouterError::PartialSend {
                wrote,
                total: buf.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory transports for unit tests.
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct FakeSerialPort {
        pub inbound: VecDeque<u8>,
        pub outbound: Vec<u8>,
    }

    impl SerialPort for FakeSerialPort {
        fn read(&mut self, _timeout: Duration, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.outbound.extend_from_slice(buf);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeUdpTransport {
        pub inbound: VecDeque<(Vec<u8>, SocketAddr)>,
        pub outbound: Vec<(Vec<u8>, SocketAddr)>,
    }

    impl UdpTransport for FakeUdpTransport {
        fn recv_from(
            &mut self,
            _timeout: Duration,
            buf: &mut [u8],
        ) -> io::Result<Option<(usize, SocketAddr)>> {
            match self.inbound.pop_front() {
                Some((bytes, addr)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(Some((n, addr)))
                }
                None => Ok(None),
            }
        }

        fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> Result<()> {
            self.outbound.push((buf.to_vec(), addr));
            Ok(())
        }
    }
}
