use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::RouterError;

/// A 32-bit IPv4 address plus a 16-bit port number.
///
/// A port of 0 means "unspecified". Ordering compares the address first,
/// then the port.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpEndpoint {
    address: Ipv4Addr,
    port: u16,
}

impl IpEndpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> IpEndpoint {
        IpEndpoint { address, port }
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `true` if the port is unspecified (0).
    pub fn has_port(&self) -> bool {
        self.port != 0
    }
}

impl From<std::net::SocketAddrV4> for IpEndpoint {
    fn from(addr: std::net::SocketAddrV4) -> Self {
        IpEndpoint::new(*addr.ip(), addr.port())
    }
}

impl fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_port() {
            write!(f, "{}:{}", self.address, self.port)
        } else {
            write!(f, "{}", self.address)
        }
    }
}

impl FromStr for IpEndpoint {
    type Err = RouterError;

    /// Parse `"a.b.c.d"` or `"a.b.c.d:port"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(idx) = s.rfind(':') {
            let (addr, portstr) = (&s[..idx], &s[idx + 1..]);
            let address: Ipv4Addr = addr
                .parse()
                .map_err(|_| RouterError::OutOfRange(format!("invalid IPv4 address: {:?}", addr)))?;
            let port: u16 = portstr
                .parse()
                .map_err(|_| RouterError::OutOfRange(format!("invalid port number: {:?}", portstr)))?;
            return Ok(IpEndpoint::new(address, port));
        }
        let address: Ipv4Addr = s
            .parse()
            .map_err(|_| RouterError::OutOfRange(format!("invalid IPv4 address: {:?}", s)))?;
        Ok(IpEndpoint::new(address, 0))
    }
}
