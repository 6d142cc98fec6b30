use std::fmt;
use std::str::FromStr;

use crate::error::RouterError;

/// A 16-bit MAVLink address: an 8-bit system id in the upper byte and an
/// 8-bit component id in the lower byte.
///
/// System 0 means "all systems" and component 0 means "all components of
/// that system"; `MavAddress::new(0, 0)` is therefore the broadcast address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MavAddress(u16);

impl MavAddress {
    /// Construct an address from a raw 16-bit value (system in the high
    /// byte, component in the low byte).
    pub fn from_bits(address: u16) -> MavAddress {
        MavAddress(address)
    }

    /// Construct an address from a system id and component id.
    pub fn new(system: u8, component: u8) -> MavAddress {
        MavAddress(((system as u16) << 8) | component as u16)
    }

    /// The raw 16-bit value.
    pub fn bits(&self) -> u16 {
        self.0
    }

    /// The system id (0-255).
    pub fn system(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// The component id (0-255).
    pub fn component(&self) -> u8 {
        (self.0 & 0x00FF) as u8
    }

    /// `true` if this is the broadcast-to-everyone address `0.0`.
    pub fn is_broadcast(&self) -> bool {
        self.0 == 0
    }

    /// `true` if this address addresses every component of a system
    /// (component id 0, system id non-zero is still a "component
    /// broadcast" within that system; system 0 is the full broadcast).
    pub fn is_component_broadcast(&self) -> bool {
        self.component() == 0
    }
}

impl fmt::Display for MavAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.system(), self.component())
    }
}

impl FromStr for MavAddress {
    type Err = RouterError;

    /// Parse a `"<system>.<component>"` string, e.g. `"16.8"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '.');
        let (sys, comp) = match (parts.next(), parts.next()) {
            (Some(sys), Some(comp)) => (sys, comp),
            _ => {
                return Err(RouterError::OutOfRange(format!(
                    "invalid MAVLink address string: {:?}",
                    s
                )))
            }
        };
        if parts.next().is_some() {
            return Err(RouterError::OutOfRange(format!(
                "invalid MAVLink address string: {:?}",
                s
            )));
        }
        let system: u16 = sys
            .parse()
            .map_err(|_| RouterError::OutOfRange(format!("invalid system id: {:?}", sys)))?;
        let component: u16 = comp
            .parse()
            .map_err(|_| RouterError::OutOfRange(format!("invalid component id: {:?}", comp)))?;
        if system > 255 {
            return Err(RouterError::OutOfRange(format!(
                "system id ({}) is outside of the allowed range (0 - 255)",
                system
            )));
        }
        if component > 255 {
            return Err(RouterError::OutOfRange(format!(
                "component id ({}) is outside of the allowed range (0 - 255)",
                component
            )));
        }
        Ok(MavAddress::new(system as u8, component as u8))
    }
}

/// A MAVLink address together with a 16-bit mask, used to match a whole
/// range of addresses with `contains`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MavSubnet {
    base: MavAddress,
    mask: u16,
}

impl MavSubnet {
    /// Construct a subnet from a base address and a raw 16-bit mask.
    pub fn new(base: MavAddress, mask: u16) -> MavSubnet {
        MavSubnet { base, mask }
    }

    /// `true` iff `(address XOR base) AND mask == 0`.
    pub fn contains(&self, address: MavAddress) -> bool {
        (address.bits() ^ self.base.bits()) & self.mask == 0
    }

    pub fn base(&self) -> MavAddress {
        self.base
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }
}

impl fmt::Display for MavSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}",
            self.base,
            (self.mask >> 8) & 0xFF,
            self.mask & 0xFF
        )
    }
}

impl FromStr for MavSubnet {
    type Err = RouterError;

    /// Parse one of:
    ///  * `"<addr>:<sysmask>.<compmask>"` -- explicit system/component masks.
    ///  * `"<addr>/<n>"` with `n` in `0..=16` -- sets the top `n` bits of the
    ///    mask (i.e. a CIDR-style system+component prefix).
    ///  * `"<addr>\<n>"` with `n` in `0..=8` -- sets the top `n` bits of
    ///    the component octet only.
    ///  * a bare `"<addr>"` -- exact match (mask of `0xFFFF`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(idx) = s.find(':') {
            let (addr, maskstr) = (&s[..idx], &s[idx + 1..]);
            let base: MavAddress = addr.parse()?;
            let mut parts = maskstr.splitn(2, '.');
            let (sysmask, compmask) = match (parts.next(), parts.next()) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(RouterError::OutOfRange(format!(
                        "invalid MAVLink subnet mask: {:?}",
                        maskstr
                    )))
                }
            };
            let sysmask: u16 = sysmask.parse().map_err(|_| {
                RouterError::OutOfRange(format!("invalid system mask: {:?}", sysmask))
            })?;
            let compmask: u16 = compmask.parse().map_err(|_| {
                RouterError::OutOfRange(format!("invalid component mask: {:?}", compmask))
            })?;
            if sysmask > 255 || compmask > 255 {
                return Err(RouterError::OutOfRange(format!(
                    "mask octet out of range in {:?}",
                    s
                )));
            }
            return Ok(MavSubnet::new(base, (sysmask << 8) | compmask));
        }
        if let Some(idx) = s.find('/') {
            let (addr, nstr) = (&s[..idx], &s[idx + 1..]);
            let base: MavAddress = addr.parse()?;
            let n: u32 = nstr
                .parse()
                .map_err(|_| RouterError::OutOfRange(format!("invalid prefix length: {:?}", nstr)))?;
            if n > 16 {
                return Err(RouterError::OutOfRange(format!(
                    "prefix length ({}) is outside of the allowed range (0 - 16)",
                    n
                )));
            }
            let mask: u16 = if n == 0 {
                0
            } else {
                (!0u16) << (16 - n)
            };
            return Ok(MavSubnet::new(base, mask));
        }
        if let Some(idx) = s.find('\\') {
            let (addr, nstr) = (&s[..idx], &s[idx + 1..]);
            let base: MavAddress = addr.parse()?;
            let n: u32 = nstr
                .parse()
                .map_err(|_| RouterError::OutOfRange(format!("invalid prefix length: {:?}", nstr)))?;
            if n > 8 {
                return Err(RouterError::OutOfRange(format!(
                    "prefix length ({}) is outside of the allowed range (0 - 8)",
                    n
                )));
            }
            let mask: u16 = if n == 0 {
                0
            } else {
                ((0xFFu16) << (8 - n)) & 0x00FF
            };
            return Ok(MavSubnet::new(base, mask));
        }
        let base: MavAddress = s.parse()?;
        Ok(MavSubnet::new(base, 0xFFFF))
    }
}
