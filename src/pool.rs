use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::log_enabled;

use crate::address::MavAddress;

const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// The set of MAVLink addresses seen on a connection, each remembered for a
/// limited time.
///
/// Addresses are learned passively as packets arrive and expire `ttl` after
/// their last sighting, so a connection's accept rules can match "any
/// address we've recently heard from" without growing unboundedly over a
/// long-running process.
pub struct AddressPool {
    ttl: Duration,
    seen: Mutex<HashMap<MavAddress, Instant>>,
}

impl AddressPool {
    pub fn new(ttl: Duration) -> AddressPool {
        AddressPool {
            ttl,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_ttl() -> AddressPool {
        AddressPool::new(DEFAULT_TTL)
    }

    /// Record that `address` was just seen, extending its expiry. Logs at
    /// verbosity level 1 or higher the first time an address is learned.
    pub fn add(&self, address: MavAddress) {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        let is_new = match seen.get(&address) {
            Some(expiry) => *expiry < now,
            None => true,
        };
        seen.insert(address, now + self.ttl);
        if is_new && log_enabled!(log::Level::Info) {
            log::info!("learned new address {}", address);
        }
    }

    /// `true` if `address` was seen within the last `ttl`. An entry found
    /// to have expired is pruned from the map before returning.
    pub fn contains(&self, address: MavAddress) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        match seen.get(&address) {
            Some(expiry) if *expiry >= now => true,
            Some(_) => {
                seen.remove(&address);
                false
            }
            None => false,
        }
    }

    /// The addresses currently within their TTL, in unspecified order.
    /// Expired entries are pruned from the map as a side effect.
    pub fn addresses(&self) -> Vec<MavAddress> {
        let now = Instant::now();
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|_, expiry| *expiry >= now);
        seen.keys().copied().collect()
    }
}
