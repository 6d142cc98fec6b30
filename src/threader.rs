use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::interface::Interface;

/// Whether an [`InterfaceThreader`]'s threads begin running as soon as it is
/// constructed, or sit parked until [`InterfaceThreader::start`] is called.
///
/// `DelayStart` exists for interfaces that need further setup after
/// construction but before it's safe to start moving packets (e.g. the
/// initial handshake of a reconnect loop); `Start` is the common case.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StartMode {
    Start,
    DelayStart,
}

struct Gate {
    started: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn wait_until_started(&self, running: &AtomicBool) {
        let mut started = self.started.lock().unwrap();
        while !*started && running.load(Ordering::Acquire) {
            started = self.cv.wait(started).unwrap();
        }
    }

    fn start(&self) {
        *self.started.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

/// Owns the receive and transmit threads for one [`Interface`].
///
/// Both threads share the interface behind a single mutex, mirroring how the
/// underlying transports (one serial port, one socket) are themselves single
/// full-duplex resources. All routing -- what a connection accepts, who else
/// a packet gets fanned out to -- is the interface's and its connections'
/// business; the threader only keeps the two loops alive and bounded by
/// `tick`.
pub struct InterfaceThreader {
    name: String,
    running: Arc<AtomicBool>,
    gate: Arc<Gate>,
    interface: Arc<Mutex<Box<dyn Interface>>>,
    tx: Option<JoinHandle<()>>,
    rx: Option<JoinHandle<()>>,
}

impl InterfaceThreader {
    pub fn new(
        name: impl Into<String>,
        interface: Box<dyn Interface>,
        tick: Duration,
        mode: StartMode,
    ) -> InterfaceThreader {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let gate = Arc::new(Gate {
            started: Mutex::new(mode == StartMode::Start),
            cv: Condvar::new(),
        });
        let interface = Arc::new(Mutex::new(interface));

        let tx = {
            let running = running.clone();
            let gate = gate.clone();
            let interface = interface.clone();
            let name = name.clone();
            thread::Builder::new()
                .name(format!("{}-tx", name))
                .spawn(move || {
                    gate.wait_until_started(&running);
                    while running.load(Ordering::Acquire) {
                        if let Err(err) = interface.lock().unwrap().send_packet(tick) {
                            log::warn!("{}: send failed: {}", name, err);
                        }
                    }
                })
                .expect("failed to spawn interface tx thread")
        };

        let rx = {
            let running = running.clone();
            let gate = gate.clone();
            let interface = interface.clone();
            let name = name.clone();
            thread::Builder::new()
                .name(format!("{}-rx", name))
                .spawn(move || {
                    gate.wait_until_started(&running);
                    while running.load(Ordering::Acquire) {
                        if let Err(err) = interface.lock().unwrap().receive_packet(tick) {
                            log::warn!("{}: receive failed: {}", name, err);
                        }
                    }
                })
                .expect("failed to spawn interface rx thread")
        };

        InterfaceThreader {
            name,
            running,
            gate,
            interface,
            tx: Some(tx),
            rx: Some(rx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release threads constructed with [`StartMode::DelayStart`]. A no-op
    /// if they were already running.
    pub fn start(&self) {
        self.gate.start();
    }

    /// Stop both threads and wait for them to exit. Called automatically on
    /// `drop`.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.gate.start(); // wake a thread still waiting to be started
        self.interface.lock().unwrap().shutdown();
        if let Some(handle) = self.tx.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.rx.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for InterfaceThreader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::MavAddress;
    use crate::connection::Connection;
    use crate::connection_pool::ConnectionPool;
    use crate::filter::AcceptAll;
    use crate::interface::SerialInterface;
    use crate::pool::AddressPool;
    use crate::queue::PriorityQueue;
    use crate::transport::fake::FakeSerialPort;

    fn heartbeat_bytes(source: MavAddress) -> Vec<u8> {
        let mut bytes = vec![0xFEu8, 9, 0, source.system(), source.component(), 0];
        bytes.extend_from_slice(&[0u8; 9]);
        let crc = {
            use crc_any::CRCu16;
            let mut crc = CRCu16::crc16mcrf4cc();
            crc.digest(&bytes[1..]);
            crc.digest(&[50]);
            crc.get_crc()
        };
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    #[test]
    fn rx_thread_dispatches_received_packets_to_the_pool() {
        let mut port = FakeSerialPort::default();
        port.inbound.extend(heartbeat_bytes(MavAddress::new(3, 1)));

        let connection = Arc::new(Connection::new(
            "uart0",
            Arc::new(AcceptAll),
            false,
            AddressPool::with_default_ttl(),
            PriorityQueue::unnotified(),
        ));
        let sink = Arc::new(Connection::new(
            "sink",
            Arc::new(AcceptAll),
            false,
            AddressPool::with_default_ttl(),
            PriorityQueue::unnotified(),
        ));
        // `sink` needs something other than the heartbeat's own source
        // reachable for the broadcast fan-out to have a candidate to
        // accept.
        sink.pool().add(MavAddress::new(250, 1));

        let pool = Arc::new(ConnectionPool::new());
        pool.add(&sink);

        let iface = SerialInterface::new(Box::new(port), connection, pool);

        let mut threader = InterfaceThreader::new(
            "uart0",
            Box::new(iface),
            Duration::from_millis(10),
            StartMode::Start,
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut got = None;
        while std::time::Instant::now() < deadline {
            if let Some(p) = sink.next_packet(Duration::from_millis(50)) {
                got = Some(p);
                break;
            }
        }
        threader.shutdown();
        assert!(got.is_some());
    }

    #[test]
    fn delay_start_does_not_run_until_started() {
        let port = FakeSerialPort::default();
        let connection = Arc::new(Connection::new(
            "uart0",
            Arc::new(AcceptAll),
            false,
            AddressPool::with_default_ttl(),
            PriorityQueue::unnotified(),
        ));
        let pool = Arc::new(ConnectionPool::new());
        let iface = SerialInterface::new(Box::new(port), connection, pool);
        let mut threader = InterfaceThreader::new(
            "uart0",
            Box::new(iface),
            Duration::from_millis(10),
            StartMode::DelayStart,
        );
        threader.start();
        threader.shutdown();
    }
}
