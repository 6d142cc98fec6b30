//! Routing and firewalling fabric for MAVLink traffic between serial and UDP
//! endpoints.
//!
//! The pieces compose roughly bottom-up: [`address`] and [`ip`] are the two
//! address families in play; [`packet`] is what flows between connections;
//! [`codec`] turns transport bytes into packets and back; [`filter`]
//! (configured from [`config`]) decides whether a connection will accept a
//! given packet; [`connection`] pairs a filter with an address pool and a
//! priority queue; [`connection_pool`] and [`connection_factory`] manage
//! collections of connections; [`transport`] and [`interface`] are the wire
//! level; and [`threader`] ties an interface's receive/transmit threads to a
//! connection and a pool.

pub mod address;
pub mod codec;
pub mod config;
pub mod connection;
pub mod connection_factory;
pub mod connection_pool;
pub mod error;
pub mod filter;
pub mod interface;
pub mod ip;
pub mod logging;
pub mod packet;
pub mod pool;
pub mod queue;
pub mod semaphore;
pub mod threader;
pub mod transport;
