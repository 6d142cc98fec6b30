//! Thin wrapper around [`env_logger`] that turns the CLI's repeated `-v`
//! flag into a `log::LevelFilter`.
//!
//! The router only ever logs at two levels above the default: `info` when a
//! new MAVLink address is learned on a connection (see
//! [`AddressPool::add`](crate::pool::AddressPool::add)) and `debug` when a
//! packet is dispatched through the connection pool (see
//! [`ConnectionPool::send`](crate::connection_pool::ConnectionPool::send)).
//! `warn` and `error` (transport failures, dropped connections) are always
//! enabled.

use log::LevelFilter;

/// Initialize the global logger. `verbosity` is the number of times `-v` was
/// given on the command line:
///
///  * 0 -- warnings and errors only
///  * 1 -- also informational messages (new addresses learned)
///  * 2 -- also debug messages (per-packet dispatch)
///  * 3+ -- trace
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}
