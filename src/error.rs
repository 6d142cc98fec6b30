use std::io;

use thiserror::Error;

/// Errors produced anywhere in the routing fabric, its transports, or its
/// configuration loader.
#[derive(Error, Debug)]
pub enum RouterError {
    /// An `Option`-shaped constructor argument that should have been
    /// `Some(..)` was `None`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An address, port, or mask was outside of its allowed numeric range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A transport write only completed part of the packet.
    #[error("partial send: wrote {wrote} of {total} bytes")]
    PartialSend { wrote: usize, total: usize },

    /// A syscall on a transport failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Hostname resolution failed while starting a UDP interface.
    #[error("DNS lookup failed for {0}")]
    DnsLookupFailed(String),

    /// The configuration file failed to parse or referenced an unreachable
    /// chain.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
