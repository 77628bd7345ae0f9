//! Crate-wide error type.
//!
//! All fallible operations in this crate return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. A blocking timeout is never an `Error` —
//! it is represented as `Ok(None)` / `Ok(false)` in the return type of the
//! operation that could time out (see [`crate::Timeout`]).

use std::io;

/// The crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Parsing a URI or resolving a host/service pair failed.
    #[error("failed to resolve address {query:?}: {source}")]
    AddressResolution {
        /// The host/service/URI text that failed to resolve.
        query: String,
        /// The underlying resolver error.
        #[source]
        source: io::Error,
    },

    /// An OS socket call returned an error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A TCP peer closed the connection cleanly, or a send hit a
    /// broken-pipe-class error.
    #[error("connection closed")]
    ConnectionClosed,

    /// A [`crate::pool::BufferPool`] has no more capacity to lend a buffer.
    #[error("buffer pool exhausted")]
    ResourceExhausted,

    /// The TLS session reported a fatal error (handshake failure or a
    /// session already torn down).
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(String),

    /// The operation does not apply to the handle's current state (e.g. a
    /// UDP-only operation on a TCP address, or use of a handle after it was
    /// moved-from/closed).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The caller violated an invariant of the API (e.g. supplying a handler
    /// bundle with no handlers set).
    #[error("contract violation: {0}")]
    Contract(&'static str),
}

impl Error {
    /// Build an [`Error::AddressResolution`] from a query string and the
    /// resolver error that rejected it.
    pub fn address_resolution(query: impl Into<String>, source: io::Error) -> Error {
        Error::AddressResolution {
            query: query.into(),
            source,
        }
    }

    /// True if this error corresponds to a peer-initiated close or a broken
    /// pipe, as opposed to a local I/O failure.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
