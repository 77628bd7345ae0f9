use socket2::{Protocol, Type};

use crate::address::Address;
use crate::deadline::Timeout;
use crate::error::Result;

use super::{domain_for, SyncSocket};

/// A non-blocking TCP connection.
///
/// Grounded on sockpuppet's `SocketTcp` (client role) from
/// `original_source/include/sockpuppet/socket.h`: suppress-SIGPIPE applied
/// at construction, `receive` surfaces peer close as
/// [`crate::error::Error::ConnectionClosed`] instead of `Ok(Some(0))`.
pub struct TcpStream {
    pub(crate) inner: SyncSocket,
}

impl TcpStream {
    /// Start a non-blocking connect to `addr`. Completion must be observed
    /// by waiting for writability (see `async_socket::AsyncTcpStream`) or by
    /// a subsequent blocking `send`/`receive` call.
    pub fn connect(addr: Address) -> Result<TcpStream> {
        let inner = SyncSocket::new(domain_for(&addr), Type::STREAM, Protocol::TCP)?;
        inner.set_no_sigpipe()?;
        inner.connect(addr)?;
        Ok(TcpStream { inner })
    }

    pub(crate) fn from_sync_socket(inner: SyncSocket) -> Result<TcpStream> {
        inner.set_no_sigpipe()?;
        Ok(TcpStream { inner })
    }

    pub fn local_addr(&self) -> Result<Address> {
        self.inner.local_addr()
    }

    pub fn peer_addr(&self) -> Result<Address> {
        self.inner.peer_addr()
    }

    pub fn set_nodelay(&self, value: bool) -> Result<()> {
        self.inner.set_nodelay(value)
    }

    /// `None` on timeout. A clean peer close (recv returned 0) is reported
    /// as [`crate::error::Error::ConnectionClosed`] rather than `Some(0)`.
    pub fn receive(&self, buf: &mut [u8], timeout: Timeout) -> Result<Option<usize>> {
        match self.inner.receive(buf, timeout)? {
            Some(0) => Err(crate::error::Error::ConnectionClosed),
            other => Ok(other),
        }
    }

    /// Write the whole buffer, blocking until done (forever timeout) or
    /// until `timeout` elapses, in which case a short count may be
    /// returned.
    pub fn send(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        self.inner.send(buf, timeout)
    }

    /// A single non-blocking best-effort write.
    pub fn send_some(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        self.inner.send_some(buf, timeout)
    }

    pub fn shutdown(&self, how: std::net::Shutdown) -> Result<()> {
        self.inner.shutdown(how)
    }
}

/// A non-blocking TCP listening socket.
pub struct TcpListener {
    pub(crate) inner: SyncSocket,
}

impl TcpListener {
    /// Bind and start listening on `addr`, with `SO_REUSEADDR` set first so
    /// restarting a server doesn't fail on a lingering `TIME_WAIT` socket.
    pub fn bind(addr: Address) -> Result<TcpListener> {
        let inner = SyncSocket::new(domain_for(&addr), Type::STREAM, Protocol::TCP)?;
        inner.set_reuse_address(true)?;
        inner.bind(addr)?;
        inner.listen(1024)?;
        Ok(TcpListener { inner })
    }

    pub fn local_addr(&self) -> Result<Address> {
        self.inner.local_addr()
    }

    /// Accept a connection. `None` on timeout.
    pub fn accept(&self, timeout: Timeout) -> Result<Option<(TcpStream, Address)>> {
        match self.inner.accept(timeout)? {
            Some((socket, addr)) => Ok(Some((TcpStream::from_sync_socket(socket)?, addr))),
            None => Ok(None),
        }
    }
}
