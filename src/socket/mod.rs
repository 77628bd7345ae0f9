//! Blocking/timed sockets shared by the UDP and TCP front ends.
//!
//! Grounded on sockpuppet's `Socket::SocketPriv`
//! (`original_source/src/socket_priv.h`, `original_source/src/socket_priv.cpp`):
//! one non-blocking OS socket underneath, with timeout-aware `receive`/`send`
//! built on top of a single-descriptor poll. Socket creation and option
//! setting follows the non-blocking-by-default, `socket2`-backed style of
//! `legacy/src/net/tcp/stream.rs`, generalized from TCP-only to both
//! address families.

mod buffered;
mod tcp;
mod udp;

pub use buffered::{BufferedTcpStream, BufferedUdpSocket};
pub use tcp::{TcpListener, TcpStream};
pub use udp::UdpSocket;

use std::io::{self, Read, Write};
use std::net::Shutdown;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::address::Address;
use crate::deadline::{Deadline, Timeout};
use crate::error::{Error, Result};
use crate::wait;

/// A non-blocking OS socket with timeout-parameterized send/receive, shared
/// by [`UdpSocket`], [`TcpStream`] and [`TcpListener`].
pub(crate) struct SyncSocket {
    socket: Socket,
}

impl SyncSocket {
    pub(crate) fn new(domain: Domain, ty: Type, protocol: Protocol) -> Result<SyncSocket> {
        let socket = Socket::new(domain, ty, Some(protocol))?;
        socket.set_nonblocking(true)?;
        Ok(SyncSocket { socket })
    }

    pub(crate) fn from_socket2(socket: Socket) -> Result<SyncSocket> {
        socket.set_nonblocking(true)?;
        Ok(SyncSocket { socket })
    }

    pub(crate) fn bind(&self, addr: Address) -> Result<()> {
        self.socket.bind(&SockAddr::from(addr.socket_addr()))?;
        Ok(())
    }

    /// Non-blocking connect. For TCP this starts the handshake; completion
    /// is observed by waiting for writability (see `async_socket`).
    pub(crate) fn connect(&self, addr: Address) -> Result<()> {
        match self.socket.connect(&SockAddr::from(addr.socket_addr())) {
            Ok(()) => Ok(()),
            Err(e) if is_in_progress(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn listen(&self, backlog: i32) -> Result<()> {
        self.socket.listen(backlog)?;
        Ok(())
    }

    pub(crate) fn local_addr(&self) -> Result<Address> {
        Ok(Address::from(
            self.socket
                .local_addr()?
                .as_socket()
                .ok_or_else(|| Error::InvalidState("not an IP socket"))?,
        ))
    }

    pub(crate) fn peer_addr(&self) -> Result<Address> {
        Ok(Address::from(
            self.socket
                .peer_addr()?
                .as_socket()
                .ok_or_else(|| Error::InvalidState("not an IP socket"))?,
        ))
    }

    pub(crate) fn set_reuse_address(&self, value: bool) -> Result<()> {
        self.socket.set_reuse_address(value)?;
        Ok(())
    }

    pub(crate) fn set_broadcast(&self, value: bool) -> Result<()> {
        self.socket.set_broadcast(value)?;
        Ok(())
    }

    pub(crate) fn set_nodelay(&self, value: bool) -> Result<()> {
        self.socket.set_nodelay(value)?;
        Ok(())
    }

    /// Suppress `SIGPIPE`-class termination on send to a closed peer:
    /// `SO_NOSIGPIPE` on BSD/macOS, a no-op everywhere else (Linux callers
    /// pass `MSG_NOSIGNAL` per-call instead, Windows has no such signal).
    pub(crate) fn set_no_sigpipe(&self) -> Result<()> {
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        {
            self.socket.set_nosigpipe(true)?;
        }
        Ok(())
    }

    pub(crate) fn recv_buffer_size(&self) -> Result<usize> {
        Ok(self.socket.recv_buffer_size()?)
    }

    pub(crate) fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.socket.shutdown(how)?;
        Ok(())
    }

    pub(crate) fn raw(&self) -> wait::RawSocket {
        raw_of(&self.socket)
    }

    /// Block until readable, then read once. `None` on timeout; `Some(0)`
    /// means the peer closed the connection (TCP).
    pub(crate) fn receive(&self, buf: &mut [u8], timeout: Timeout) -> Result<Option<usize>> {
        if !self.wait_for(wait::Interest::READABLE, timeout)? {
            return Ok(None);
        }
        match (&self.socket).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn receive_from(
        &self,
        buf: &mut [u8],
        timeout: Timeout,
    ) -> Result<Option<(usize, Address)>> {
        if !self.wait_for(wait::Interest::READABLE, timeout)? {
            return Ok(None);
        }
        match self.socket.recv_from(as_uninit(buf)) {
            Ok((n, from)) => {
                let addr = from
                    .as_socket()
                    .ok_or_else(|| Error::InvalidState("not an IP socket"))?;
                Ok(Some((n, Address::from(addr))))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A single best-effort non-blocking write: wait writable once, issue
    /// exactly one `send`.
    pub(crate) fn send_some(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        if !self.wait_for(wait::Interest::WRITABLE, timeout)? {
            return Ok(0);
        }
        match (&self.socket).write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if is_broken_pipe(&e) => Err(Error::ConnectionClosed),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the whole buffer, looping `send_some` until it is exhausted or
    /// `timeout` elapses. A forever timeout blocks until every byte lands.
    pub(crate) fn send(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        let mut deadline = timeout.to_deadline();
        let mut sent = 0usize;
        while sent < buf.len() {
            let step = self.send_some(&buf[sent..], deadline.as_timeout())?;
            sent += step;
            if step == 0 {
                deadline.tick();
                if !deadline.time_left() {
                    break;
                }
            }
        }
        Ok(sent)
    }

    /// Send the whole buffer to whatever peer `connect` fixed, i.e. UDP's
    /// `send` rather than `send_to`.
    pub(crate) fn send_connected(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        if !self.wait_for(wait::Interest::WRITABLE, timeout)? {
            return Ok(0);
        }
        Ok((&self.socket).write(buf)?)
    }

    pub(crate) fn send_to(&self, buf: &[u8], dst: Address, timeout: Timeout) -> Result<usize> {
        if !self.wait_for(wait::Interest::WRITABLE, timeout)? {
            return Ok(0);
        }
        let sent = self
            .socket
            .send_to(buf, &SockAddr::from(dst.socket_addr()))?;
        if sent != buf.len() {
            return Err(Error::InvalidState("partial UDP datagram send"));
        }
        Ok(sent)
    }

    pub(crate) fn accept(&self, timeout: Timeout) -> Result<Option<(SyncSocket, Address)>> {
        if !self.wait_for(wait::Interest::READABLE, timeout)? {
            return Ok(None);
        }
        match self.socket.accept() {
            Ok((socket, addr)) => {
                let addr = addr
                    .as_socket()
                    .ok_or_else(|| Error::InvalidState("not an IP socket"))?;
                Ok(Some((SyncSocket::from_socket2(socket)?, Address::from(addr))))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_for(&self, interest: wait::Interest, timeout: Timeout) -> Result<bool> {
        if interest.readable {
            Ok(wait::wait_readable(self.raw(), timeout)?)
        } else {
            Ok(wait::wait_writable(self.raw(), timeout)?)
        }
    }

    /// A single non-blocking read attempt with no wait at all: used by the
    /// TLS adapter, which already knows (from the driver's poll) that the
    /// fd is readable and just wants to pump raw ciphertext.
    pub(crate) fn try_read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        match (&self.socket).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// A single non-blocking write attempt with no wait at all; see
    /// [`SyncSocket::try_read`].
    pub(crate) fn try_write(&self, buf: &[u8]) -> Result<Option<usize>> {
        match (&self.socket).write(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if is_broken_pipe(&e) => Err(Error::ConnectionClosed),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn poll_readable(&self, timeout: Timeout) -> Result<bool> {
        self.wait_for(wait::Interest::READABLE, timeout)
    }

    pub(crate) fn poll_writable(&self, timeout: Timeout) -> Result<bool> {
        self.wait_for(wait::Interest::WRITABLE, timeout)
    }

    pub(crate) fn try_clone(&self) -> Result<SyncSocket> {
        Ok(SyncSocket {
            socket: self.socket.try_clone()?,
        })
    }

    pub(crate) fn join_multicast_v4(
        &self,
        multiaddr: std::net::Ipv4Addr,
        interface: std::net::Ipv4Addr,
    ) -> Result<()> {
        self.socket.join_multicast_v4(&multiaddr, &interface)?;
        Ok(())
    }

    pub(crate) fn leave_multicast_v4(
        &self,
        multiaddr: std::net::Ipv4Addr,
        interface: std::net::Ipv4Addr,
    ) -> Result<()> {
        self.socket.leave_multicast_v4(&multiaddr, &interface)?;
        Ok(())
    }

    pub(crate) fn join_multicast_v6(&self, multiaddr: std::net::Ipv6Addr, interface: u32) -> Result<()> {
        self.socket.join_multicast_v6(&multiaddr, interface)?;
        Ok(())
    }

    pub(crate) fn leave_multicast_v6(&self, multiaddr: std::net::Ipv6Addr, interface: u32) -> Result<()> {
        self.socket.leave_multicast_v6(&multiaddr, interface)?;
        Ok(())
    }
}

fn as_uninit(buf: &mut [u8]) -> &mut [std::mem::MaybeUninit<u8>] {
    // Safety: `u8` has no invalid bit patterns, so reinterpreting an
    // initialized `&mut [u8]` as `&mut [MaybeUninit<u8>]` is sound; this
    // only widens what the compiler assumes about the slice's contents.
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast(), buf.len()) }
}

fn is_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(windows)]
    {
        e.kind() == io::ErrorKind::WouldBlock
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::BrokenPipe
}

#[cfg(unix)]
fn raw_of(socket: &Socket) -> wait::RawSocket {
    use std::os::unix::io::AsRawFd;
    socket.as_raw_fd()
}

#[cfg(windows)]
fn raw_of(socket: &Socket) -> wait::RawSocket {
    use std::os::windows::io::AsRawSocket;
    socket.as_raw_socket()
}

pub(crate) fn domain_for(addr: &Address) -> Domain {
    if addr.is_v6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    }
}
