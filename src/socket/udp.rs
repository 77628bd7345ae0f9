use std::net::{Ipv4Addr, Ipv6Addr};

use socket2::{Protocol, Type};

use crate::address::Address;
use crate::deadline::Timeout;
use crate::error::Result;

use super::{domain_for, SyncSocket};

/// A connectionless UDP socket with timeout-parameterized send/receive.
///
/// Grounded on sockpuppet's `SocketUdp`
/// (`original_source/include/sockpuppet/socket.h`): bind at construction,
/// broadcast enabled by default for LAN convenience, `send_to`/`receive_from`
/// as the primary operations with `connect`/`send`/`receive` available once
/// a peer has been fixed.
pub struct UdpSocket {
    pub(crate) inner: SyncSocket,
}

impl UdpSocket {
    /// Bind a UDP socket to `addr` (use port `0` for an OS-assigned port).
    pub fn bind(addr: Address) -> Result<UdpSocket> {
        let inner = SyncSocket::new(domain_for(&addr), Type::DGRAM, Protocol::UDP)?;
        inner.set_broadcast(true)?;
        inner.bind(addr)?;
        Ok(UdpSocket { inner })
    }

    /// Fix the default peer for `send`/`receive`.
    pub fn connect(&self, addr: Address) -> Result<()> {
        self.inner.connect(addr)
    }

    pub fn local_addr(&self) -> Result<Address> {
        self.inner.local_addr()
    }

    pub fn peer_addr(&self) -> Result<Address> {
        self.inner.peer_addr()
    }

    /// Receive from the connected peer. `None` on timeout.
    pub fn receive(&self, buf: &mut [u8], timeout: Timeout) -> Result<Option<usize>> {
        self.inner.receive(buf, timeout)
    }

    /// Receive a single datagram from any source. `None` on timeout.
    pub fn receive_from(&self, buf: &mut [u8], timeout: Timeout) -> Result<Option<(usize, Address)>> {
        self.inner.receive_from(buf, timeout)
    }

    /// Send the whole buffer as one datagram to the connected peer.
    pub fn send(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        self.inner.send_connected(buf, timeout)
    }

    /// Send the whole buffer as one datagram to `dst`.
    pub fn send_to(&self, buf: &[u8], dst: Address, timeout: Timeout) -> Result<usize> {
        self.inner.send_to(buf, dst, timeout)
    }

    pub fn join_multicast_v4(&self, multiaddr: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        self.inner.join_multicast_v4(multiaddr, interface)
    }

    pub fn leave_multicast_v4(&self, multiaddr: Ipv4Addr, interface: Ipv4Addr) -> Result<()> {
        self.inner.leave_multicast_v4(multiaddr, interface)
    }

    pub fn join_multicast_v6(&self, multiaddr: Ipv6Addr, interface: u32) -> Result<()> {
        self.inner.join_multicast_v6(multiaddr, interface)
    }

    pub fn leave_multicast_v6(&self, multiaddr: Ipv6Addr, interface: u32) -> Result<()> {
        self.inner.leave_multicast_v6(multiaddr, interface)
    }

    pub(crate) fn recv_buffer_size(&self) -> Result<usize> {
        self.inner.recv_buffer_size()
    }
}
