//! The reactor's self-pipe, used to interrupt a blocked `poll` from another
//! thread.
//!
//! Grounded on sockpuppet's `pipeFrom`/`pipeTo` pair in `DriverPriv`
//! (`original_source/src/driver_priv.cpp`'s `DriverPriv::DriverPriv`,
//! `Bump`, `Unbump`): two UDP sockets bound to loopback, one connected to
//! the other, so "bump" is a one-byte `send` and "drain" is a `recv` that
//! throws away everything queued. A bound loopback UDP pair is used
//! instead of a platform pipe/eventfd so the driver's poll set never needs
//! a platform-specific branch beyond what `wait::wait` already has.

use std::io::{Read, Write};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::Result;
use crate::wait::RawSocket;

pub(super) struct Wakeup {
    recv: Socket,
    send: Socket,
}

impl Wakeup {
    pub(super) fn new() -> Result<Wakeup> {
        let recv = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        recv.set_nonblocking(true)?;
        recv.bind(&SockAddr::from(std::net::SocketAddr::from(([127, 0, 0, 1], 0))))?;
        let recv_addr = recv.local_addr()?;

        let send = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        send.set_nonblocking(true)?;
        send.bind(&SockAddr::from(std::net::SocketAddr::from(([127, 0, 0, 1], 0))))?;
        send.connect(&recv_addr)?;

        Ok(Wakeup { recv, send })
    }

    pub(super) fn raw(&self) -> RawSocket {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            self.recv.as_raw_fd()
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.recv.as_raw_socket()
        }
    }

    /// Wake a thread currently blocked in `poll` on this wakeup's read side.
    pub(super) fn bump(&self) {
        let _ = (&self.send).write(&[1u8]);
    }

    /// Discard everything queued on the read side.
    pub(super) fn drain(&self) {
        let mut buf = [0u8; 256];
        while matches!((&self.recv).read(&mut buf), Ok(n) if n > 0) {}
    }
}
