//! Pool-backed receive wrappers.
//!
//! Grounded on sockpuppet's `SocketBufferedPriv`/`SocketUdpBuffered`/
//! `SocketTcpBuffered` (`original_source/src/socket_buffered_priv.h`,
//! `original_source/include/sockpuppet/socket_buffered.h`): a receive pool
//! sized once at construction (defaulting to the socket's `SO_RCVBUF` when
//! the caller doesn't specify one) backs every `receive` call so repeated
//! reads don't reallocate.

use crate::address::Address;
use crate::deadline::Timeout;
use crate::error::Result;
use crate::pool::{BorrowedBuffer, BufferPool};

use super::{TcpStream, UdpSocket};

fn effective_rx_size(requested: usize, fallback: Result<usize>) -> Result<usize> {
    if requested != 0 {
        Ok(requested)
    } else {
        fallback
    }
}

/// A [`UdpSocket`] plus a pool of pre-sized receive buffers.
pub struct BufferedUdpSocket {
    socket: UdpSocket,
    pool: BufferPool,
}

impl BufferedUdpSocket {
    /// `rx_buf_size == 0` defaults to the socket's `SO_RCVBUF`.
    pub fn new(socket: UdpSocket, pool_size: usize, rx_buf_size: usize) -> Result<BufferedUdpSocket> {
        let rx_buf_size = effective_rx_size(rx_buf_size, socket.recv_buffer_size())?;
        Ok(BufferedUdpSocket {
            socket,
            pool: BufferPool::new(pool_size, rx_buf_size),
        })
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Split this buffered socket back into its socket and receive pool,
    /// so an async wrapper can keep using the same pool rather than
    /// allocating a second one.
    pub(crate) fn into_parts(self) -> (UdpSocket, BufferPool) {
        (self.socket, self.pool)
    }

    pub fn receive(&self, timeout: Timeout) -> Result<Option<BorrowedBuffer>> {
        let mut buf = self.pool.get()?;
        match self.socket.receive(&mut buf, timeout)? {
            Some(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    pub fn receive_from(&self, timeout: Timeout) -> Result<Option<(BorrowedBuffer, Address)>> {
        let mut buf = self.pool.get()?;
        match self.socket.receive_from(&mut buf, timeout)? {
            Some((n, from)) => {
                buf.truncate(n);
                Ok(Some((buf, from)))
            }
            None => Ok(None),
        }
    }

    pub fn send(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        self.socket.send(buf, timeout)
    }

    pub fn send_to(&self, buf: &[u8], dst: Address, timeout: Timeout) -> Result<usize> {
        self.socket.send_to(buf, dst, timeout)
    }
}

/// A [`TcpStream`] plus a pool of pre-sized receive buffers.
pub struct BufferedTcpStream {
    stream: TcpStream,
    pool: BufferPool,
}

impl BufferedTcpStream {
    /// `rx_buf_size == 0` defaults to the socket's `SO_RCVBUF`.
    pub fn new(stream: TcpStream, pool_size: usize, rx_buf_size: usize) -> Result<BufferedTcpStream> {
        let rx_buf_size = effective_rx_size(rx_buf_size, stream.inner.recv_buffer_size())?;
        Ok(BufferedTcpStream {
            stream,
            pool: BufferPool::new(pool_size, rx_buf_size),
        })
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Split this buffered stream back into its socket and receive pool,
    /// so an async wrapper can keep using the same pool rather than
    /// allocating a second one.
    pub(crate) fn into_parts(self) -> (TcpStream, BufferPool) {
        (self.stream, self.pool)
    }

    pub fn receive(&self, timeout: Timeout) -> Result<Option<BorrowedBuffer>> {
        let mut buf = self.pool.get()?;
        match self.stream.receive(&mut buf, timeout)? {
            Some(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            None => Ok(None),
        }
    }

    pub fn send(&self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        self.stream.send(buf, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use std::time::Duration;

    #[test]
    fn buffered_udp_round_trip() {
        let a = UdpSocket::bind(Address::from_port(0)).unwrap();
        let b = UdpSocket::bind(Address::from_port(0)).unwrap();
        let a_addr = a.local_addr().unwrap();

        let buffered_b = BufferedUdpSocket::new(b, 4, 256).unwrap();
        buffered_b.send_to(b"hello", a_addr, Timeout::Limited(Duration::from_secs(1))).unwrap();

        let mut rx = [0u8; 256];
        let n = a
            .receive_from(&mut rx, Timeout::Limited(Duration::from_secs(1)))
            .unwrap()
            .unwrap()
            .0;
        assert_eq!(&rx[..n], b"hello");
    }
}
