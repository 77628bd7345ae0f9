use std::sync::Arc;

use crate::address::Address;
use crate::buffer::SendBuffer;
use crate::completion::SendFuture;
use crate::deadline::Timeout;
use crate::driver::{Driver, Registered};
use crate::error::Result;
use crate::pool::{BorrowedBuffer, BufferPool};
use crate::socket::{BufferedUdpSocket, UdpSocket};
use crate::wait::RawSocket;

use super::DatagramQueue;

/// Which shape of receive callback this socket was constructed with. A
/// connected UDP socket only ever sees its peer, so `Receive` skips
/// reporting a sender address back per datagram the way `receive_from`
/// does, matching the two-method split on `BufferedUdpSocket` itself.
enum Handler {
    Receive(Box<dyn Fn(BorrowedBuffer) + Send + Sync>),
    ReceiveFrom(Box<dyn Fn(BorrowedBuffer, Address) + Send + Sync>),
}

struct Inner {
    sock: UdpSocket,
    raw: RawSocket,
    driver: Driver,
    rx_pool: BufferPool,
    queue: DatagramQueue,
    handler: Handler,
}

impl Registered for Inner {
    fn raw(&self) -> RawSocket {
        self.raw
    }

    fn on_readable(&self) {
        let mut buf = match self.rx_pool.get() {
            Ok(buf) => buf,
            Err(_err) => {
                #[cfg(feature = "log")]
                log::warn!("receive pool exhausted, dropping a readable event");
                return;
            }
        };
        match &self.handler {
            Handler::Receive(on_receive) => match self.sock.receive(&mut buf, Timeout::Poll) {
                Ok(Some(n)) => {
                    buf.truncate(n);
                    on_receive(buf);
                }
                Ok(None) => {}
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("udp receive failed: {_err}");
                }
            },
            Handler::ReceiveFrom(on_receive_from) => match self.sock.receive_from(&mut buf, Timeout::Poll) {
                Ok(Some((n, from))) => {
                    buf.truncate(n);
                    on_receive_from(buf, from);
                }
                Ok(None) => {}
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("udp receive failed: {_err}");
                }
            },
        }
    }

    fn on_writable(&self) -> bool {
        self.queue.drain_one_with(|bytes, dst| self.sock.send_to(bytes, dst, Timeout::Poll))
    }

    fn on_error(&self) {
        // UDP carries no connection to tear down; a POLLERR here is
        // transient (e.g. a stale ICMP port-unreachable) and self-clears.
        #[cfg(feature = "log")]
        log::warn!("datagram socket reported an error");
    }
}

/// A UDP socket driven by a [`Driver`].
///
/// Grounded on sockpuppet's `SocketUdpAsync`
/// (`original_source/include/sockpuppet/socket_async.h`): built from an
/// already-bound [`BufferedUdpSocket`], reusing its receive pool. Two
/// constructors mirror the sync API's `receive`/`receive_from` split —
/// [`AsyncUdpSocket::new`] for a connected socket that only hears from one
/// peer, [`AsyncUdpSocket::new_unconnected`] for one that reports the
/// sender of each datagram.
pub struct AsyncUdpSocket {
    inner: Arc<Inner>,
}

impl AsyncUdpSocket {
    /// For a connected socket: `on_receive` fires with each datagram's
    /// payload, sender address omitted because it is always the same peer.
    pub fn new(
        socket: BufferedUdpSocket,
        driver: Driver,
        on_receive: impl Fn(BorrowedBuffer) + Send + Sync + 'static,
    ) -> Result<AsyncUdpSocket> {
        Self::build(socket, driver, Handler::Receive(Box::new(on_receive)))
    }

    /// For an unconnected socket: `on_receive_from` fires with each
    /// datagram's payload and the address it arrived from.
    pub fn new_unconnected(
        socket: BufferedUdpSocket,
        driver: Driver,
        on_receive_from: impl Fn(BorrowedBuffer, Address) + Send + Sync + 'static,
    ) -> Result<AsyncUdpSocket> {
        Self::build(socket, driver, Handler::ReceiveFrom(Box::new(on_receive_from)))
    }

    fn build(socket: BufferedUdpSocket, driver: Driver, handler: Handler) -> Result<AsyncUdpSocket> {
        let (sock, rx_pool) = socket.into_parts();
        let raw = sock.inner.raw();

        let inner = Arc::new(Inner {
            sock,
            raw,
            driver: driver.clone(),
            rx_pool,
            queue: DatagramQueue::new(),
            handler,
        });
        driver.attach(inner.clone());
        Ok(AsyncUdpSocket { inner })
    }

    /// Send a connected socket's payload to its peer.
    pub fn send(&self, buf: impl SendBuffer) -> Result<SendFuture> {
        let dst = self.inner.sock.peer_addr()?;
        Ok(self.queue(buf, dst))
    }

    /// Enqueue `buf` for delivery to `dst`; resolves once sent or on error.
    /// Datagrams queued on the same socket complete in submission order,
    /// but (unlike TCP) each one is sent whole or not at all.
    pub fn send_to(&self, buf: impl SendBuffer, dst: Address) -> SendFuture {
        self.queue(buf, dst)
    }

    fn queue(&self, buf: impl SendBuffer, dst: Address) -> SendFuture {
        let (was_empty, future) = self.inner.queue.push(Box::new(buf), dst);
        if was_empty {
            self.inner.driver.want_send(self.inner.raw);
        }
        future
    }

    pub fn local_addr(&self) -> Result<Address> {
        self.inner.sock.local_addr()
    }
}

impl Drop for AsyncUdpSocket {
    fn drop(&mut self) {
        self.inner.driver.detach(self.inner.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn unconnected_socket_reports_sender_and_completes_send() {
        let driver = Driver::new().unwrap();

        let a = UdpSocket::bind(Address::from_port(0)).unwrap();
        let a_addr = a.local_addr().unwrap();
        let a_buffered = BufferedUdpSocket::new(a, 4, 1024).unwrap();

        let (tx, rx) = mpsc::channel();
        let async_a = AsyncUdpSocket::new_unconnected(a_buffered, driver.clone(), move |buf, from| {
            tx.send((buf.to_vec(), from)).unwrap();
        })
        .unwrap();

        let b = UdpSocket::bind(Address::from_port(0)).unwrap();
        let b_addr = b.local_addr().unwrap();
        let b_buffered = BufferedUdpSocket::new(b, 4, 1024).unwrap();
        let async_b = AsyncUdpSocket::new_unconnected(b_buffered, driver.clone(), |_buf, _from| {}).unwrap();

        let send = async_b.send_to(b"ping".to_vec(), a_addr);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            driver.step(Timeout::Limited(Duration::from_millis(50))).unwrap();
            if let Ok((payload, from)) = rx.try_recv() {
                assert_eq!(payload, b"ping");
                assert_eq!(from, b_addr);
                send.wait(Timeout::Limited(Duration::from_secs(1))).expect("send did not complete").unwrap();
                return;
            }
        }
        panic!("datagram never arrived");
    }
}
