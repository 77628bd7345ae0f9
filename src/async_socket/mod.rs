//! Reactor-driven sockets: a send queue plus a handler bundle, registered
//! with a [`crate::driver::Driver`] on construction.
//!
//! Grounded on sockpuppet's `SocketAsyncPriv`
//! (`original_source/src/socket_async_priv.h`, `.cpp`): exactly one of a
//! stream-shaped or datagram-shaped send queue is active per socket, the
//! submitter appends under a short-lived lock and only pokes the driver
//! when the queue transitions from empty to non-empty, and the reactor
//! drains one queue head per `on_writable` call rather than looping the
//! whole queue, so a single slow socket can't starve the others' turn in
//! the driver's round-robin (`crate::driver`'s one-event-per-step rule).

mod tcp;
mod udp;

pub use tcp::{AsyncTcpListener, AsyncTcpStream};
pub use udp::AsyncUdpSocket;

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::address::Address;
use crate::buffer::SendBuffer;
use crate::completion::{Promise, SendFuture};
use crate::error::Result;

struct StreamEntry {
    buf: Box<dyn SendBuffer>,
    sent: usize,
    promise: Promise,
}

/// The stream-shaped send queue used by [`AsyncTcpStream`]: entries are
/// `(buffer, bytes already sent)`, drained in FIFO order.
#[derive(Default)]
pub(crate) struct StreamQueue {
    entries: Mutex<VecDeque<StreamEntry>>,
}

impl StreamQueue {
    pub(crate) fn new() -> StreamQueue {
        StreamQueue::default()
    }

    /// Enqueue a buffer, returning whether the queue was empty beforehand
    /// (the caller should call `Driver::want_send` exactly when this is
    /// true) plus the future the submitter gets back.
    pub(crate) fn push(&self, buf: Box<dyn SendBuffer>) -> (bool, SendFuture) {
        let (promise, future) = SendFuture::pair();
        let mut entries = self.entries.lock().unwrap();
        let was_empty = entries.is_empty();
        entries.push_back(StreamEntry {
            buf,
            sent: 0,
            promise,
        });
        (was_empty, future)
    }

    /// One non-blocking send attempt against the queue head. `send_some`
    /// mirrors `SyncSocket::send_some`'s contract: `Ok(0)` means it would
    /// have blocked. Returns true once the queue is empty.
    pub(crate) fn drain_one_with(&self, send_some: impl FnOnce(&[u8]) -> Result<usize>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.front_mut() else {
            return true;
        };

        match send_some(&entry.buf.as_bytes()[entry.sent..]) {
            Ok(0) => {}
            Ok(n) => {
                entry.sent += n;
                if entry.sent >= entry.buf.as_bytes().len() {
                    let entry = entries.pop_front().unwrap();
                    entry.promise.resolve(Ok(()));
                }
            }
            Err(e) => {
                let entry = entries.pop_front().unwrap();
                entry.promise.resolve(Err(e));
            }
        }
        entries.is_empty()
    }
}

struct DatagramEntry {
    buf: Box<dyn SendBuffer>,
    dst: Address,
    promise: Promise,
}

/// The datagram-shaped send queue used by [`AsyncUdpSocket`]. UDP sends
/// are all-or-nothing, so there is no partial-send bookkeeping.
#[derive(Default)]
pub(crate) struct DatagramQueue {
    entries: Mutex<VecDeque<DatagramEntry>>,
}

impl DatagramQueue {
    pub(crate) fn new() -> DatagramQueue {
        DatagramQueue::default()
    }

    pub(crate) fn push(&self, buf: Box<dyn SendBuffer>, dst: Address) -> (bool, SendFuture) {
        let (promise, future) = SendFuture::pair();
        let mut entries = self.entries.lock().unwrap();
        let was_empty = entries.is_empty();
        entries.push_back(DatagramEntry { buf, dst, promise });
        (was_empty, future)
    }

    /// `send` should behave like `SyncSocket::send_to` under a zero
    /// timeout: `Ok(n) where n == buf.len()` on success, `Ok(0)` on
    /// would-block, `Err` otherwise.
    pub(crate) fn drain_one_with(&self, send: impl FnOnce(&[u8], Address) -> Result<usize>) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.front() else {
            return true;
        };
        let bytes = entry.buf.as_bytes();
        let len = bytes.len();

        match send(bytes, entry.dst) {
            Ok(n) if n == len => {
                let entry = entries.pop_front().unwrap();
                entry.promise.resolve(Ok(()));
            }
            Ok(_) => {}
            Err(e) => {
                let entry = entries.pop_front().unwrap();
                entry.promise.resolve(Err(e));
            }
        }
        entries.is_empty()
    }
}
