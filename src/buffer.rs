//! The owned-byte-buffer abstraction accepted by the async send paths.
//!
//! Grounded on sockpuppet's `BufferPtr` (`original_source/include/socket_buffered.h`,
//! aliased to `std::unique_ptr<SocketBuffer>`): the async send queue only
//! needs to borrow the bytes back out of whatever the caller handed it, and
//! to hold on to the allocation until the reactor thread is done with it.
//! A plain `Vec<u8>` and a pool [`crate::pool::BorrowedBuffer`] both satisfy
//! that, so callers aren't forced to go through a buffer pool just to call
//! `send`.

use crate::pool::BorrowedBuffer;

/// An owned, `'static` byte buffer that can sit in an async send queue
/// until the reactor drains it.
pub trait SendBuffer: Send + 'static {
    fn as_bytes(&self) -> &[u8];
}

impl SendBuffer for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

impl SendBuffer for BorrowedBuffer {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

impl SendBuffer for Box<[u8]> {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}
