//! Recyclable byte-vector allocator.
//!
//! Grounded on sockpuppet's `ResourcePool<Resource>`
//! (`original_source/include/resource_pool.h`): an idle stack and a busy set
//! behind one mutex, a `Get` that allocates lazily up to a capacity, and a
//! `Return` that moves a resource back from busy to idle when its handle
//! drops. The off-by-one in the original's `m_maxSize = maxSize - 1` is
//! deliberately not reproduced here; capacity 0 means unbounded and the
//! bound is `|busy| < capacity`.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

struct Inner {
    max_size: usize,
    rx_buf_size: usize,
    idle: Vec<Vec<u8>>,
    busy_count: usize,
}

/// A pool of recyclable `Vec<u8>` receive/send buffers.
///
/// Buffers are obtained with [`BufferPool::get`] and returned automatically
/// when the returned [`BorrowedBuffer`] drops. A pool with `max_size == 0` is
/// unbounded; otherwise `get` fails with [`Error::ResourceExhausted`] once
/// `max_size` buffers are outstanding at once.
pub struct BufferPool {
    inner: Arc<Mutex<Inner>>,
}

impl BufferPool {
    /// Create a pool whose buffers are sized `rx_buf_size` bytes, with at
    /// most `max_size` outstanding at once (`0` = unbounded).
    pub fn new(max_size: usize, rx_buf_size: usize) -> BufferPool {
        BufferPool {
            inner: Arc::new(Mutex::new(Inner {
                max_size,
                rx_buf_size,
                idle: Vec::new(),
                busy_count: 0,
            })),
        }
    }

    /// The configured per-buffer size new allocations are sized to.
    pub fn buffer_size(&self) -> usize {
        self.inner.lock().unwrap().rx_buf_size
    }

    /// Borrow an idle buffer, allocating a new one if the pool has capacity
    /// remaining, or fail with [`Error::ResourceExhausted`].
    pub fn get(&self) -> Result<BorrowedBuffer> {
        let mut inner = self.inner.lock().unwrap();

        let mut buf = if let Some(buf) = inner.idle.pop() {
            buf
        } else if inner.max_size == 0 || inner.busy_count < inner.max_size {
            Vec::new()
        } else {
            return Err(Error::ResourceExhausted);
        };

        buf.clear();
        buf.resize(inner.rx_buf_size, 0);
        inner.busy_count += 1;

        Ok(BorrowedBuffer {
            buf: Some(buf),
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Number of buffers currently lent out. Exposed for tests exercising
    /// pool conservation (every borrowed buffer is eventually returned).
    pub fn borrowed_count(&self) -> usize {
        self.inner.lock().unwrap().busy_count
    }
}

/// A byte vector on loan from a [`BufferPool`].
///
/// Returns the vector to the pool's idle stack on drop. If the pool has
/// already been destroyed, the vector is simply dropped instead of
/// panicking or otherwise misbehaving.
pub struct BorrowedBuffer {
    buf: Option<Vec<u8>>,
    pool: std::sync::Weak<Mutex<Inner>>,
}

impl std::ops::Deref for BorrowedBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl std::ops::DerefMut for BorrowedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl BorrowedBuffer {
    /// Shrink the logical length of the buffer to `len` bytes (e.g. after a
    /// `recv` returned fewer bytes than the buffer's capacity) without
    /// releasing the underlying allocation.
    pub fn truncate(&mut self, len: usize) {
        if let Some(buf) = &mut self.buf {
            buf.truncate(len);
        }
    }
}

impl Drop for BorrowedBuffer {
    fn drop(&mut self) {
        let Some(mut buf) = self.buf.take() else {
            return;
        };
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        let mut inner = inner.lock().unwrap();
        buf.clear();
        inner.idle.push(buf);
        inner.busy_count -= 1;
    }
}
