//! A one-shot completion channel for async sends.
//!
//! Grounded on sockpuppet's use of `std::promise<void>`/`std::future<void>`
//! per send-queue entry (`original_source/src/socket_async_priv.h`'s
//! `SendQElement`/`SendToQElement`, `original_source/src/socket_async_priv.cpp`'s
//! `DriverDoSend`). This crate has no async runtime in its dependency stack
//! (the reactor is its own event loop, not a `Future` executor), so the
//! promise/future pair is hand-rolled on a mutex/condvar rather than
//! implementing `std::future::Future` against a waker that nothing here
//! would ever poll.

use std::sync::{Arc, Condvar, Mutex};

use crate::deadline::Timeout;
use crate::error::{Error, Result};

struct Shared {
    result: Mutex<Option<Result<()>>>,
    ready: Condvar,
}

/// The reactor-side handle: set exactly once, by whichever code path
/// finishes (or fails) the associated send.
pub(crate) struct Promise {
    shared: Arc<Shared>,
}

impl Promise {
    pub(crate) fn resolve(self, result: Result<()>) {
        let mut slot = self.shared.result.lock().unwrap();
        *slot = Some(result);
        self.shared.ready.notify_all();
    }
}

/// The submitter-side handle returned by `Send`/`SendTo`. Dropping it
/// without waiting simply orphans the completion; the reactor still runs
/// the send to completion, it just has nowhere left to report to.
pub struct SendFuture {
    shared: Arc<Shared>,
}

impl SendFuture {
    pub(crate) fn pair() -> (Promise, SendFuture) {
        let shared = Arc::new(Shared {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });
        (
            Promise { shared: shared.clone() },
            SendFuture { shared },
        )
    }

    /// Block until the send completes, resolving at most `timeout`.
    /// Returns `None` on timeout; the send is still in flight and the
    /// future may be waited on again.
    pub fn wait(&self, timeout: Timeout) -> Option<Result<()>> {
        let mut slot = self.shared.result.lock().unwrap();
        loop {
            if let Some(result) = slot.as_ref() {
                return Some(clone_result(result));
            }
            match timeout {
                Timeout::Forever => {
                    slot = self.shared.ready.wait(slot).unwrap();
                }
                Timeout::Poll => return None,
                Timeout::Limited(d) => {
                    let (new_slot, timed_out) = self.shared.ready.wait_timeout(slot, d).unwrap();
                    slot = new_slot;
                    if timed_out.timed_out() {
                        return slot.as_ref().map(clone_result);
                    }
                }
            }
        }
    }

    /// Block indefinitely until the send completes.
    pub fn join(&self) -> Result<()> {
        self.wait(Timeout::Forever).expect("join never times out")
    }

    /// True if the send has already completed (successfully or not).
    pub fn is_ready(&self) -> bool {
        self.shared.result.lock().unwrap().is_some()
    }
}

fn clone_result(result: &Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => Err(clone_error(e)),
    }
}

fn clone_error(e: &Error) -> Error {
    match e {
        Error::ConnectionClosed => Error::ConnectionClosed,
        Error::ResourceExhausted => Error::ResourceExhausted,
        Error::InvalidState(s) => Error::InvalidState(s),
        Error::Contract(s) => Error::Contract(s),
        Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        Error::AddressResolution { query, source } => Error::AddressResolution {
            query: query.clone(),
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
        #[cfg(feature = "tls")]
        Error::Tls(s) => Error::Tls(s.clone()),
    }
}
