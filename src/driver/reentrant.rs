//! A recursive mutex guarding the reactor's private state.
//!
//! The two-mutex pause handshake (`original_source/src/driver_priv.h`'s
//! `StepGuard`/`PauseGuard`) relies on the step mutex being reentrant: a
//! task running on the reactor thread may itself call a driver method
//! (schedule another task, register a socket) that takes the same lock
//! again on the same thread. The standard library has no recursive mutex,
//! so this is the one place the driver departs from a straight port of
//! `std::sync::Mutex` and tracks the owning thread by hand.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct Owner {
    thread: ThreadId,
    depth: usize,
}

pub(super) struct StepMutex<T> {
    owner: Mutex<Option<Owner>>,
    released: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for StepMutex<T> {}
unsafe impl<T: Send> Sync for StepMutex<T> {}

impl<T> StepMutex<T> {
    pub(super) fn new(data: T) -> StepMutex<T> {
        StepMutex {
            owner: Mutex::new(None),
            released: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Block until this thread holds the lock (re-entering if it already
    /// does), then return a guard.
    pub(super) fn lock(&self) -> StepGuard<'_, T> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap();
        loop {
            match &mut *owner {
                Some(o) if o.thread == me => {
                    o.depth += 1;
                    break;
                }
                None => {
                    *owner = Some(Owner { thread: me, depth: 1 });
                    break;
                }
                Some(_) => {
                    owner = self.released.wait(owner).unwrap();
                }
            }
        }
        StepGuard { mutex: self }
    }

    /// Acquire only if uncontended or already held by this thread; never
    /// blocks.
    pub(super) fn try_lock(&self) -> Option<StepGuard<'_, T>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap();
        match &mut *owner {
            Some(o) if o.thread == me => {
                o.depth += 1;
                Some(StepGuard { mutex: self })
            }
            None => {
                *owner = Some(Owner { thread: me, depth: 1 });
                Some(StepGuard { mutex: self })
            }
            Some(_) => None,
        }
    }

    fn unlock(&self) {
        let mut owner = self.owner.lock().unwrap();
        let done = match &mut *owner {
            Some(o) => {
                o.depth -= 1;
                o.depth == 0
            }
            None => unreachable!("unlock without a holder"),
        };
        if done {
            *owner = None;
            self.released.notify_one();
        }
    }
}

pub(super) struct StepGuard<'a, T> {
    mutex: &'a StepMutex<T>,
}

impl<'a, T> Deref for StepGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for StepGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for StepGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
