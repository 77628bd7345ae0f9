//! Timeout arithmetic used uniformly across sync recv/send, TLS handshakes,
//! driver polling and scheduler draining.
//!
//! Grounded on sockpuppet's `DeadlineUnlimited`/`DeadlineLimited` pair
//! (`original_source/src/socket_async_priv.cpp`): a deadline always carries a
//! reference instant that gets refreshed by `tick`, plus (for the limited
//! form) a fixed expiry instant computed once at construction.

use std::time::{Duration, Instant};

/// A user-facing timeout: negative means "forever", zero means "poll, don't
/// block", positive means "block up to this long".
///
/// Mirrors the tri-state forever/poll/limited timeout convention used
/// across this crate's blocking calls without relying on a signed
/// `Duration`, which the standard library doesn't have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block indefinitely.
    Forever,
    /// Never block; a single non-blocking attempt.
    Poll,
    /// Block for at most this long.
    Limited(Duration),
}

impl Timeout {
    /// Construct a [`Timeout`] from the sign/magnitude convention used by the
    /// original spec: a negative duration (expressed here as `None`) means
    /// forever, `Duration::ZERO` means poll, anything else is limited.
    pub fn from_duration(d: Duration) -> Timeout {
        if d.is_zero() {
            Timeout::Poll
        } else {
            Timeout::Limited(d)
        }
    }

    /// Turn this timeout into a concrete [`Deadline`] anchored at `Instant::now`.
    pub fn to_deadline(self) -> Deadline {
        match self {
            Timeout::Forever => Deadline::unlimited(),
            Timeout::Poll => Deadline::zero(),
            Timeout::Limited(d) => Deadline::limited(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Timeout {
        Timeout::from_duration(d)
    }
}

/// A deadline is a snapshot of "now" plus, for the limited case, a fixed
/// expiry instant. Operations on a deadline never look at the wall clock
/// except through `tick`, so a whole call chain can share one consistent
/// notion of "now".
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    now: Instant,
    kind: DeadlineKind,
}

#[derive(Debug, Clone, Copy)]
enum DeadlineKind {
    Unlimited,
    Zero,
    Limited(Instant),
}

impl Deadline {
    /// A deadline that never expires.
    pub fn unlimited() -> Deadline {
        Deadline {
            now: Instant::now(),
            kind: DeadlineKind::Unlimited,
        }
    }

    /// A deadline that has already expired (non-blocking poll).
    pub fn zero() -> Deadline {
        Deadline {
            now: Instant::now(),
            kind: DeadlineKind::Zero,
        }
    }

    /// A deadline expiring `timeout` from now.
    pub fn limited(timeout: Duration) -> Deadline {
        let now = Instant::now();
        Deadline {
            now,
            kind: DeadlineKind::Limited(now + timeout),
        }
    }

    /// A deadline expiring at a specific instant.
    pub fn at(instant: Instant) -> Deadline {
        Deadline {
            now: Instant::now(),
            kind: DeadlineKind::Limited(instant),
        }
    }

    /// Re-sample the reference instant.
    pub fn tick(&mut self) {
        self.now = Instant::now();
    }

    /// The reference instant as of the last `tick` (or construction).
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Whether any time budget remains. Always true for `unlimited`, always
    /// false for `zero`.
    pub fn time_left(&self) -> bool {
        match self.kind {
            DeadlineKind::Unlimited => true,
            DeadlineKind::Zero => false,
            DeadlineKind::Limited(deadline) => self.now <= deadline,
        }
    }

    /// Duration remaining until the deadline, clamped to zero. `unlimited`
    /// reports `Timeout::Forever`'s underlying "no bound" via `None`.
    pub fn remaining(&self) -> Option<Duration> {
        match self.kind {
            DeadlineKind::Unlimited => None,
            DeadlineKind::Zero => Some(Duration::ZERO),
            DeadlineKind::Limited(deadline) => {
                Some(deadline.saturating_duration_since(self.now))
            }
        }
    }

    /// Duration remaining until `min(until, deadline)`, clamped to zero.
    pub fn remaining_until(&self, until: Instant) -> Duration {
        let capped = match self.kind {
            DeadlineKind::Unlimited => until,
            DeadlineKind::Zero => self.now,
            DeadlineKind::Limited(deadline) => until.min(deadline),
        };
        capped.saturating_duration_since(self.now)
    }

    /// This deadline expressed back as a [`Timeout`], suitable for passing
    /// into a lower-level blocking call (e.g. the wait primitive).
    pub fn as_timeout(&self) -> Timeout {
        match self.kind {
            DeadlineKind::Unlimited => Timeout::Forever,
            DeadlineKind::Zero => Timeout::Poll,
            DeadlineKind::Limited(deadline) => {
                Timeout::Limited(deadline.saturating_duration_since(self.now))
            }
        }
    }
}
