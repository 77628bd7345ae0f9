//! `poll(2)`/`WSAPoll` wrapper used for both single-socket blocking waits
//! and the driver's multi-descriptor readiness scan.
//!
//! Grounded on sockpuppet's `wait.cpp`/`wait.h`
//! (`original_source/src/wait.cpp`): a `pollfd` vector plus a millisecond
//! timeout computed from a [`crate::deadline::Timeout`], with `WaitReadable`/
//! `WaitWritable` as single-descriptor convenience wrappers. The fan-out
//! over one-fd-per-syscall used by mio's `poll` selector
//! (`examples` reference: its `sys/unix/selector/poll.rs`) is not needed
//! here because this crate polls its whole descriptor table in one call,
//! same as the original.

#[cfg(unix)]
#[path = "unix.rs"]
mod sys;

#[cfg(windows)]
#[path = "windows.rs"]
mod sys;

use std::io;
use std::time::Duration;

use crate::deadline::Timeout;

/// A descriptor plus the events it was polled for and received.
#[derive(Debug, Clone, Copy)]
pub struct PollFd {
    raw: RawSocket,
    interest: Interest,
    revents: Interest,
}

/// Readiness bits this module understands. Kept deliberately small — the
/// driver only ever asks for readable/writable/error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
        error: false,
    };
    pub const WRITABLE: Interest = Interest {
        readable: false,
        writable: true,
        error: false,
    };

    pub fn is_none(&self) -> bool {
        !self.readable && !self.writable
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            readable: self.readable || rhs.readable,
            writable: self.writable || rhs.writable,
            error: self.error || rhs.error,
        }
    }
}

#[cfg(unix)]
pub type RawSocket = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type RawSocket = std::os::windows::io::RawSocket;

impl PollFd {
    pub fn new(raw: RawSocket, interest: Interest) -> PollFd {
        PollFd {
            raw,
            interest,
            revents: Interest::default(),
        }
    }

    pub fn raw(&self) -> RawSocket {
        self.raw
    }

    pub fn revents(&self) -> Interest {
        self.revents
    }

    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }
}

fn timeout_millis(timeout: Timeout) -> i32 {
    match timeout {
        Timeout::Forever => -1,
        Timeout::Poll => 0,
        Timeout::Limited(d) => millis_rounded_up(d).try_into().unwrap_or(i32::MAX),
    }
}

fn millis_rounded_up(d: Duration) -> u128 {
    let ms = d.as_millis();
    if Duration::from_millis(ms as u64) < d {
        ms + 1
    } else {
        ms
    }
}

/// Poll every descriptor in `fds` at once, filling in each entry's
/// `revents`. Returns the number of descriptors with any event set.
/// A `timeout` of [`Timeout::Forever`] blocks until at least one
/// descriptor is ready; [`Timeout::Poll`] never blocks.
pub fn wait(fds: &mut [PollFd], timeout: Timeout) -> io::Result<usize> {
    sys::poll(fds, timeout_millis(timeout))
}

/// Block until `raw` is readable or `timeout` elapses. Returns `true` if
/// readable, `false` on timeout.
pub fn wait_readable(raw: RawSocket, timeout: Timeout) -> io::Result<bool> {
    let mut fds = [PollFd::new(raw, Interest::READABLE)];
    Ok(wait(&mut fds, timeout)? > 0)
}

/// Block until `raw` is writable or `timeout` elapses. Returns `true` if
/// writable, `false` on timeout.
pub fn wait_writable(raw: RawSocket, timeout: Timeout) -> io::Result<bool> {
    let mut fds = [PollFd::new(raw, Interest::WRITABLE)];
    Ok(wait(&mut fds, timeout)? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    #[cfg(unix)]
    use std::os::unix::io::AsRawFd;
    #[cfg(windows)]
    use std::os::windows::io::AsRawSocket;

    #[cfg(unix)]
    fn raw(sock: &UdpSocket) -> RawSocket {
        sock.as_raw_fd()
    }
    #[cfg(windows)]
    fn raw(sock: &UdpSocket) -> RawSocket {
        sock.as_raw_socket()
    }

    #[test]
    fn udp_socket_becomes_readable_after_send() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.connect(b.local_addr().unwrap()).unwrap();
        b.connect(a.local_addr().unwrap()).unwrap();

        assert!(!wait_readable(raw(&a), Timeout::Poll).unwrap());

        b.send(b"hi").unwrap();
        assert!(wait_readable(raw(&a), Timeout::Limited(Duration::from_secs(1))).unwrap());
    }

    #[test]
    fn udp_socket_is_immediately_writable() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        assert!(wait_writable(raw(&a), Timeout::Poll).unwrap());
    }

    #[test]
    fn multi_fd_wait_reports_only_ready_descriptors() {
        let a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let c = UdpSocket::bind("127.0.0.1:0").unwrap();
        a.connect(c.local_addr().unwrap()).unwrap();
        c.connect(a.local_addr().unwrap()).unwrap();
        a.send(b"ping").unwrap();

        let mut fds = [
            PollFd::new(raw(&b), Interest::READABLE),
            PollFd::new(raw(&c), Interest::READABLE),
        ];
        let ready = wait(&mut fds, Timeout::Limited(Duration::from_secs(1))).unwrap();
        assert_eq!(ready, 1);
        assert!(!fds[0].revents().readable);
        assert!(fds[1].revents().readable);
    }
}
