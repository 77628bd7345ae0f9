use std::io;

use super::{Interest, PollFd};

pub(super) fn poll(fds: &mut [PollFd], timeout_ms: i32) -> io::Result<usize> {
    let mut raw: Vec<libc::pollfd> = fds
        .iter()
        .map(|f| libc::pollfd {
            fd: f.raw,
            events: to_poll_events(f.interest),
            revents: 0,
        })
        .collect();

    let ready = loop {
        let result = unsafe { libc::poll(raw.as_mut_ptr(), raw.len() as libc::nfds_t, timeout_ms) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        break result as usize;
    };

    for (fd, raw) in fds.iter_mut().zip(raw.iter()) {
        fd.revents = from_poll_events(raw.revents);
    }

    Ok(ready)
}

fn to_poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.readable {
        events |= libc::POLLIN;
    }
    if interest.writable {
        events |= libc::POLLOUT;
    }
    events
}

fn from_poll_events(revents: libc::c_short) -> Interest {
    Interest {
        readable: revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
        writable: revents & (libc::POLLOUT | libc::POLLERR) != 0,
        error: revents & libc::POLLERR != 0,
    }
}
