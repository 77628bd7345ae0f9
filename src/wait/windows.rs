use std::io;

use windows_sys::Win32::Networking::WinSock::{
    WSAPoll, POLLERR, POLLHUP, POLLRDNORM, POLLWRNORM, SOCKET, WSAPOLLFD,
};

use super::{Interest, PollFd};

pub(super) fn poll(fds: &mut [PollFd], timeout_ms: i32) -> io::Result<usize> {
    let mut raw: Vec<WSAPOLLFD> = fds
        .iter()
        .map(|f| WSAPOLLFD {
            fd: f.raw as SOCKET,
            events: to_poll_events(f.interest),
            revents: 0,
        })
        .collect();

    let ready = unsafe { WSAPoll(raw.as_mut_ptr(), raw.len() as u32, timeout_ms) };
    if ready < 0 {
        return Err(io::Error::last_os_error());
    }

    for (fd, raw) in fds.iter_mut().zip(raw.iter()) {
        fd.revents = from_poll_events(raw.revents);
    }

    Ok(ready as usize)
}

fn to_poll_events(interest: Interest) -> i16 {
    let mut events = 0;
    if interest.readable {
        events |= POLLRDNORM;
    }
    if interest.writable {
        events |= POLLWRNORM;
    }
    events
}

fn from_poll_events(revents: i16) -> Interest {
    Interest {
        readable: revents & (POLLRDNORM | POLLHUP | POLLERR) != 0,
        writable: revents & (POLLWRNORM | POLLERR) != 0,
        error: revents & POLLERR != 0,
    }
}
