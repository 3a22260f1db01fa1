//! The readiness notifier: epoll on Linux, kqueue on macOS.
//!
//! Unlike the donor's `runtime/async/reactor.rs`, this reactor is not wired
//! to `std::task::Waker` — the event loop here is a synchronous
//! callback-per-event dispatch (§4.1), not a polled `Future` scheduler.

use std::io;
use std::os::unix::io::RawFd;

/// Readiness interests a descriptor can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READ: Interest = Interest(0b0001);
    pub const WRITE: Interest = Interest(0b0010);
    pub const HANGUP: Interest = Interest(0b0100);
    pub const EDGE_TRIGGERED: Interest = Interest(0b1000);

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// One readiness event delivered by `wait_and_dispatch`.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub fd: RawFd,
    pub readable: bool,
    pub hangup: bool,
    pub error: bool,
}

#[cfg(target_os = "linux")]
mod sys {
    use super::*;
    use libc::{
        epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN,
        EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL,
    };

    pub fn create() -> io::Result<RawFd> {
        let fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    pub fn to_raw_events(interest: Interest) -> u32 {
        let mut events = EPOLLERR as u32 | EPOLLHUP as u32;
        if interest.contains(Interest::READ) {
            events |= EPOLLIN as u32;
        }
        if interest.contains(Interest::WRITE) {
            events |= EPOLLOUT as u32;
        }
        if interest.contains(Interest::HANGUP) {
            events |= EPOLLRDHUP as u32;
        }
        if interest.contains(Interest::EDGE_TRIGGERED) {
            events |= EPOLLET as u32;
        }
        events
    }

    pub fn add(epoll_fd: RawFd, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut ev = epoll_event {
            events: to_raw_events(interest),
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(epoll_fd, EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn remove(epoll_fd: RawFd, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(epoll_fd, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn wait(epoll_fd: RawFd, capacity: usize, timeout_ms: i32) -> io::Result<Vec<Event>> {
        let mut raw: Vec<epoll_event> = vec![unsafe { std::mem::zeroed() }; capacity];
        let n = unsafe { epoll_wait(epoll_fd, raw.as_mut_ptr(), raw.len() as i32, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        let mut out = Vec::with_capacity(n as usize);
        for ev in &raw[..n as usize] {
            let mask = ev.events as i32;
            out.push(Event {
                fd: ev.u64 as RawFd,
                readable: mask & EPOLLIN != 0,
                hangup: mask & (EPOLLHUP | EPOLLRDHUP) != 0,
                error: mask & EPOLLERR != 0,
            });
        }
        Ok(out)
    }

    pub fn close(fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }
}

#[cfg(target_os = "macos")]
mod sys {
    use super::*;
    use libc::{kevent, kqueue, timespec, EVFILT_READ, EV_ADD, EV_CLEAR, EV_DELETE, EV_EOF};

    pub fn create() -> io::Result<RawFd> {
        let fd = unsafe { kqueue() };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    pub fn add(kq: RawFd, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut flags = EV_ADD;
        if interest.contains(Interest::EDGE_TRIGGERED) {
            flags |= EV_CLEAR;
        }
        let event = libc::kevent {
            ident: fd as usize,
            filter: EVFILT_READ,
            flags,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        let rc = unsafe { kevent(kq, &event, 1, std::ptr::null_mut(), 0, std::ptr::null()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn remove(kq: RawFd, fd: RawFd) -> io::Result<()> {
        let event = libc::kevent {
            ident: fd as usize,
            filter: EVFILT_READ,
            flags: EV_DELETE,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        let rc = unsafe { kevent(kq, &event, 1, std::ptr::null_mut(), 0, std::ptr::null()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn wait(kq: RawFd, capacity: usize, timeout_ms: i32) -> io::Result<Vec<Event>> {
        let mut raw: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; capacity];
        let ts = timespec {
            tv_sec: (timeout_ms / 1000) as i64,
            tv_nsec: ((timeout_ms % 1000) * 1_000_000) as i64,
        };
        let ts_ptr = if timeout_ms < 0 {
            std::ptr::null()
        } else {
            &ts as *const timespec
        };
        let n = unsafe {
            kevent(
                kq,
                std::ptr::null(),
                0,
                raw.as_mut_ptr(),
                raw.len() as i32,
                ts_ptr,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        let mut out = Vec::with_capacity(n as usize);
        for ev in &raw[..n as usize] {
            out.push(Event {
                fd: ev.ident as RawFd,
                readable: true,
                hangup: ev.flags & EV_EOF != 0,
                error: false,
            });
        }
        Ok(out)
    }

    pub fn close(fd: RawFd) {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Wraps the OS readiness notifier.
pub struct ReadinessLoop {
    fd: RawFd,
    capacity: usize,
}

impl ReadinessLoop {
    pub fn new(capacity: usize) -> io::Result<Self> {
        let fd = sys::create()?;
        Ok(Self { fd, capacity })
    }

    pub fn add(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        sys::add(self.fd, fd, interest)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        sys::remove(self.fd, fd)
    }

    /// Blocks until at least one event (or a signal interrupts the wait),
    /// then invokes `callback` once per event. A signal interruption
    /// surfaces as zero events, never as an error, so callers can poll a
    /// shutdown flag between calls without treating `EINTR` as fatal.
    pub fn wait_and_dispatch(
        &self,
        timeout_ms: i32,
        mut callback: impl FnMut(Event),
    ) -> io::Result<()> {
        let events = sys::wait(self.fd, self.capacity, timeout_ms)?;
        for event in events {
            callback(event);
        }
        Ok(())
    }
}

impl Drop for ReadinessLoop {
    fn drop(&mut self) {
        sys::close(self.fd);
    }
}
