//! Plaintext read/write helpers and the outcome enums that model the
//! donor's goto-based retry-once-then-disconnect control flow (§4.4, §9).

use std::io;
use std::os::unix::io::RawFd;

/// Result of a single `recv`/TLS-read attempt.
pub enum ReadOutcome {
    /// `n` bytes were read.
    Data(usize),
    /// Plaintext EOF (`recv` returned 0).
    Eof,
    /// The read was interrupted; the caller should retry once.
    Retry,
    /// Would-block / want-read / want-write: return to the loop, no state
    /// mutation, connection stays open.
    Benign,
    /// Any other error: disconnect.
    Fatal(io::Error),
}

/// Result of a single `send`/TLS-write attempt.
pub enum WriteOutcome {
    Written(usize),
    Fatal(io::Error),
}

/// Reads up to `buf.len()` bytes from `fd`, classifying the raw result into
/// a `ReadOutcome`. Retrying on `EINTR` is the caller's responsibility (at
/// most once per event, per §4.4) — this function reports `Retry` rather
/// than looping, so the caller can enforce the one-shot guard.
pub fn recv_once(fd: RawFd, buf: &mut [u8]) -> ReadOutcome {
    let rc = unsafe {
        libc::recv(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
        )
    };
    if rc > 0 {
        ReadOutcome::Data(rc as usize)
    } else if rc == 0 {
        ReadOutcome::Eof
    } else {
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => ReadOutcome::Retry,
            io::ErrorKind::WouldBlock => ReadOutcome::Benign,
            _ => ReadOutcome::Fatal(err),
        }
    }
}

/// Sends `buf` to `fd` in a single `send(2)` call with `MSG_NOSIGNAL`, so a
/// peer reset surfaces as an error return rather than `SIGPIPE`.
pub fn send_once(fd: RawFd, buf: &[u8]) -> WriteOutcome {
    let rc = unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if rc >= 0 {
        WriteOutcome::Written(rc as usize)
    } else {
        WriteOutcome::Fatal(io::Error::last_os_error())
    }
}

/// Marks a descriptor non-blocking (`O_NONBLOCK`), per §4.5/§4.6.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Shuts down both directions then closes `fd`, swallowing errors — by the
/// time this runs the descriptor is already being discarded (§3).
pub fn shutdown_and_close(fd: RawFd) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
        libc::close(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn recv_once_reports_data_then_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        use std::io::Write;
        let mut c = &client;
        c.write_all(b"hi").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(50));
        let mut buf = [0u8; 16];
        match recv_once(server.as_raw_fd(), &mut buf) {
            ReadOutcome::Data(n) => assert_eq!(&buf[..n], b"hi"),
            _ => panic!("expected data"),
        }

        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(50));
        match recv_once(server.as_raw_fd(), &mut buf) {
            ReadOutcome::Eof => {}
            _ => panic!("expected eof"),
        }
    }

    #[test]
    fn recv_once_would_block_is_benign() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 16];
        match recv_once(server.as_raw_fd(), &mut buf) {
            ReadOutcome::Benign => {}
            _ => panic!("expected would-block"),
        }
    }
}
