//! Per-connection read/dispatch/write/broadcast (§4.4, §4.5, §6).
//!
//! Grounded on `tcp_server.cpp`'s `work`/`ssl_work`/`send_to_all_client`: a
//! readable event triggers at most one read attempt (retried once on
//! `EINTR`), a successful read is handed to the handler, the handler's reply
//! is written back with the same retry-once rule, and a `broadcast` request
//! fans the reply out to every other live peer that passes the filter.

use std::os::unix::io::RawFd;

use crate::client::ClientInfo;
use crate::handler::{accept_all, BroadcastFilter, Handler};
use crate::io::{recv_once, send_once, ReadOutcome, WriteOutcome};
use crate::registry::ClientRegistry;

/// What the event loop should do with `fd` after processing one readable
/// event.
pub enum Outcome {
    /// Connection stays open, nothing further to do this cycle.
    Continue,
    /// Connection should be torn down (EOF, fatal error, or handler asked
    /// for `keepalive = false`).
    Disconnect,
}

/// Result of a single plaintext read attempt, with the retry-once-on-EINTR
/// rule already applied. Used directly by the inline path and by a worker
/// job, which performs its own read once it picks up the fd (§5).
pub(crate) enum ReadResult {
    Data(Vec<u8>),
    NoData,
    Disconnect,
}

pub(crate) fn read_plain(fd: RawFd, buffer_size: usize) -> ReadResult {
    let mut buf = vec![0u8; buffer_size];
    match recv_once(fd, &mut buf) {
        ReadOutcome::Data(n) => {
            buf.truncate(n);
            ReadResult::Data(buf)
        }
        ReadOutcome::Eof => ReadResult::Disconnect,
        ReadOutcome::Retry => match recv_once(fd, &mut buf) {
            ReadOutcome::Data(n) => {
                buf.truncate(n);
                ReadResult::Data(buf)
            }
            ReadOutcome::Eof => ReadResult::Disconnect,
            // A second interruption falls through to disconnect rather than
            // retrying again (§4.4).
            ReadOutcome::Retry => ReadResult::Disconnect,
            ReadOutcome::Benign => ReadResult::NoData,
            ReadOutcome::Fatal(_) => ReadResult::Disconnect,
        },
        ReadOutcome::Benign => ReadResult::NoData,
        ReadOutcome::Fatal(_) => ReadResult::Disconnect,
    }
}

/// Runs `handler` against `input` for a detached (not registry-borrowed)
/// `ClientInfo`. Used both by the inline dispatch path and by a worker job
/// operating on a snapshot (§5) — the snapshot is merged back into the
/// registry by the loop thread once the job reports its `WorkerOutcome`.
pub(crate) fn invoke_handler<H: Handler>(
    input: &[u8],
    client: &mut ClientInfo,
    handler: &mut H,
) -> (Vec<u8>, bool, Option<BroadcastFilter>) {
    let mut keepalive = false;
    let mut broadcast = false;
    let mut filter = accept_all();
    let reply = handler.handle(input, &mut keepalive, &mut broadcast, client, &mut filter);
    (reply, keepalive, broadcast.then_some(filter))
}

/// Reads once from `fd`, dispatches to `handler` on success, writes the
/// reply, and performs a broadcast if the handler requested one. Peers a
/// broadcast fails to reach are appended to `to_erase` for the caller to tear
/// down, same as the originating fd's own disconnect (§4.4 step 5).
///
/// Plaintext path (§4.4). The TLS path lives in [`on_readable_tls`].
pub fn on_readable<H: Handler>(
    fd: RawFd,
    registry: &mut ClientRegistry,
    buffer_size: usize,
    handler: &mut H,
    to_erase: &mut Vec<RawFd>,
) -> Outcome {
    let input = match read_plain(fd, buffer_size) {
        ReadResult::Data(bytes) => bytes,
        ReadResult::NoData => return Outcome::Continue,
        ReadResult::Disconnect => return Outcome::Disconnect,
    };

    let dispatched = match dispatch(fd, &input, registry, handler) {
        Some(dispatched) => dispatched,
        None => return Outcome::Disconnect,
    };

    if !write_reply(fd, &dispatched.reply) {
        return Outcome::Disconnect;
    }
    if let Some(targets) = dispatched.broadcast_targets {
        broadcast_plain(&targets, &dispatched.reply, to_erase);
    }
    if !dispatched.keepalive {
        return Outcome::Disconnect;
    }

    Outcome::Continue
}

#[cfg(feature = "tls")]
pub fn on_readable_tls<H: Handler>(
    fd: RawFd,
    registry: &mut ClientRegistry,
    buffer_size: usize,
    handler: &mut H,
    to_erase: &mut Vec<RawFd>,
) -> Outcome {
    use crate::tls::TlsIoResult;

    let mut buf = vec![0u8; buffer_size];
    let n = {
        let meta = match registry.get_meta_mut(fd) {
            Some(meta) => meta,
            None => return Outcome::Disconnect,
        };
        let session = match meta.tls.as_mut() {
            Some(session) => session,
            None => return Outcome::Disconnect,
        };
        match session.read(fd, &mut buf) {
            TlsIoResult::Bytes(0) => return Outcome::Disconnect,
            TlsIoResult::Bytes(n) => n,
            TlsIoResult::WantRead | TlsIoResult::WantWrite | TlsIoResult::WouldBlock => {
                return Outcome::Continue
            }
            TlsIoResult::Interrupted => match session.read(fd, &mut buf) {
                TlsIoResult::Bytes(0) => return Outcome::Disconnect,
                TlsIoResult::Bytes(n) => n,
                TlsIoResult::Fatal(_) => return Outcome::Disconnect,
                TlsIoResult::WantRead
                | TlsIoResult::WantWrite
                | TlsIoResult::WouldBlock
                | TlsIoResult::Interrupted => return Outcome::Continue,
            },
            TlsIoResult::Fatal(_) => return Outcome::Disconnect,
        }
    };

    let dispatched = match dispatch(fd, &buf[..n], registry, handler) {
        Some(dispatched) => dispatched,
        None => return Outcome::Disconnect,
    };

    if !write_reply_tls(fd, registry, &dispatched.reply) {
        return Outcome::Disconnect;
    }
    if let Some(targets) = dispatched.broadcast_targets {
        broadcast_tls(registry, &targets, &dispatched.reply, to_erase);
    }
    if !dispatched.keepalive {
        return Outcome::Disconnect;
    }

    Outcome::Continue
}

/// Outcome of one handler invocation: the reply to send back to the
/// originator, whether the connection stays open, and — if the handler
/// requested a broadcast — the snapshot of recipient descriptors taken
/// before any erase could invalidate it (§4.3).
struct Dispatched {
    reply: Vec<u8>,
    keepalive: bool,
    broadcast_targets: Option<Vec<RawFd>>,
}

fn dispatch<H: Handler>(
    fd: RawFd,
    input: &[u8],
    registry: &mut ClientRegistry,
    handler: &mut H,
) -> Option<Dispatched> {
    let u_size = registry.len();
    let client = registry.get_mut(fd)?;
    client.u_size = u_size;
    client.count += 1;
    let (reply, keepalive, filter) = invoke_handler(input, client, handler);

    let broadcast_targets = filter.map(|filter| {
        registry
            .live_fds_except(fd)
            .into_iter()
            .filter(|&target| registry.get(target).map(|c| filter(c)).unwrap_or(false))
            .collect()
    });

    Some(Dispatched {
        reply,
        keepalive,
        broadcast_targets,
    })
}

pub(crate) fn write_reply(fd: RawFd, reply: &[u8]) -> bool {
    if reply.is_empty() {
        return true;
    }
    match send_once(fd, reply) {
        WriteOutcome::Written(_) => true,
        WriteOutcome::Fatal(_) => false,
    }
}

/// Fans `payload` out to every target, queuing any peer whose write fails
/// onto `to_erase` — a broadcast recipient that can't be reached is
/// disconnected, same as a direct-reply failure (§4.4 step 5).
pub(crate) fn broadcast_plain(targets: &[RawFd], payload: &[u8], to_erase: &mut Vec<RawFd>) {
    for &fd in targets {
        if matches!(send_once(fd, payload), WriteOutcome::Fatal(_)) {
            to_erase.push(fd);
        }
    }
}

#[cfg(feature = "tls")]
fn write_reply_tls(fd: RawFd, registry: &mut ClientRegistry, reply: &[u8]) -> bool {
    use crate::tls::TlsIoResult;

    if reply.is_empty() {
        return true;
    }
    let meta = match registry.get_meta_mut(fd) {
        Some(meta) => meta,
        None => return false,
    };
    let session = match meta.tls.as_mut() {
        Some(session) => session,
        None => return false,
    };
    !matches!(session.write(fd, reply), TlsIoResult::Fatal(_))
}

#[cfg(feature = "tls")]
fn broadcast_tls(
    registry: &mut ClientRegistry,
    targets: &[RawFd],
    payload: &[u8],
    to_erase: &mut Vec<RawFd>,
) {
    use crate::tls::TlsIoResult;

    for &fd in targets {
        let Some(meta) = registry.get_meta_mut(fd) else {
            continue;
        };
        let Some(session) = meta.tls.as_mut() else {
            continue;
        };
        if matches!(session.write(fd, payload), TlsIoResult::Fatal(_)) {
            to_erase.push(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientInfo;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    fn echo(
        input: &[u8],
        keepalive: &mut bool,
        _broadcast: &mut bool,
        _client: &mut ClientInfo,
        _filter: &mut crate::handler::BroadcastFilter,
    ) -> Vec<u8> {
        *keepalive = true;
        input.to_vec()
    }

    #[test]
    fn echoes_input_and_keeps_connection_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let fd = server.as_raw_fd();

        let mut registry = ClientRegistry::new();
        registry.insert(fd, "127.0.0.1".into(), 1234);

        use std::io::Write;
        client.write_all(b"ping").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut to_erase = Vec::new();
        let outcome = on_readable(fd, &mut registry, 64, &mut echo, &mut to_erase);
        assert!(matches!(outcome, Outcome::Continue));

        let mut reply = [0u8; 16];
        use std::io::Read;
        client.set_read_timeout(Some(std::time::Duration::from_millis(200))).unwrap();
        let n = client.read(&mut reply).unwrap();
        assert_eq!(&reply[..n], b"ping");

        std::mem::forget(server);
    }

    #[test]
    fn eof_yields_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let fd = server.as_raw_fd();

        let mut registry = ClientRegistry::new();
        registry.insert(fd, "127.0.0.1".into(), 1234);

        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut to_erase = Vec::new();
        let outcome = on_readable(fd, &mut registry, 64, &mut echo, &mut to_erase);
        assert!(matches!(outcome, Outcome::Disconnect));
        std::mem::forget(server);
    }
}
