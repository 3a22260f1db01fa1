//! TLS engine abstraction over `rustls` (§4.2).
//!
//! This is a synchronous re-expression of the donor's `runtime/async/tls.rs`
//! `TlsStream`: the `read_tls`/`process_new_packets`/`reader().read()` and
//! `writer().write()`/`write_tls` call sequences are carried over unchanged,
//! but there is no `Waker`/`Poll` plumbing — each call either makes progress
//! or reports a `TlsIoResult` the caller retries on the next readiness event.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Arc;

use rustls::server::ServerSessionMemoryCache;
use rustls::{ServerConfig, ServerConnection};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// Protocol-version tag accepted by `Server::set_tls`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls12,
    Tls13,
    Any,
}

/// Engine-specific flags bitmask. Reserved for ABI fidelity with the
/// distilled spec; no bit currently changes behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsFlags(pub u64);

/// Result of a single TLS read or write attempt.
pub enum TlsIoResult {
    Bytes(usize),
    WantRead,
    WantWrite,
    Interrupted,
    WouldBlock,
    Fatal(io::Error),
}

/// Abstract facade over the TLS library: loads certificate/key material and
/// produces server-side sessions bound to accepted sockets.
pub struct TlsEngine {
    config: Arc<ServerConfig>,
}

impl TlsEngine {
    /// Builds an engine from PEM certificate/key files. `version`/`ciphers`
    /// are accepted for interface fidelity with the distilled spec;
    /// `rustls`'s default suite/version negotiation is otherwise used.
    /// Returns an error rather than panicking on a bad cert/key path — the
    /// caller decides whether that's fatal (`Server::set_tls` surfaces it).
    pub fn new(
        cert_path: &Path,
        key_path: &Path,
        _version: TlsVersion,
        _ciphers: &str,
        _flags: TlsFlags,
    ) -> io::Result<Self> {
        Self::load(cert_path, key_path).map(|config| Self {
            config: Arc::new(config),
        })
    }

    fn load(cert_path: &Path, key_path: &Path) -> io::Result<ServerConfig> {
        let cert_file = File::open(cert_path)?;
        let key_file = File::open(key_path)?;

        let certs: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut BufReader::new(cert_file))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidData, "no private key found")
            })?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        config.session_storage = ServerSessionMemoryCache::new(256);
        Ok(config)
    }

    /// Binds a new server-side session to a non-blocking socket. The
    /// handshake itself is performed lazily during the first reads/writes.
    pub fn attach(&self, fd: RawFd) -> io::Result<TlsSession> {
        let conn = ServerConnection::new(self.config.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(TlsSession { conn, fd })
    }
}

/// A single connection's TLS state. Destruction flushes a best-effort
/// `close_notify` before the underlying socket is closed (§4.2).
pub struct TlsSession {
    conn: ServerConnection,
    fd: RawFd,
}

impl TlsSession {
    /// Pumps any TLS records the connection wants to write onto `fd`,
    /// without blocking. Mirrors the donor's `flush_tls`.
    fn flush_tls(&mut self, fd: RawFd) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        while self.conn.wants_write() {
            let mut cursor = io::Cursor::new(&mut buf[..]);
            let n = self
                .conn
                .write_tls(&mut cursor)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            if n == 0 {
                break;
            }
            match crate::io::send_once(fd, &buf[..n]) {
                crate::io::WriteOutcome::Written(written) if written == n => continue,
                crate::io::WriteOutcome::Written(_) => break,
                crate::io::WriteOutcome::Fatal(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pulls raw TLS records from `fd` into the connection's record layer,
    /// without blocking. Mirrors the donor's `fill_tls`.
    fn fill_tls(&mut self, fd: RawFd) -> Result<(), TlsIoResult> {
        let mut buf = [0u8; 4096];
        match crate::io::recv_once(fd, &mut buf) {
            crate::io::ReadOutcome::Data(n) => {
                let mut cursor = io::Cursor::new(&buf[..n]);
                self.conn
                    .read_tls(&mut cursor)
                    .map_err(|e| TlsIoResult::Fatal(e))?;
                self.conn
                    .process_new_packets()
                    .map_err(|e| TlsIoResult::Fatal(io::Error::new(io::ErrorKind::InvalidData, e)))?;
                Ok(())
            }
            crate::io::ReadOutcome::Eof => Err(TlsIoResult::Fatal(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed during TLS record fill",
            ))),
            crate::io::ReadOutcome::Retry => Err(TlsIoResult::Interrupted),
            crate::io::ReadOutcome::Benign => Ok(()),
            crate::io::ReadOutcome::Fatal(e) => Err(TlsIoResult::Fatal(e)),
        }
    }

    /// Reads decrypted application data into `buf`.
    pub fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> TlsIoResult {
        if let Err(outcome) = self.fill_tls(fd) {
            return outcome;
        }
        if let Err(e) = self.flush_tls(fd) {
            return TlsIoResult::Fatal(e);
        }

        match self.conn.reader().read(buf) {
            Ok(n) => TlsIoResult::Bytes(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if self.conn.wants_read() {
                    TlsIoResult::WantRead
                } else {
                    TlsIoResult::WantWrite
                }
            }
            Err(e) => TlsIoResult::Fatal(e),
        }
    }

    /// Encrypts and writes `buf` as application data.
    pub fn write(&mut self, fd: RawFd, buf: &[u8]) -> TlsIoResult {
        let n = match self.conn.writer().write(buf) {
            Ok(n) => n,
            Err(e) => return TlsIoResult::Fatal(e),
        };
        if let Err(e) = self.flush_tls(fd) {
            return TlsIoResult::Fatal(e);
        }
        if self.conn.wants_write() {
            return TlsIoResult::WantWrite;
        }
        TlsIoResult::Bytes(n)
    }
}

impl Drop for TlsSession {
    fn drop(&mut self) {
        self.conn.send_close_notify();
        // Best-effort flush; the fd may already be shut down by the time
        // this runs (it is dropped as part of `del_client`'s teardown), so
        // errors here are deliberately swallowed.
        let _ = self.flush_tls(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fails_for_missing_files() {
        let result = TlsEngine::new(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
            TlsVersion::Any,
            "",
            TlsFlags::default(),
        );
        assert!(result.is_err());
    }
}
