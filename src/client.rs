//! Per-connection data exposed to the application.

use std::time::{SystemTime, UNIX_EPOCH};

/// User-visible descriptor of a connected peer.
///
/// A handler receives `&mut ClientInfo` for the connection that triggered it;
/// the reference is scoped to the call and must not be retained.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Dotted-quad remote address.
    pub ip: String,
    /// Remote port.
    pub port: u16,
    /// Connect timestamp, seconds since epoch.
    pub t: u64,
    /// Session identifier. Stable for the connection's lifetime, unique
    /// among live connections, recycled after disconnect.
    pub sid: u64,
    /// Application-owned identity slot, not interpreted by the core.
    pub uid: Vec<i64>,
    /// Application-owned identity slot, not interpreted by the core.
    pub gid: Vec<i64>,
    /// Size of the client set at the moment of the last handler invocation.
    pub u_size: usize,
    /// Number of handler invocations on this connection so far.
    pub count: u64,
}

impl ClientInfo {
    pub(crate) fn new(ip: String, port: u16) -> Self {
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            ip,
            port,
            t,
            sid: 0,
            uid: vec![0],
            gid: vec![0],
            u_size: 0,
            count: 0,
        }
    }
}

/// A connection's registry entry: its `ClientInfo` plus, when TLS is
/// enabled, the TLS session bound to its descriptor.
pub(crate) struct MetaData {
    pub client: ClientInfo,
    #[cfg(feature = "tls")]
    pub tls: Option<crate::tls::TlsSession>,
}

impl MetaData {
    pub(crate) fn new(ip: String, port: u16) -> Self {
        Self {
            client: ClientInfo::new(ip, port),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}
