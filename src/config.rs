//! Server construction parameters.
//!
//! `ServerConfig` groups the constructor parameters the distilled spec lists
//! individually (`host`, `port`, `timeout`, `buffer_size`, `max_event_size`).
//! The core performs no file or CLI parsing of its own — assembling one of
//! these from a config file or `clap` arguments is the caller's job (see
//! `demos/echo_server.rs`).
use std::net::Ipv4Addr;

/// Default per-read buffer size, matching the donor original's example
/// configuration (`buffer_size = 8096`).
pub const DEFAULT_BUFFER_SIZE: usize = 8096;

/// Default readiness-notifier event batch capacity.
pub const DEFAULT_MAX_EVENT_SIZE: usize = 1024;

/// Default listener send/receive timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind. IPv4 only (see Non-goals).
    pub host: Ipv4Addr,
    /// Port to bind.
    pub port: u16,
    /// `SO_SNDTIMEO`/`SO_RCVTIMEO` applied to the listening socket, seconds.
    pub timeout_secs: u64,
    /// Bytes read per event.
    pub buffer_size: usize,
    /// Readiness-notifier event batch capacity.
    pub max_event_size: usize,
    /// Worker pool size. `0` means handlers run inline on the loop thread.
    pub thread_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(127, 0, 0, 1),
            port: 9090,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_event_size: DEFAULT_MAX_EVENT_SIZE,
            thread_size: 0,
        }
    }
}

impl ServerConfig {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self {
            host,
            port,
            ..Self::default()
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_max_event_size(mut self, max_event_size: usize) -> Self {
        self.max_event_size = max_event_size;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_thread_size(mut self, thread_size: usize) -> Self {
        self.thread_size = thread_size;
        self
    }
}
