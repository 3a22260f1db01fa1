//! Single-process, event-driven TCP server core.
//!
//! A synchronous readiness loop (epoll on Linux, kqueue on macOS) accepts
//! connections and dispatches readable events to an application-supplied
//! [`Handler`], with an optional worker pool offloading handler calls off
//! the loop thread.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod io;
pub mod reactor;
pub mod registry;
pub mod server;
pub mod signal;

#[cfg(feature = "tls")]
pub mod tls;

#[cfg(feature = "pool")]
pub mod worker;

pub use client::ClientInfo;
pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::{accept_all, BroadcastFilter, Handler};
pub use server::Server;

#[cfg(feature = "tls")]
pub use tls::{TlsEngine, TlsFlags, TlsVersion};

#[cfg(feature = "pool")]
pub use worker::{Job, WorkerOutcome, WorkerPool};
