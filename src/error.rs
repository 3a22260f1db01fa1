//! Startup-time errors.
//!
//! Per-connection errors never reach the caller (see `connection.rs`); they
//! are converted into a disconnect internally. Only failures that prevent
//! `Server::run` from entering the event loop are represented here.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to listen on socket: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to create readiness notifier: {0}")]
    NotifierInit(#[source] io::Error),

    #[error("failed to install signal handler: {0}")]
    SignalInstall(#[source] io::Error),

    #[cfg(feature = "tls")]
    #[error("failed to load TLS configuration: {0}")]
    TlsConfig(#[source] io::Error),
}
