//! Top-level server object (§2, §4, §7).
//!
//! Grounded on `tcp_server.cpp`'s constructor (socket/bind/listen/SO_*
//! options) and `run`/`main_loop` (the event-loop body). The worker-pool
//! integration is this crate's own resolution of the donor's "pool built
//! but never wired up" gap (§5, §9): workers run the handler and write the
//! reply; the loop thread applies every registry mutation.

use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

#[cfg(feature = "pool")]
use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::{self, Outcome};
use crate::error::ServerError;
use crate::handler::Handler;
use crate::io::{set_nonblocking, shutdown_and_close};
use crate::reactor::{Event, Interest, ReadinessLoop};
use crate::registry::ClientRegistry;
use crate::signal::{self, ShutdownFlag};

#[cfg(feature = "tls")]
use crate::tls::TlsEngine;
#[cfg(feature = "tls")]
use std::path::Path;

#[cfg(feature = "pool")]
use crate::worker::{Job, WorkerOutcome, WorkerPool};

/// The server core described by this crate: a single-threaded readiness
/// loop accepting connections and dispatching readable events to a
/// user-supplied [`Handler`], with an optional worker pool offloading the
/// handler call itself.
pub struct Server {
    config: ServerConfig,
    listener_fd: RawFd,
    shutdown: ShutdownFlag,
    #[cfg(feature = "tls")]
    tls: Option<TlsEngine>,
    #[cfg(feature = "pool")]
    pool: Option<WorkerPool>,
}

impl Server {
    /// Creates the listening socket: `SO_REUSEADDR`/`SO_REUSEPORT`, bind,
    /// `SO_SNDTIMEO`/`SO_RCVTIMEO` (the latter a documented no-op once the
    /// socket is non-blocking — §9), non-blocking, and `listen` with a
    /// backlog of 511, mirroring the donor constructor.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let listener_fd = Self::build_listener(&config)?;

        #[cfg(feature = "pool")]
        let pool = if config.thread_size > 0 {
            Some(WorkerPool::new(config.thread_size))
        } else {
            None
        };

        Ok(Self {
            config,
            listener_fd,
            shutdown: ShutdownFlag::new(),
            #[cfg(feature = "tls")]
            tls: None,
            #[cfg(feature = "pool")]
            pool,
        })
    }

    /// Returns a handle that can be used to request shutdown without
    /// relying on process signals, e.g. from a test harness.
    pub fn shutdown_handle(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    fn build_listener(config: &ServerConfig) -> Result<RawFd, ServerError> {
        unsafe {
            let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return Err(ServerError::Bind(std::io::Error::last_os_error()));
            }

            let one: libc::c_int = 1;
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
            #[cfg(target_os = "linux")]
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEPORT,
                &one as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );

            let timeout = libc::timeval {
                tv_sec: config.timeout_secs as libc::time_t,
                tv_usec: 0,
            };
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_SNDTIMEO,
                &timeout as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            );
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            );

            let mut addr: libc::sockaddr_in = std::mem::zeroed();
            addr.sin_family = libc::AF_INET as libc::sa_family_t;
            addr.sin_port = config.port.to_be();
            addr.sin_addr.s_addr = u32::from(config.host).to_be();

            let bind_rc = libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            );
            if bind_rc < 0 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(ServerError::Bind(err));
            }

            set_nonblocking(fd).map_err(ServerError::Bind)?;

            let listen_rc = libc::listen(fd, 511);
            if listen_rc < 0 {
                let err = std::io::Error::last_os_error();
                libc::close(fd);
                return Err(ServerError::Listen(err));
            }

            Ok(fd)
        }
    }

    /// Returns the address actually bound, useful when `port` was `0` and
    /// the kernel picked one.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddrV4> {
        unsafe {
            let mut addr: libc::sockaddr_in = std::mem::zeroed();
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let rc = libc::getsockname(
                self.listener_fd,
                &mut addr as *mut _ as *mut libc::sockaddr,
                &mut len,
            );
            if rc < 0 {
                return Err(std::io::Error::last_os_error());
            }
            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
            let port = u16::from_be(addr.sin_port);
            Ok(std::net::SocketAddrV4::new(ip, port))
        }
    }

    /// Configures server-side TLS from a PEM certificate/key pair. Mirrors
    /// `tcp_server::set_openssl`, generalized into a `Result` the caller can
    /// act on: a bad cert/key path never aborts a running server (accepted
    /// connections just stay in plaintext, §4.2, §9), but the caller is told
    /// about it instead of the failure being silently swallowed.
    #[cfg(feature = "tls")]
    pub fn set_tls(&mut self, cert_path: &Path, key_path: &Path) -> Result<(), ServerError> {
        let engine = TlsEngine::new(
            cert_path,
            key_path,
            crate::tls::TlsVersion::Any,
            "",
            crate::tls::TlsFlags::default(),
        )
        .map_err(|e| {
            warn!(error = %e, "TLS configuration failed to load; continuing without TLS");
            ServerError::TlsConfig(e)
        })?;
        self.tls = Some(engine);
        Ok(())
    }

    /// Runs the event loop until a shutdown signal arrives. Installs
    /// `SIGTERM`/`SIGINT`/`SIGQUIT` handlers, registers the listener, and
    /// dispatches readiness events until [`ShutdownFlag::is_set`] — mirrors
    /// `tcp_server::run`/`main_loop`.
    ///
    /// `handler` is shared behind a mutex so a worker pool (§5, when
    /// `thread_size > 0`) can call it from its own threads; plaintext
    /// connections are the ones eligible for offload, since a TLS session's
    /// `rustls::ServerConnection` is not `Send` and stays on the loop thread.
    pub fn run<H: Handler + Send + 'static>(&mut self, handler: H) -> Result<(), ServerError> {
        let shutdown = self.shutdown.clone();
        signal::install(shutdown.clone()).map_err(ServerError::SignalInstall)?;

        let mut reactor = ReadinessLoop::new(self.config.max_event_size)
            .map_err(ServerError::NotifierInit)?;
        reactor
            .add(self.listener_fd, Interest::READ)
            .map_err(ServerError::NotifierInit)?;

        let mut registry = ClientRegistry::new();
        let handler = Arc::new(Mutex::new(handler));
        #[cfg(feature = "pool")]
        let mut in_flight: HashSet<RawFd> = HashSet::new();
        info!(
            host = %self.config.host,
            port = self.config.port,
            "event loop starting"
        );

        while !shutdown.is_set() {
            let listener_fd = self.listener_fd;
            let buffer_size = self.config.buffer_size;

            #[cfg(feature = "tls")]
            let tls_ready = self.tls.is_some();

            #[cfg(feature = "pool")]
            let pool_ref = self.pool.as_ref();

            let mut accepted = Vec::new();
            let mut to_erase = Vec::new();

            reactor.wait_and_dispatch(200, |event: Event| {
                if event.fd == listener_fd {
                    accepted.push(());
                    return;
                }
                if event.hangup || event.error {
                    to_erase.push(event.fd);
                    return;
                }
                if !event.readable {
                    return;
                }

                #[cfg(feature = "tls")]
                let use_tls = tls_ready
                    && registry
                        .get_meta(event.fd)
                        .map(|m| m.tls.is_some())
                        .unwrap_or(false);
                #[cfg(not(feature = "tls"))]
                let use_tls = false;

                #[cfg(feature = "pool")]
                if !use_tls {
                    if let Some(pool) = pool_ref {
                        if in_flight.contains(&event.fd) {
                            // A prior job for this fd hasn't reported its
                            // outcome yet; defer until it drains (§5).
                            return;
                        }
                        if let Some(job) = build_job(event.fd, &registry, buffer_size, &handler) {
                            in_flight.insert(event.fd);
                            pool.submit(job);
                            return;
                        }
                    }
                }

                let mut guard = handler.lock().unwrap();
                let outcome = dispatch_readable(
                    event.fd,
                    &mut registry,
                    buffer_size,
                    &mut *guard,
                    use_tls,
                    &mut to_erase,
                );

                if matches!(outcome, Outcome::Disconnect) {
                    to_erase.push(event.fd);
                }
            })
            .map_err(ServerError::NotifierInit)?;

            #[cfg(feature = "pool")]
            if let Some(pool) = &self.pool {
                for outcome in pool.drain_outcomes() {
                    apply_worker_outcome(outcome, &mut registry, &mut to_erase, &mut in_flight);
                }
            }

            for _ in accepted {
                self.accept_one(&mut reactor, &mut registry)?;
            }

            for fd in to_erase {
                let _ = reactor.remove(fd);
                registry.erase(fd);
                shutdown_and_close(fd);
                #[cfg(feature = "pool")]
                in_flight.remove(&fd);
                debug!(fd, "connection closed");
            }
        }

        info!("shutdown signal received, draining connections");
        for fd in registry.live_fds_except(-1) {
            shutdown_and_close(fd);
        }
        Ok(())
    }

    fn accept_one(
        &mut self,
        reactor: &mut ReadinessLoop,
        registry: &mut ClientRegistry,
    ) -> Result<(), ServerError> {
        loop {
            let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut addr_len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

            let fd = unsafe {
                libc::accept(
                    self.listener_fd,
                    &mut addr as *mut _ as *mut libc::sockaddr,
                    &mut addr_len,
                )
            };
            if fd < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::WouldBlock {
                    return Ok(());
                }
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                warn!(error = %err, "accept failed");
                return Ok(());
            }

            if let Err(e) = set_nonblocking(fd) {
                warn!(error = %e, "failed to set accepted socket non-blocking");
                unsafe {
                    libc::close(fd);
                }
                continue;
            }

            let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)).to_string();
            let port = u16::from_be(addr.sin_port);

            registry.insert(fd, ip.clone(), port);

            #[cfg(feature = "tls")]
            if let Some(engine) = self.tls.as_ref() {
                match engine.attach(fd) {
                    Ok(session) => {
                        if let Some(meta) = registry.get_meta_mut(fd) {
                            meta.tls = Some(session);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "TLS attach failed, dropping connection");
                        registry.erase(fd);
                        shutdown_and_close(fd);
                        continue;
                    }
                }
            }

            reactor
                .add(fd, Interest::READ | Interest::EDGE_TRIGGERED)
                .map_err(ServerError::NotifierInit)?;
            debug!(fd, %ip, port, "accepted connection");
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.listener_fd);
        }
    }
}

/// Reads, dispatches, and writes a single readable event inline on the loop
/// thread — the TLS path (session state isn't `Send`) and the fallback for
/// plaintext connections the pool declined to take.
fn dispatch_readable<H: Handler>(
    fd: RawFd,
    registry: &mut ClientRegistry,
    buffer_size: usize,
    handler: &mut H,
    use_tls: bool,
    to_erase: &mut Vec<RawFd>,
) -> Outcome {
    #[cfg(feature = "tls")]
    {
        if use_tls {
            return connection::on_readable_tls(fd, registry, buffer_size, handler, to_erase);
        }
    }
    #[cfg(not(feature = "tls"))]
    let _ = use_tls;

    connection::on_readable(fd, registry, buffer_size, handler, to_erase)
}

/// Builds a one-shot job for the worker pool: a detached `ClientInfo`
/// snapshot, a clone of the shared handler, and a closure that performs the
/// read, the handler call, and the reply write entirely off the loop thread.
/// Returns `None` if `fd` is no longer in the registry (already raced by an
/// erase this cycle).
#[cfg(feature = "pool")]
fn build_job<H: Handler + Send + 'static>(
    fd: RawFd,
    registry: &ClientRegistry,
    buffer_size: usize,
    handler: &Arc<Mutex<H>>,
) -> Option<Job> {
    let mut client = registry.get(fd)?.clone();
    client.u_size = registry.len();
    client.count += 1;
    let handler = handler.clone();

    Some(Job {
        fd,
        run: Box::new(move || {
            let mut client = client;
            match connection::read_plain(fd, buffer_size) {
                connection::ReadResult::NoData => WorkerOutcome::NoOp { fd },
                connection::ReadResult::Disconnect => WorkerOutcome::Disconnect { fd },
                connection::ReadResult::Data(bytes) => {
                    let (reply, keepalive, broadcast_filter) = {
                        let mut guard = handler.lock().unwrap();
                        connection::invoke_handler(&bytes, &mut client, &mut *guard)
                    };
                    if !connection::write_reply(fd, &reply) {
                        return WorkerOutcome::Disconnect { fd };
                    }
                    WorkerOutcome::Applied {
                        fd,
                        updated_client: client,
                        reply,
                        keepalive,
                        broadcast_filter,
                    }
                }
            }
        }),
    })
}

/// Applies a completed worker job's outcome to the registry: merges the
/// snapshot back, performs the broadcast fan-out (the worker only decided
/// *whether* to broadcast and with which filter — only the loop thread knows
/// the current live set), and queues a disconnect if warranted (§5). Clears
/// `fd` from `in_flight` in every case, since the job that held it is done.
#[cfg(feature = "pool")]
fn apply_worker_outcome(
    outcome: WorkerOutcome,
    registry: &mut ClientRegistry,
    to_erase: &mut Vec<RawFd>,
    in_flight: &mut HashSet<RawFd>,
) {
    match outcome {
        WorkerOutcome::Applied {
            fd,
            updated_client,
            reply,
            keepalive,
            broadcast_filter,
        } => {
            in_flight.remove(&fd);
            match registry.get_mut(fd) {
                Some(client) => *client = updated_client,
                None => return,
            }
            if let Some(filter) = broadcast_filter {
                let targets: Vec<RawFd> = registry
                    .live_fds_except(fd)
                    .into_iter()
                    .filter(|&target| registry.get(target).map(|c| filter(c)).unwrap_or(false))
                    .collect();
                connection::broadcast_plain(&targets, &reply, to_erase);
            }
            if !keepalive {
                to_erase.push(fd);
            }
        }
        WorkerOutcome::Disconnect { fd } => {
            in_flight.remove(&fd);
            to_erase.push(fd);
        }
        WorkerOutcome::NoOp { fd } => {
            in_flight.remove(&fd);
        }
    }
}
