// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Accept loop, worker registry, and coordinated shutdown.
//!
//! The supervisor owns the listening socket, the shared store, the registry
//! of in-flight connection workers, and the timestamp task handle. It is the
//! only thread that mutates the registry. Reaping is best-effort after each
//! accept-loop pass: finished workers are joined and removed, so the
//! registry is bounded by concurrently-active connections plus the
//! recently-finished ones not yet reaped.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::Config;
use crate::logging::{Facility, Logger};
use crate::store::SharedStore;
use crate::worker::WorkerHandle;
use crate::{log_debug, log_error, log_notice, log_warning, signals, timestamp, worker};

/// Listen backlog.
const LISTEN_BACKLOG: i32 = 10;
/// Accept poll interval; bounds shutdown latency of the accept loop.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type WorkerId = u64;

pub struct Supervisor {
    listener: TcpListener,
    store: SharedStore,
    registry: HashMap<WorkerId, WorkerHandle>,
    next_worker_id: WorkerId,
    shutdown: Arc<AtomicBool>,
    timestamp_handle: Option<JoinHandle<()>>,
    timestamp_period: Duration,
    /// The external-device variant does its own temporal bookkeeping.
    timestamp_enabled: bool,
    logger: Logger,
}

/// Create the listening socket: IPv4, `SO_REUSEADDR`, backlog 10,
/// nonblocking so the accept loop can poll for termination.
///
/// Any socket/bind/listen failure here is a startup failure: the caller
/// exits nonzero, nothing has been spawned yet. Kept separate from
/// [`Supervisor::bind`] so daemonization can happen between binding (whose
/// failure must reach the launcher as a nonzero exit) and the spawning of
/// any thread.
pub fn bind_listener(config: &Config) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .context("socket could not be created")?;
    socket
        .set_reuse_address(true)
        .context("socket options could not be set")?;
    let address = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    socket
        .bind(&address.into())
        .with_context(|| format!("socket could not bind to {address}"))?;
    socket
        .listen(LISTEN_BACKLOG)
        .context("socket could not listen")?;
    socket
        .set_nonblocking(true)
        .context("socket could not be made nonblocking")?;
    Ok(socket.into())
}

impl Supervisor {
    /// Bind a listener and build the supervisor around it.
    pub fn bind(config: &Config, store: SharedStore, logger: Logger) -> Result<Self> {
        Ok(Self::new(bind_listener(config)?, config, store, logger))
    }

    /// Build the supervisor around an already-bound listener.
    pub fn new(listener: TcpListener, config: &Config, store: SharedStore, logger: Logger) -> Self {
        Self {
            listener,
            store,
            registry: HashMap::new(),
            next_worker_id: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
            timestamp_handle: None,
            timestamp_period: config.timestamp_period(),
            timestamp_enabled: config.device.is_none(),
            logger,
        }
    }

    /// Address the listener actually bound to (port 0 resolves here).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener address unavailable")
    }

    /// Cancellation token shared with every worker and the timestamp task.
    /// Storing `true` initiates the same coordinated shutdown as a signal.
    pub fn shutdown_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until a termination request, then shut down coordinated:
    /// stop accepting, broadcast cancellation, join every worker and the
    /// timestamp task, release the store.
    pub fn run(mut self) -> Result<()> {
        if self.timestamp_enabled {
            self.timestamp_handle = Some(timestamp::spawn(
                Arc::clone(&self.store),
                Arc::clone(&self.shutdown),
                self.timestamp_period,
                self.logger.clone(),
            )?);
        }

        log_notice!(
            self.logger,
            Facility::Supervisor,
            &format!(
                "Listening for connections on {}",
                self.local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| "<unknown>".to_string())
            )
        );

        loop {
            if self.shutdown.load(Ordering::Relaxed) || signals::termination_requested() {
                break;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // The accepted socket must block; only the listener polls.
                    if let Err(e) = stream.set_nonblocking(false) {
                        log_error!(
                            self.logger,
                            Facility::Supervisor,
                            &format!("Could not configure socket for {peer}: {e}")
                        );
                        continue;
                    }
                    log_notice!(
                        self.logger,
                        Facility::Supervisor,
                        &format!("Accepted connection from {peer}")
                    );
                    match worker::spawn(
                        stream,
                        peer,
                        Arc::clone(&self.store),
                        Arc::clone(&self.shutdown),
                        self.logger.clone(),
                    ) {
                        Ok(handle) => {
                            let id = self.next_worker_id;
                            self.next_worker_id += 1;
                            self.registry.insert(id, handle);
                        }
                        // Spawn failure aborts only this connection.
                        Err(e) => log_error!(
                            self.logger,
                            Facility::Supervisor,
                            &format!("Could not start worker for {peer}: {e:#}")
                        ),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Transient accept failure (e.g. aborted handshake);
                    // the listener itself is still good.
                    log_warning!(
                        self.logger,
                        Facility::Supervisor,
                        &format!("Accept failed: {e}")
                    );
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }

            self.reap_finished();
        }

        self.shutdown_all();
        Ok(())
    }

    /// Join and remove every worker whose thread has finished.
    fn reap_finished(&mut self) {
        let finished: Vec<WorkerId> = self
            .registry
            .iter()
            .filter(|(_, handle)| handle.shared.done.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(handle) = self.registry.remove(&id) {
                let peer = handle.peer;
                let failed = handle.shared.failed.load(Ordering::Acquire);
                if handle.handle.join().is_err() {
                    log_warning!(
                        self.logger,
                        Facility::Supervisor,
                        &format!("Worker for {peer} panicked")
                    );
                } else {
                    log_debug!(
                        self.logger,
                        Facility::Supervisor,
                        &format!("Reaped worker for {peer} (failed: {failed})")
                    );
                }
            }
        }
    }

    /// Broadcast cancellation and join everything. The store (and with it
    /// every remaining entry's storage) is released when `self` drops.
    fn shutdown_all(&mut self) {
        log_notice!(
            self.logger,
            Facility::Supervisor,
            "Termination requested, shutting down"
        );
        self.shutdown.store(true, Ordering::Relaxed);

        for (_, handle) in self.registry.drain() {
            let peer = handle.peer;
            if handle.handle.join().is_err() {
                log_warning!(
                    self.logger,
                    Facility::Supervisor,
                    &format!("Worker for {peer} panicked during shutdown")
                );
            }
        }
        if let Some(handle) = self.timestamp_handle.take() {
            if handle.join().is_err() {
                log_warning!(
                    self.logger,
                    Facility::Supervisor,
                    "Timestamp task panicked during shutdown"
                );
            }
        }

        log_notice!(self.logger, Facility::Supervisor, "Shutdown complete");
    }
}
