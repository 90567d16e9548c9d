// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Readiness-driven reactor.
//!
//! One thread owns the poller and every connection. The listener and a
//! wakeup channel get the two reserved tokens; connections live in a slab
//! whose keys double as their tokens. In pooled mode, workers finish
//! commands off-thread and ring the waker so the reactor re-arms writability
//! for the connections that gained committed replies.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Context, Result};
use mio::{Events, Interest, Poll, Token, Waker, net::TcpListener};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::{
    cfg::{config::Config, enums::Threading},
    concurrency::Executor,
    network::connection::Connection,
    storage::Storage,
};

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);

/// Shared collaborators handed to connections on every event.
pub(crate) struct ServerCtx {
    pub(crate) storage: Arc<Storage>,
    pub(crate) pool: Option<Arc<Executor>>,
    pub(crate) notifier: Notifier,
}

/// Wakes the reactor and records which connections have news.
#[derive(Clone)]
pub(crate) struct Notifier {
    waker: Arc<Waker>,
    pending: Arc<Mutex<Vec<Token>>>,
}

impl Notifier {
    fn new(waker: Arc<Waker>) -> Self {
        Self {
            waker,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn notify(&self, token: Token) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token);
        if let Err(e) = self.waker.wake() {
            warn!("reactor wakeup failed: {e}");
        }
    }

    fn drain(&self) -> Vec<Token> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Cloneable handle that makes [`Server::run`] return.
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Err(e) = self.waker.wake() {
            warn!("shutdown wakeup failed: {e}");
        }
    }
}

pub struct Server {
    poll: Poll,
    listener: TcpListener,
    connections: Slab<Connection>,
    ctx: ServerCtx,
    max_connections: usize,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Server {
    /// Bind the listener and assemble the reactor. In pooled mode the worker
    /// pool is started here as well.
    pub fn new(cfg: &Config, storage: Arc<Storage>) -> Result<Self> {
        let addr = cfg.listen_addr()?;
        let listener = bind_listener(addr)
            .with_context(|| format!("failed to bind listener on {addr}"))?;

        let poll = Poll::new().context("failed to create poller")?;
        let mut listener = listener;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("failed to register listener")?;
        let waker =
            Arc::new(Waker::new(poll.registry(), WAKER).context("failed to create waker")?);

        let pool = match cfg.network.threading {
            Threading::Single => None,
            Threading::Pooled => {
                let pool = Executor::new(
                    "memcache-pool",
                    cfg.pool.low_watermark,
                    cfg.pool.high_watermark,
                    cfg.pool.max_queue,
                    cfg.pool.idle_time,
                );
                pool.start()?;
                Some(Arc::new(pool))
            },
        };

        Ok(Self {
            poll,
            listener,
            connections: Slab::new(),
            ctx: ServerCtx {
                storage,
                pool,
                notifier: Notifier::new(Arc::clone(&waker)),
            },
            max_connections: cfg.network.max_connections,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Address the listener actually bound; with port 0 this is where the
    /// kernel placed us.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Blocking reactor loop. Returns after [`ServerHandle::shutdown`].
    pub fn run(mut self) -> Result<()> {
        let mode = if self.ctx.pool.is_some() {
            "pooled"
        } else {
            "single"
        };
        info!(addr = %self.local_addr()?, mode, "server started");

        let mut events = Events::with_capacity(1024);
        'reactor: loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("poll failed");
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_pending(),
                    WAKER => {
                        if self.shutdown.load(Ordering::Relaxed) {
                            break 'reactor;
                        }
                        self.rearm_from_workers();
                    },
                    token => self.on_connection_event(token, event),
                }
            }
        }

        self.teardown();
        Ok(())
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.connections.len() >= self.max_connections {
                        warn!(%peer, "connection limit reached, dropping socket");
                        continue;
                    }
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key());
                    let mut conn = Connection::new(stream, token);
                    match self.poll.registry().register(
                        conn.stream_mut(),
                        token,
                        Interest::READABLE,
                    ) {
                        Ok(()) => {
                            entry.insert(conn);
                            debug!(%peer, token = token.0, "accepted connection");
                        },
                        Err(e) => warn!(%peer, "failed to register connection: {e}"),
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                },
            }
        }
    }

    fn on_connection_event(&mut self, token: Token, event: &mio::event::Event) {
        let Some(conn) = self.connections.get_mut(token.0) else {
            return;
        };

        if event.is_readable() || event.is_read_closed() {
            conn.do_read(&self.ctx);
        }
        if conn.is_alive() && event.is_writable() {
            conn.do_write();
        }

        if conn.is_alive() {
            conn.sync_interest(self.poll.registry());
        }
        if !conn.is_alive() {
            self.close_connection(token);
        }
    }

    /// Workers committed replies since the last tick: re-arm writability for
    /// the connections they named.
    fn rearm_from_workers(&mut self) {
        for token in self.ctx.notifier.drain() {
            if let Some(conn) = self.connections.get_mut(token.0)
                && conn.is_alive()
                && conn.outbound_ready()
            {
                conn.mark_writable();
                conn.sync_interest(self.poll.registry());
            }
        }
    }

    fn close_connection(&mut self, token: Token) {
        if self.connections.contains(token.0) {
            let mut conn = self.connections.remove(token.0);
            conn.deregister(self.poll.registry());
            debug!(token = token.0, "connection closed");
        }
    }

    fn teardown(&mut self) {
        let tokens: Vec<Token> = self.connections.iter().map(|(k, _)| Token(k)).collect();
        for token in tokens {
            self.close_connection(token);
        }
        if let Some(pool) = &self.ctx.pool {
            pool.stop(true);
        }
        info!("server stopped");
    }
}

/// Non-blocking TCP listener with `SO_REUSEADDR`.
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(TcpListener::from_std(socket.into()))
}
