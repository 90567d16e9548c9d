// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-socket read/write state machine.
//!
//! A connection starts out interested in readability only. Completed
//! commands produce replies in a slot queue; once at least one reply is
//! committed the connection also asks for writability, and it drops that
//! interest again when the queue drains. All reply bytes leave through one
//! vectored write per writable event, with partial drains accounted for by a
//! byte offset into the head reply.

use std::{
    collections::VecDeque,
    io::{self, IoSlice, Read, Write},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{Bytes, BytesMut};
use mio::{Interest, Registry, Token, net::TcpStream};
use tracing::{debug, info, warn};

use crate::{
    execute::Execute,
    network::server::ServerCtx,
    protocol::{Command, ParseOutcome, Parser},
};

/// Staging buffer for raw socket reads. Command lines must fit in here;
/// inline bodies stream through it chunk by chunk.
pub(crate) const STAGING_LEN: usize = 4096;

const SERVER_ERROR_BUSY: Bytes = Bytes::from_static(b"SERVER_ERROR busy\r\n");

/// Outcome of one drain attempt over the outbound queue.
enum WriteProgress {
    /// Nothing further to transmit right now.
    Drained,
    /// Committed bytes remain after a partial write.
    Pending,
}

/// Reply queue shared between the reactor and pool workers.
///
/// Replies occupy slots in submission order. The reactor pushes ready
/// replies directly; offloaded commands reserve an empty slot first and a
/// worker commits the reply later. Only the contiguous committed prefix is
/// ever written, which keeps replies on the wire in the order their commands
/// were read regardless of worker scheduling.
#[derive(Debug)]
pub(crate) struct Outbound {
    state: Mutex<OutboundState>,
}

#[derive(Debug)]
struct OutboundState {
    slots: VecDeque<Option<Bytes>>,
    /// Bytes of the committed prefix already written to the socket but not
    /// yet popped (an offset into the head slot between drains).
    head_sent: usize,
    /// Absolute index of the next slot to be pushed.
    next_ticket: u64,
}

impl OutboundState {
    fn base(&self) -> u64 {
        self.next_ticket - self.slots.len() as u64
    }

    /// Pop committed head slots that are fully transmitted, folding their
    /// lengths out of `head_sent`. Zero-length replies (noreply commands)
    /// fall out here without touching the socket.
    fn pop_drained(&mut self) {
        while let Some(Some(head)) = self.slots.front() {
            if self.head_sent >= head.len() {
                self.head_sent -= head.len();
                self.slots.pop_front();
            } else {
                break;
            }
        }
    }

    fn has_ready(&self) -> bool {
        self.slots
            .front()
            .is_some_and(|slot| slot.as_ref().is_some_and(|b| b.len() > self.head_sent))
    }
}

impl Outbound {
    fn new() -> Self {
        Self {
            state: Mutex::new(OutboundState {
                slots: VecDeque::new(),
                head_sent: 0,
                next_ticket: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboundState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply that is ready right away.
    pub(crate) fn push_ready(&self, reply: Bytes) {
        let mut st = self.lock();
        st.slots.push_back(Some(reply));
        st.next_ticket += 1;
    }

    /// Reserve the next slot for a reply that a worker will deliver later.
    pub(crate) fn reserve(&self) -> u64 {
        let mut st = self.lock();
        st.slots.push_back(None);
        st.next_ticket += 1;
        st.next_ticket - 1
    }

    /// Fill a previously reserved slot.
    pub(crate) fn commit(&self, ticket: u64, reply: Bytes) {
        let mut st = self.lock();
        let base = st.base();
        if ticket < base {
            // The slot is already gone; the connection went away.
            return;
        }
        let at = (ticket - base) as usize;
        if let Some(slot) = st.slots.get_mut(at) {
            *slot = Some(reply);
        }
    }

    pub(crate) fn has_ready(&self) -> bool {
        let mut st = self.lock();
        // Fold out empty committed heads (noreply commands) so they cannot
        // mask a transmittable reply behind them.
        st.pop_drained();
        st.has_ready()
    }

    /// Drain as much of the committed prefix as one vectored write allows.
    fn write_to(&self, stream: &mut TcpStream) -> io::Result<WriteProgress> {
        // Clone the committed prefix out so no lock is held across the
        // syscall; workers only append or fill slots, never disturb these.
        let (chunks, head_sent) = {
            let mut st = self.lock();
            st.pop_drained();
            let chunks: Vec<Bytes> = st
                .slots
                .iter()
                .map_while(|slot| slot.clone())
                .collect();
            (chunks, st.head_sent)
        };
        if chunks.is_empty() {
            return Ok(WriteProgress::Drained);
        }

        let mut slices = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let skip = if i == 0 { head_sent } else { 0 };
            if chunk.len() > skip {
                slices.push(IoSlice::new(&chunk[skip..]));
            }
        }
        let written = stream.write_vectored(&slices)?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "vectored write made no progress",
            ));
        }

        let mut st = self.lock();
        st.head_sent += written;
        st.pop_drained();
        if st.has_ready() {
            Ok(WriteProgress::Pending)
        } else {
            Ok(WriteProgress::Drained)
        }
    }
}

pub(crate) struct Connection {
    stream: TcpStream,
    token: Token,
    staging: Box<[u8; STAGING_LEN]>,
    live: usize,
    parser: Parser,
    current: Option<Command>,
    body: BytesMut,
    body_remaining: usize,
    outbound: Arc<Outbound>,
    registered: Interest,
    want_write: bool,
    alive: bool,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, token: Token) -> Self {
        Self {
            stream,
            token,
            staging: Box::new([0; STAGING_LEN]),
            live: 0,
            parser: Parser::new(),
            current: None,
            body: BytesMut::new(),
            body_remaining: 0,
            outbound: Arc::new(Outbound::new()),
            registered: Interest::READABLE,
            want_write: false,
            alive: true,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn outbound_ready(&self) -> bool {
        self.outbound.has_ready()
    }

    pub(crate) fn mark_writable(&mut self) {
        self.want_write = true;
    }

    /// Pull bytes until the socket goes quiescent, feeding the parser and
    /// executing completed commands along the way.
    pub(crate) fn do_read(&mut self, ctx: &ServerCtx) {
        loop {
            debug_assert!(self.live < STAGING_LEN, "staging buffer left full");
            match self.stream.read(&mut self.staging[self.live..]) {
                Ok(0) => {
                    info!(token = self.token.0, "peer closed");
                    self.alive = false;
                    return;
                },
                Ok(n) => {
                    self.live += n;
                    if !self.drain_staging(ctx) {
                        self.alive = false;
                        return;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    info!(token = self.token.0, "read failed: {e}");
                    self.alive = false;
                    return;
                },
            }
        }
    }

    /// Run the parse/collect/execute micro-loop over the staged bytes.
    /// Returns false on an unrecoverable protocol violation.
    fn drain_staging(&mut self, ctx: &ServerCtx) -> bool {
        while self.live > 0 {
            if self.current.is_none() {
                match self.parser.parse(&self.staging[..self.live]) {
                    Err(e) => {
                        warn!(token = self.token.0, "protocol error: {e}");
                        return false;
                    },
                    Ok(ParseOutcome::Incomplete) => break,
                    Ok(ParseOutcome::Complete { consumed, command }) => {
                        debug!(
                            token = self.token.0,
                            consumed,
                            body = command.body_len(),
                            "parsed command"
                        );
                        self.parser.reset();
                        self.body_remaining = command.body_len();
                        self.body.clear();
                        self.current = Some(command);
                        self.compact(consumed);
                    },
                }
            }

            if self.current.is_some() && self.body_remaining > 0 {
                let take = self.body_remaining.min(self.live);
                self.body.extend_from_slice(&self.staging[..take]);
                self.compact(take);
                self.body_remaining -= take;
            }

            if self.body_remaining == 0
                && let Some(command) = self.current.take()
            {
                self.finish_command(ctx, command);
            }
        }
        true
    }

    /// Execute a fully collected command inline, or hand it to the pool with
    /// a reserved reply slot.
    fn finish_command(&mut self, ctx: &ServerCtx, command: Command) {
        let body = self.body.split().freeze();
        match &ctx.pool {
            None => {
                if let Some(reply) = command.execute(&ctx.storage, &body) {
                    self.outbound.push_ready(reply);
                    self.want_write = true;
                }
            },
            Some(pool) => {
                let ticket = self.outbound.reserve();
                let outbound = Arc::clone(&self.outbound);
                let storage = Arc::clone(&ctx.storage);
                let notifier = ctx.notifier.clone();
                let token = self.token;
                let accepted = pool.execute(move || {
                    let reply = command.execute(&storage, &body).unwrap_or_default();
                    outbound.commit(ticket, reply);
                    notifier.notify(token);
                });
                if !accepted {
                    debug!(token = self.token.0, "pool rejected command");
                    self.outbound.commit(ticket, SERVER_ERROR_BUSY);
                    self.want_write = true;
                }
            },
        }
    }

    fn compact(&mut self, consumed: usize) {
        self.staging.copy_within(consumed..self.live, 0);
        self.live -= consumed;
    }

    /// Flush the committed reply prefix until the socket pushes back or the
    /// queue drains; readiness is edge-style, so stopping early would stall.
    /// Writable interest is kept only while committed bytes remain; a head
    /// slot still waiting on a worker re-arms through the reactor waker
    /// instead.
    pub(crate) fn do_write(&mut self) {
        loop {
            match self.outbound.write_to(&mut self.stream) {
                Ok(WriteProgress::Drained) => {
                    self.want_write = false;
                    return;
                },
                Ok(WriteProgress::Pending) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    info!(token = self.token.0, "write failed: {e}");
                    self.alive = false;
                    return;
                },
            }
        }
    }

    /// Re-register when the desired interest set changed.
    pub(crate) fn sync_interest(&mut self, registry: &Registry) {
        let desired = if self.want_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if desired == self.registered {
            return;
        }
        match registry.reregister(&mut self.stream, self.token, desired) {
            Ok(()) => self.registered = desired,
            Err(e) => {
                warn!(token = self.token.0, "reregister failed: {e}");
                self.alive = false;
            },
        }
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            debug!(token = self.token.0, "deregister failed: {e}");
        }
    }
}
