// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Incremental parser for the memcached text protocol.
//!
//! The parser recognizes one command header per call. It never consumes
//! partial headers: when the slice holds no complete `\r\n`-terminated line
//! it reports [`ParseOutcome::Incomplete`] and the caller simply retries once
//! more bytes arrive. Inline value bytes are *not* consumed here; a storage
//! command only declares how many body bytes (value plus trailing CRLF) the
//! connection must collect before the command can run.

use bytes::Bytes;
use enum_dispatch::enum_dispatch;
use thiserror::Error;

use crate::{execute::Execute, storage::Storage};

/// Upper bound for one command line. Matches the connection staging buffer:
/// a header that cannot fit there can never complete.
pub const MAX_LINE: usize = 4096;

/// Returned when a command line exceeds [`MAX_LINE`] bytes without a
/// terminator. Unlike a bad header this is not survivable: the stream can
/// no longer be re-synchronized, so the connection must close.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("command line exceeds {0} bytes without CRLF")]
pub struct LineTooLong(pub usize);

/// Storage command family. All five share one wire shape and differ only in
/// how the executor maps them onto the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
}

/// `<kind> <key> <flags> <exptime> <bytes> [noreply]` followed by an inline
/// body of `bytes` value bytes plus CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCommand {
    pub kind: StoreKind,
    pub key: Bytes,
    pub flags: u32,
    pub exptime: i64,
    pub bytes: usize,
    pub noreply: bool,
}

/// `get <key> [<key> ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCommand {
    pub keys: Vec<Bytes>,
}

/// `delete <key> [noreply]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCommand {
    pub key: Bytes,
    pub noreply: bool,
}

/// Any complete line the grammar does not recognize. Kept as a descriptor so
/// the executor can answer `ERROR` while the connection stays alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownCommand;

#[enum_dispatch(Execute)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(GetCommand),
    Store(StoreCommand),
    Delete(DeleteCommand),
    Unknown(UnknownCommand),
}

impl Command {
    /// Number of inline body bytes that must follow the header on the wire,
    /// including the trailing CRLF.
    pub fn body_len(&self) -> usize {
        match self {
            Command::Store(cmd) => cmd.bytes + 2,
            _ => 0,
        }
    }

    pub fn noreply(&self) -> bool {
        match self {
            Command::Store(cmd) => cmd.noreply,
            Command::Delete(cmd) => cmd.noreply,
            _ => false,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// No complete header in the slice yet; nothing was consumed.
    Incomplete,
    /// One header recognized in the first `consumed` bytes.
    Complete { consumed: usize, command: Command },
}

/// Carried per-connection parser state.
///
/// The only state is a resume point for the CRLF scan, so a header split
/// across many reads is not re-scanned from the start each time. The memo is
/// valid because the caller never compacts the buffer between incomplete
/// attempts; [`Parser::reset`] must be called once the header is consumed.
#[derive(Debug, Default)]
pub struct Parser {
    scanned: usize,
}

impl Parser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.scanned = 0;
    }

    /// Try to recognize one command header at the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> Result<ParseOutcome, LineTooLong> {
        // Step one byte back so a CR sitting at the previous scan boundary is
        // paired with a newly arrived LF.
        let resume = self.scanned.saturating_sub(1);
        let found = buf[resume..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|at| resume + at);

        match found {
            None => {
                self.scanned = buf.len();
                if buf.len() >= MAX_LINE {
                    return Err(LineTooLong(MAX_LINE));
                }
                Ok(ParseOutcome::Incomplete)
            },
            Some(eol) => {
                self.scanned = 0;
                Ok(ParseOutcome::Complete {
                    consumed: eol + 2,
                    command: parse_line(&buf[..eol]),
                })
            },
        }
    }
}

fn parse_line(line: &[u8]) -> Command {
    let mut tokens = line.split(|&b| b == b' ').filter(|t| !t.is_empty());
    let verb = match tokens.next() {
        Some(verb) => verb,
        None => return Command::Unknown(UnknownCommand),
    };

    match verb {
        b"get" => {
            let keys: Vec<Bytes> = tokens.map(Bytes::copy_from_slice).collect();
            if keys.is_empty() {
                Command::Unknown(UnknownCommand)
            } else {
                Command::Get(GetCommand { keys })
            }
        },
        b"set" => parse_store(StoreKind::Set, tokens),
        b"add" => parse_store(StoreKind::Add, tokens),
        b"replace" => parse_store(StoreKind::Replace, tokens),
        b"append" => parse_store(StoreKind::Append, tokens),
        b"prepend" => parse_store(StoreKind::Prepend, tokens),
        b"delete" => parse_delete(tokens),
        _ => Command::Unknown(UnknownCommand),
    }
}

fn parse_store<'a, I>(kind: StoreKind, mut tokens: I) -> Command
where I: Iterator<Item = &'a [u8]> {
    let header = (|| {
        let key = tokens.next()?;
        let flags: u32 = parse_num(tokens.next()?)?;
        let exptime: i64 = parse_num(tokens.next()?)?;
        let bytes: usize = parse_num(tokens.next()?)?;
        let noreply = match tokens.next() {
            None => false,
            Some(b"noreply") => true,
            Some(_) => return None,
        };
        if tokens.next().is_some() {
            return None;
        }
        Some(StoreCommand {
            kind,
            key: Bytes::copy_from_slice(key),
            flags,
            exptime,
            bytes,
            noreply,
        })
    })();

    match header {
        Some(cmd) => Command::Store(cmd),
        None => Command::Unknown(UnknownCommand),
    }
}

fn parse_delete<'a, I>(mut tokens: I) -> Command
where I: Iterator<Item = &'a [u8]> {
    let header = (|| {
        let key = tokens.next()?;
        let noreply = match tokens.next() {
            None => false,
            Some(b"noreply") => true,
            Some(_) => return None,
        };
        if tokens.next().is_some() {
            return None;
        }
        Some(DeleteCommand {
            key: Bytes::copy_from_slice(key),
            noreply,
        })
    })();

    match header {
        Some(cmd) => Command::Delete(cmd),
        None => Command::Unknown(UnknownCommand),
    }
}

fn parse_num<T: std::str::FromStr>(token: &[u8]) -> Option<T> {
    std::str::from_utf8(token).ok()?.parse().ok()
}
