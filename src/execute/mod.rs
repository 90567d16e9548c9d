// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Maps parsed commands onto the cache and renders text-protocol replies.
//!
//! Reply shapes follow the memcached conventions: `STORED`, `NOT_STORED`,
//! `DELETED`, `NOT_FOUND`, `VALUE ... END`, `ERROR`. Every reply is a single
//! contiguous `Bytes` so the connection can queue it for a vectored write.

use bytes::{BufMut, Bytes, BytesMut};
use enum_dispatch::enum_dispatch;

use crate::{
    protocol::{DeleteCommand, GetCommand, StoreCommand, StoreKind, UnknownCommand},
    storage::Storage,
};

pub const STORED: Bytes = Bytes::from_static(b"STORED\r\n");
pub const NOT_STORED: Bytes = Bytes::from_static(b"NOT_STORED\r\n");
pub const DELETED: Bytes = Bytes::from_static(b"DELETED\r\n");
pub const NOT_FOUND: Bytes = Bytes::from_static(b"NOT_FOUND\r\n");
pub const ERROR: Bytes = Bytes::from_static(b"ERROR\r\n");
pub const BAD_DATA_CHUNK: Bytes = Bytes::from_static(b"CLIENT_ERROR bad data chunk\r\n");

/// Runs a command against the cache and produces the reply bytes, or `None`
/// for commands flagged `noreply`. `body` is the inline body collected by the
/// connection: exactly the declared value bytes plus the trailing CRLF for
/// storage commands, empty otherwise.
#[enum_dispatch]
pub trait Execute {
    fn execute(&self, storage: &Storage, body: &[u8]) -> Option<Bytes>;
}

impl Execute for GetCommand {
    fn execute(&self, storage: &Storage, _body: &[u8]) -> Option<Bytes> {
        let mut out = BytesMut::new();
        for key in &self.keys {
            if let Some(value) = storage.get(key) {
                out.put_slice(b"VALUE ");
                out.put_slice(key);
                // Flags are not retained by the store; echo the default.
                out.put_slice(format!(" 0 {}\r\n", value.len()).as_bytes());
                out.put_slice(&value);
                out.put_slice(b"\r\n");
            }
        }
        out.put_slice(b"END\r\n");
        Some(out.freeze())
    }
}

impl Execute for StoreCommand {
    fn execute(&self, storage: &Storage, body: &[u8]) -> Option<Bytes> {
        let value = body.get(..self.bytes);
        let terminator = body.get(self.bytes..);

        let reply = match (value, terminator) {
            (Some(value), Some(t)) if t == b"\r\n" => {
                let stored = match self.kind {
                    StoreKind::Set => storage.put(&self.key, value),
                    StoreKind::Add => storage.put_if_absent(&self.key, value),
                    StoreKind::Replace => storage.set(&self.key, value),
                    StoreKind::Append => storage.concat(&self.key, b"", value),
                    StoreKind::Prepend => storage.concat(&self.key, value, b""),
                };
                if stored { STORED } else { NOT_STORED }
            },
            // The declared byte count and the actual chunk disagree.
            _ => BAD_DATA_CHUNK,
        };

        if self.noreply { None } else { Some(reply) }
    }
}

impl Execute for DeleteCommand {
    fn execute(&self, storage: &Storage, _body: &[u8]) -> Option<Bytes> {
        let reply = if storage.delete(&self.key) {
            DELETED
        } else {
            NOT_FOUND
        };
        if self.noreply { None } else { Some(reply) }
    }
}

impl Execute for UnknownCommand {
    fn execute(&self, _storage: &Storage, _body: &[u8]) -> Option<Bytes> {
        Some(ERROR)
    }
}
