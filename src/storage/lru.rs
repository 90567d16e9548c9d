// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Byte-bounded LRU store.
//!
//! Entries live in an arena ([`slab::Slab`]) and are addressed by stable
//! handles. The recency order is a doubly linked list threaded through the
//! entries' `prev`/`next` handle fields (head = least recent, tail = most
//! recent), and a `BTreeMap` indexes `key -> handle` for O(log n) lookup.
//! The arena is the sole owner of entries; list and index hold handles only,
//! so splicing an entry is two handle rewrites and can never double-free.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use slab::Slab;

#[derive(Debug)]
struct Entry {
    key: Bytes,
    value: Bytes,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Single-threaded LRU map bounded by the total byte size of keys plus
/// values. Wrap it in [`crate::storage::Storage`] for shared use.
#[derive(Debug)]
pub struct SimpleLru {
    max_bytes: usize,
    current_bytes: usize,
    entries: Slab<Entry>,
    index: BTreeMap<Bytes, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl SimpleLru {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            current_bytes: 0,
            entries: Slab::new(),
            index: BTreeMap::new(),
            head: None,
            tail: None,
        }
    }

    /// Insert `key` or replace its value, evicting from the least-recent end
    /// until the write fits. Rejects pairs that can never fit. The affected
    /// entry becomes most-recent.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> bool {
        if key.len() + value.len() > self.max_bytes {
            return false;
        }
        match self.index.get(key).copied() {
            Some(handle) => self.update(handle, value),
            None => self.insert(key, value),
        }
        true
    }

    /// Insert `key` only when absent. Present or oversized pairs are
    /// rejected.
    pub fn put_if_absent(&mut self, key: &[u8], value: &[u8]) -> bool {
        if key.len() + value.len() > self.max_bytes || self.index.contains_key(key) {
            return false;
        }
        self.insert(key, value);
        true
    }

    /// Replace the value of an existing `key`. Absent or oversized pairs are
    /// rejected.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> bool {
        if key.len() + value.len() > self.max_bytes {
            return false;
        }
        match self.index.get(key).copied() {
            Some(handle) => {
                self.update(handle, value);
                true
            },
            None => false,
        }
    }

    /// Remove `key`, reporting whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.index.get(key).copied() {
            Some(handle) => {
                self.remove(handle);
                true
            },
            None => false,
        }
    }

    /// Look up `key`. A hit promotes the entry to most-recent.
    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        let handle = self.index.get(key).copied()?;
        self.touch(handle);
        Some(self.entries[handle].value.clone())
    }

    /// Rebuild the value of an existing `key` as `front ++ old ++ back`.
    /// Rejected when the key is absent or the grown pair would never fit.
    pub fn concat(&mut self, key: &[u8], front: &[u8], back: &[u8]) -> bool {
        let handle = match self.index.get(key).copied() {
            Some(handle) => handle,
            None => return false,
        };
        let old = &self.entries[handle].value;
        let new_len = front.len() + old.len() + back.len();
        if key.len() + new_len > self.max_bytes {
            return false;
        }
        let mut grown = BytesMut::with_capacity(new_len);
        grown.extend_from_slice(front);
        grown.extend_from_slice(old);
        grown.extend_from_slice(back);
        self.store_value(handle, grown.freeze());
        true
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) {
        let need = key.len() + value.len();
        while self.current_bytes + need > self.max_bytes {
            match self.head {
                Some(victim) => self.remove(victim),
                None => break,
            }
        }

        self.current_bytes += need;
        let handle = self.entries.insert(Entry {
            key: Bytes::copy_from_slice(key),
            value: Bytes::copy_from_slice(value),
            prev: None,
            next: None,
        });
        self.index.insert(self.entries[handle].key.clone(), handle);
        self.push_tail(handle);
    }

    fn update(&mut self, handle: usize, new_value: &[u8]) {
        self.store_value(handle, Bytes::copy_from_slice(new_value));
    }

    /// Swap in a new value for `handle`, evicting least-recent entries until
    /// the delta fits. The updated entry itself is never selected as a
    /// victim: when it sits at the head, the next-least-recent entry goes
    /// instead. Runs out of victims only when the entry is the sole survivor,
    /// and then the caller-checked bound `|k|+|v| <= max_bytes` guarantees
    /// the write fits.
    fn store_value(&mut self, handle: usize, new_value: Bytes) {
        loop {
            let old_len = self.entries[handle].value.len();
            if self.current_bytes - old_len + new_value.len() <= self.max_bytes {
                break;
            }
            let victim = if self.head == Some(handle) {
                self.entries[handle].next
            } else {
                self.head
            };
            match victim {
                Some(victim) => self.remove(victim),
                None => break,
            }
        }

        let entry = &mut self.entries[handle];
        self.current_bytes = self.current_bytes - entry.value.len() + new_value.len();
        entry.value = new_value;
        self.touch(handle);
    }

    fn remove(&mut self, handle: usize) {
        self.unlink(handle);
        let entry = self.entries.remove(handle);
        self.current_bytes -= entry.key.len() + entry.value.len();
        self.index.remove(&entry.key);
    }

    fn unlink(&mut self, handle: usize) {
        let (prev, next) = (self.entries[handle].prev, self.entries[handle].next);
        match prev {
            Some(prev) => self.entries[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entries[next].prev = prev,
            None => self.tail = prev,
        }
        self.entries[handle].prev = None;
        self.entries[handle].next = None;
    }

    fn push_tail(&mut self, handle: usize) {
        self.entries[handle].prev = self.tail;
        self.entries[handle].next = None;
        match self.tail {
            Some(tail) => self.entries[tail].next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
    }

    fn touch(&mut self, handle: usize) {
        if self.tail == Some(handle) {
            return;
        }
        self.unlink(handle);
        self.push_tail(handle);
    }
}
