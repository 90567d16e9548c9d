// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod lru;

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

pub use crate::storage::lru::SimpleLru;

/// Thread-safe facade over [`SimpleLru`].
///
/// A single mutex serializes every public operation; none of them blocks
/// internally, so the critical sections stay short. The reactor and the
/// worker pool share one instance behind an `Arc`.
#[derive(Debug)]
pub struct Storage {
    inner: Mutex<SimpleLru>,
}

impl Storage {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(SimpleLru::new(max_bytes)),
        }
    }

    // A poisoned lock still guards a consistent cache: no operation has a
    // panic point between two accounting updates.
    fn lock(&self) -> MutexGuard<'_, SimpleLru> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace `key`, evicting least-recent entries as needed.
    pub fn put(&self, key: &[u8], value: &[u8]) -> bool {
        self.lock().put(key, value)
    }

    /// Insert `key` only when it is not present yet.
    pub fn put_if_absent(&self, key: &[u8], value: &[u8]) -> bool {
        self.lock().put_if_absent(key, value)
    }

    /// Replace the value of an existing `key`; absent keys are rejected.
    pub fn set(&self, key: &[u8], value: &[u8]) -> bool {
        self.lock().set(key, value)
    }

    /// Remove `key`, reporting whether it was present.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.lock().delete(key)
    }

    /// Look up `key`, promoting the entry to most-recent on a hit.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.lock().get(key)
    }

    /// Atomic read-modify-write: rebuild the value of an existing `key` as
    /// `front ++ old ++ back` under one lock acquisition. Backs the
    /// append/prepend commands.
    pub fn concat(&self, key: &[u8], front: &[u8], back: &[u8]) -> bool {
        self.lock().concat(key, front, back)
    }

    pub fn current_bytes(&self) -> usize {
        self.lock().current_bytes()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
