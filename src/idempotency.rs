// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Idempotency-key deduplication.
//!
//! The [`IdempotencyCache`] maps a client-supplied key to the single
//! [`TransferHandle`] created the first time the key was seen. Concurrent
//! callers with the same unseen key race on the key's [`DashMap`] shard entry,
//! so exactly one of them runs the factory and all of them get its handle.
//! Unrelated keys only contend when they hash to the same shard.
//!
//! Outcomes are memoized whether they succeed or fail. Entries expire after
//! a sliding period of inactivity; expiry is checked lazily on access, with an
//! occasional sweep on insert to release memory held by abandoned keys.

use crate::error::TransferError;
use crate::worker_pool::TransferHandle;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Upper bound between two full expiry sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct CacheEntry {
    handle: TransferHandle,
    /// Nanoseconds since the cache epoch.
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(handle: TransferHandle, now: u64) -> Self {
        Self {
            handle,
            last_access: AtomicU64::new(now),
        }
    }

    fn touch(&self, now: u64) {
        self.last_access.fetch_max(now, Ordering::AcqRel);
    }

    fn is_expired(&self, now: u64, ttl: u64) -> bool {
        now.saturating_sub(self.last_access.load(Ordering::Acquire)) > ttl
    }
}

/// Single-flight map from idempotency key to transfer outcome.
#[derive(Debug)]
pub struct IdempotencyCache {
    entries: DashMap<String, CacheEntry>,
    ttl: u64,
    sweep_interval: u64,
    next_sweep: AtomicU64,
    epoch: Instant,
}

impl IdempotencyCache {
    /// Creates an empty cache whose entries expire after `ttl` without access.
    pub fn new(ttl: Duration) -> Self {
        let sweep_interval = nanos(ttl.min(MAX_SWEEP_INTERVAL));
        Self {
            entries: DashMap::new(),
            ttl: nanos(ttl),
            sweep_interval,
            next_sweep: AtomicU64::new(sweep_interval),
            epoch: Instant::now(),
        }
    }

    /// Returns the handle stored under `key`, creating it with `factory` if
    /// the key is unseen or expired.
    ///
    /// Every call refreshes the key's expiry. `factory` runs at most once per
    /// live key, even under concurrent calls.
    pub fn get_or_create<F>(&self, key: &str, factory: F) -> TransferHandle
    where
        F: FnOnce() -> TransferHandle,
    {
        match self.get_or_try_create(key, || Ok(factory())) {
            Ok(handle) => handle,
            Err(error) => TransferHandle::resolved(Err(error)),
        }
    }

    /// Fallible variant of [`IdempotencyCache::get_or_create`].
    ///
    /// # Errors
    ///
    /// Returns the factory's error, in which case nothing is stored and a
    /// later call with the same key runs its factory again.
    pub fn get_or_try_create<F>(&self, key: &str, factory: F) -> Result<TransferHandle, TransferError>
    where
        F: FnOnce() -> Result<TransferHandle, TransferError>,
    {
        let now = self.now();
        if let Some(handle) = self.lookup(key, now) {
            return Ok(handle);
        }

        let handle = match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now, self.ttl) {
                    let handle = factory()?;
                    occupied.insert(CacheEntry::new(handle.clone(), now));
                    handle
                } else {
                    occupied.get().touch(now);
                    occupied.get().handle.clone()
                }
            }
            Entry::Vacant(vacant) => {
                let handle = factory()?;
                vacant.insert(CacheEntry::new(handle.clone(), now));
                handle
            }
        };

        self.maybe_sweep(now);
        Ok(handle)
    }

    /// Read-locked fast path for keys that are already live.
    fn lookup(&self, key: &str, now: u64) -> Option<TransferHandle> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(now, self.ttl) {
            return None;
        }
        entry.touch(now);
        Some(entry.handle.clone())
    }

    fn maybe_sweep(&self, now: u64) {
        let due = self.next_sweep.load(Ordering::Acquire);
        if now < due {
            return;
        }
        if self
            .next_sweep
            .compare_exchange(due, now + self.sweep_interval, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.evict_at(now);
        }
    }

    /// Drops every entry that has been idle for longer than the TTL.
    pub fn evict_expired(&self) -> usize {
        self.evict_at(self.now())
    }

    fn evict_at(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, self.ttl));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(evicted, "evicted expired idempotency keys");
        }
        evicted
    }

    /// Number of stored keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn now(&self) -> u64 {
        nanos(self.epoch.elapsed())
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
