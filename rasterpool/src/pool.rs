//  Copyright 2025 rasterpool Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! The dataset handle pool.
//!
//! Slots live in a stable arena and are chained into an intrusive LRU list
//! by index; a slot whose handle has been closed stays in the list as a
//! reusable empty slot. One mutex guards the whole pool; it is dropped
//! around every backend open and close, with the affected slot marked so
//! that concurrent lookups cannot match it in the meantime.

use std::{
    fmt::Debug,
    ops::Deref,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, MutexGuard};
use rasterpool_common::{
    config::PoolLimits,
    strict_assert, strict_assert_eq,
    thread::{self, ResponsibleScope},
};

use crate::{
    backend::{Access, BackendDataset, DatasetOpener},
    error::{Error, Result},
    lifecycle,
};

/// Sentinel refcount of a slot whose handle is currently being opened.
/// Every matching predicate checks `refs >= 0` (shared) or `refs == 0`
/// (exclusive, recycling), so in-flight opens are excluded for free.
const OPENING: isize = -1;

/// Identity of one logical dataset in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub descriptor: String,
    pub open_options: Vec<String>,
    pub owner: Option<String>,
}

struct Slot {
    key: Option<DatasetKey>,
    handle: Option<Arc<dyn BackendDataset>>,
    refs: isize,
    opener_thread: u64,
    ram: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            key: None,
            handle: None,
            refs: 0,
            opener_thread: 0,
            ram: 0,
            prev: None,
            next: None,
        }
    }

    fn matches(&self, descriptor: &str, open_options: &[String], owner: Option<&str>) -> bool {
        self.key.as_ref().is_some_and(|key| {
            key.descriptor == descriptor
                && key.open_options == open_options
                && key.owner.as_deref() == owner
        })
    }
}

struct PoolState {
    slots: Vec<Slot>,
    head: Option<usize>,
    tail: Option<usize>,
    ram_used: u64,
}

impl PoolState {
    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = &self.slots[index];
            (slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slots[prev].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slots[next].prev = prev,
            None => self.tail = prev,
        }
        self.slots[index].prev = None;
        self.slots[index].next = None;
    }

    fn push_front(&mut self, index: usize) {
        let old_head = self.head;
        self.slots[index].prev = None;
        self.slots[index].next = old_head;
        match old_head {
            Some(head) => self.slots[head].prev = Some(index),
            None => self.tail = Some(index),
        }
        self.head = Some(index);
    }

    fn promote(&mut self, index: usize) {
        if self.head != Some(index) {
            self.unlink(index);
            self.push_front(index);
        }
    }
}

/// Pool counters, updated with relaxed ordering.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub hit: AtomicUsize,
    pub miss: AtomicUsize,
    pub open: AtomicUsize,
    pub close: AtomicUsize,
    pub evict: AtomicUsize,
}

/// Diagnostic view of one slot, see [`Pool::entries`].
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub descriptor: Option<String>,
    pub refs: isize,
    pub ram: u64,
    pub open: bool,
}

/// A bounded LRU pool of open backend dataset handles.
pub struct Pool {
    state: Mutex<PoolState>,
    max_count: usize,
    max_ram: u64,
    opener: Arc<dyn DatasetOpener>,
    metrics: PoolMetrics,
}

impl Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("max_count", &self.max_count)
            .field("max_ram", &self.max_ram)
            .finish()
    }
}

impl Pool {
    pub fn new(limits: PoolLimits, opener: Arc<dyn DatasetOpener>) -> Arc<Self> {
        let max_count = limits.clamped_max_count();
        Arc::new(Self {
            state: Mutex::new(PoolState {
                slots: Vec::with_capacity(max_count),
                head: None,
                tail: None,
                ram_used: 0,
            }),
            max_count,
            max_ram: limits.max_ram.unwrap_or(u64::MAX),
            opener,
            metrics: PoolMetrics::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.max_count
    }

    /// Number of slots currently in the LRU list, open or empty.
    pub fn count(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn ram_used(&self) -> u64 {
        self.state.lock().ram_used
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    /// Diagnostic snapshot of the LRU list, most recently used first.
    pub fn entries(&self) -> Vec<SlotSnapshot> {
        let state = self.state.lock();
        let mut snapshots = Vec::with_capacity(state.slots.len());
        let mut cursor = state.head;
        while let Some(index) = cursor {
            let slot = &state.slots[index];
            snapshots.push(SlotSnapshot {
                descriptor: slot.key.as_ref().map(|key| key.descriptor.clone()),
                refs: slot.refs,
                ram: slot.ram,
                open: slot.handle.is_some(),
            });
            cursor = slot.next;
        }
        snapshots
    }

    /// Lease the handle for `descriptor`.
    ///
    /// A matching slot is reused when either `shared` is set and the slot was
    /// opened by the current responsible thread for the same owner, or
    /// `shared` is unset and the slot is idle. On a miss, `force_open`
    /// decides between returning `None` and opening the dataset, recycling
    /// the least-recently-used idle slot if the pool is at capacity.
    pub fn acquire(
        self: &Arc<Self>,
        descriptor: &str,
        open_options: &[String],
        access: Access,
        shared: bool,
        force_open: bool,
        owner: Option<&str>,
    ) -> Result<Option<DatasetLease>> {
        let responsible = thread::responsible_id();

        let mut state = self.state.lock();

        let mut hit: Option<(usize, Arc<dyn BackendDataset>)> = None;
        let mut cursor = state.head;
        while let Some(index) = cursor {
            let slot = &state.slots[index];
            cursor = slot.next;
            if !slot.matches(descriptor, open_options, owner) {
                continue;
            }
            let reusable = if shared {
                slot.refs >= 0 && slot.opener_thread == responsible
            } else {
                slot.refs == 0
            };
            if reusable {
                if let Some(handle) = slot.handle.clone() {
                    hit = Some((index, handle));
                    break;
                }
            }
        }

        if let Some((index, handle)) = hit {
            self.metrics.hit.fetch_add(1, Ordering::Relaxed);
            state.promote(index);
            state.slots[index].refs += 1;
            drop(state);
            return Ok(Some(DatasetLease {
                pool: self.clone(),
                index,
                handle,
            }));
        }

        self.metrics.miss.fetch_add(1, Ordering::Relaxed);
        if !force_open {
            return Ok(None);
        }

        let (index, evicted) = if state.slots.len() < self.max_count {
            let index = state.slots.len();
            state.slots.push(Slot::empty());
            state.push_front(index);
            (index, None)
        } else {
            // The last idle slot seen on a head-to-tail walk is the least
            // recently used one.
            let mut candidate = None;
            let mut cursor = state.head;
            while let Some(index) = cursor {
                let slot = &state.slots[index];
                if slot.refs == 0 {
                    candidate = Some(index);
                }
                cursor = slot.next;
            }
            let Some(index) = candidate else {
                tracing::warn!(
                    capacity = self.max_count,
                    descriptor,
                    "dataset pool exhausted"
                );
                return Err(Error::PoolExhausted {
                    capacity: self.max_count,
                });
            };
            let evicted = Self::detach_handle(&mut state, index);
            if evicted.is_some() {
                self.metrics.evict.fetch_add(1, Ordering::Relaxed);
            }
            state.promote(index);
            (index, evicted)
        };

        // Mark the slot as opening and install the new key before the lock
        // is dropped, so concurrent lookups can neither match nor recycle it.
        {
            let slot = &mut state.slots[index];
            slot.refs = OPENING;
            slot.opener_thread = responsible;
            slot.key = Some(DatasetKey {
                descriptor: descriptor.to_owned(),
                open_options: open_options.to_vec(),
                owner: owner.map(str::to_owned),
            });
        }

        drop(state);

        // The evicted close and the new open both run without the pool lock;
        // the backend may reenter the pool from either.
        if let Some((handle, opener_thread)) = evicted {
            self.close_handle(handle, opener_thread);
        }

        tracing::trace!(descriptor, shared, "opening backend dataset");
        let opened = {
            let _suppress = lifecycle::suppress_pool_refcount();
            let _scope = ResponsibleScope::enter(responsible);
            self.opener.open(descriptor, open_options, access)
        };

        let handle: Arc<dyn BackendDataset> = match opened {
            Ok(handle) => Arc::from(handle),
            Err(source) => {
                let mut state = self.state.lock();
                let slot = &mut state.slots[index];
                strict_assert_eq!(slot.refs, OPENING);
                slot.refs = 0;
                slot.key = None;
                slot.handle = None;
                return Err(Error::OpenFailed {
                    descriptor: descriptor.to_owned(),
                    source,
                });
            }
        };

        let mut state = self.state.lock();
        {
            let slot = &mut state.slots[index];
            strict_assert_eq!(slot.refs, OPENING);
            slot.ram = handle.estimated_ram_usage();
            slot.handle = Some(handle.clone());
            slot.refs = 1;
        }
        self.metrics.open.fetch_add(1, Ordering::Relaxed);
        state.ram_used += state.slots[index].ram;

        self.relieve_ram_pressure(&mut state, index);
        drop(state);

        Ok(Some(DatasetLease {
            pool: self.clone(),
            index,
            handle,
        }))
    }

    /// Close the handle of an idle slot matching the key, keeping the slot
    /// in the list for recycling. No-op if the slot is referenced or its
    /// handle is already gone.
    pub fn close_if_idle(&self, descriptor: &str, open_options: &[String], owner: Option<&str>) {
        let mut state = self.state.lock();
        let mut cursor = state.head;
        while let Some(index) = cursor {
            let slot = &state.slots[index];
            cursor = slot.next;
            if slot.matches(descriptor, open_options, owner)
                && slot.refs == 0
                && slot.handle.is_some()
            {
                if let Some((handle, opener_thread)) = Self::detach_handle(&mut state, index) {
                    MutexGuard::unlocked(&mut state, || self.close_handle(handle, opener_thread));
                }
                return;
            }
        }
    }

    /// Take the handle out of an idle slot and clear its key and RAM
    /// accounting. The actual close must happen without the pool lock.
    fn detach_handle(
        state: &mut PoolState,
        index: usize,
    ) -> Option<(Arc<dyn BackendDataset>, u64)> {
        let slot = &mut state.slots[index];
        strict_assert_eq!(slot.refs, 0);
        let handle = slot.handle.take()?;
        let ram = std::mem::take(&mut slot.ram);
        let opener_thread = slot.opener_thread;
        slot.key = None;
        state.ram_used -= ram;
        Some((handle, opener_thread))
    }

    /// Drop a detached handle under the identity of the thread that opened
    /// it. Must not be called with the pool lock held.
    fn close_handle(&self, handle: Arc<dyn BackendDataset>, opener_thread: u64) {
        self.metrics.close.fetch_add(1, Ordering::Relaxed);
        let _suppress = lifecycle::suppress_pool_refcount();
        let _scope = ResponsibleScope::enter(opener_thread);
        debug_assert_eq!(Arc::strong_count(&handle), 1);
        drop(handle);
        tracing::trace!(thread = opener_thread, "closed backend dataset handle");
    }

    /// Close idle handles until the RAM budget is met again. The slot that
    /// was just opened is never the one closed here.
    fn relieve_ram_pressure(&self, state: &mut MutexGuard<'_, PoolState>, just_opened: usize) {
        while state.ram_used > self.max_ram {
            let mut victim = None;
            let mut cursor = state.head;
            while let Some(index) = cursor {
                let slot = &state.slots[index];
                if index != just_opened && slot.refs == 0 && slot.ram > 0 {
                    victim = Some(index);
                    break;
                }
                cursor = slot.next;
            }
            let Some(index) = victim else { break };
            let Some((handle, opener_thread)) = Self::detach_handle(state, index) else {
                break;
            };
            self.metrics.evict.fetch_add(1, Ordering::Relaxed);
            // The key is already cleared, so concurrent lookups cannot match
            // the slot while the lock is dropped for the close.
            MutexGuard::unlocked(state, || self.close_handle(handle, opener_thread));
        }
    }

    fn release(&self, index: usize) {
        let mut state = self.state.lock();
        let slot = &mut state.slots[index];
        strict_assert!(slot.refs > 0, "release of an idle dataset slot");
        slot.refs -= 1;
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for slot in &mut state.slots {
            if slot.refs > 0 {
                tracing::warn!(refs = slot.refs, "pool torn down with a referenced slot");
            }
            if let Some(handle) = slot.handle.take() {
                let _suppress = lifecycle::suppress_pool_refcount();
                let _scope = ResponsibleScope::enter(slot.opener_thread);
                drop(handle);
            }
            slot.key = None;
        }
        state.ram_used = 0;
    }
}

/// A leased backend handle. The slot's refcount stays up for the lifetime
/// of the lease and is released on drop; the handle itself is only closed
/// by later eviction, never by the drop of a lease.
pub struct DatasetLease {
    pool: Arc<Pool>,
    index: usize,
    handle: Arc<dyn BackendDataset>,
}

impl DatasetLease {
    pub fn dataset(&self) -> &dyn BackendDataset {
        self.handle.as_ref()
    }
}

impl Debug for DatasetLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetLease")
            .field("index", &self.index)
            .finish()
    }
}

impl Deref for DatasetLease {
    type Target = dyn BackendDataset;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

impl Drop for DatasetLease {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Barrier,
    };

    use itertools::Itertools;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::test_utils::MockOpener;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Pool>();
        is_send_sync_static::<DatasetLease>();
    }

    fn pool_with(max_count: usize, max_ram: Option<u64>) -> (Arc<Pool>, Arc<MockOpener>) {
        let opener = Arc::new(MockOpener::default());
        let mut limits = PoolLimits::default().with_max_count(max_count);
        if let Some(max_ram) = max_ram {
            limits = limits.with_max_ram(max_ram);
        }
        (Pool::new(limits, opener.clone()), opener)
    }

    fn acquire(pool: &Arc<Pool>, descriptor: &str) -> DatasetLease {
        pool.acquire(descriptor, &[], Access::ReadOnly, false, true, None)
            .unwrap()
            .unwrap()
    }

    fn descriptors(pool: &Pool) -> Vec<Option<String>> {
        pool.entries()
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect_vec()
    }

    #[test]
    fn test_lru_eviction_under_count() {
        let (pool, opener) = pool_with(2, None);

        drop(acquire(&pool, "a"));
        drop(acquire(&pool, "b"));
        let _c = acquire(&pool, "c");

        assert_eq!(pool.count(), 2);
        assert_eq!(
            descriptors(&pool),
            vec![Some("c".to_string()), Some("b".to_string())]
        );
        assert_eq!(opener.journal().closes("a"), 1);
        assert_eq!(pool.metrics().evict.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_pinned_slots_are_skipped() {
        let (pool, opener) = pool_with(2, None);

        let a = acquire(&pool, "a");
        drop(acquire(&pool, "b"));

        let c = acquire(&pool, "c");
        assert_eq!(opener.journal().closes("b"), 1);
        assert_eq!(opener.journal().closes("a"), 0);

        drop(c);
        let _d = acquire(&pool, "d");
        assert_eq!(opener.journal().closes("c"), 1);
        assert_eq!(opener.journal().closes("a"), 0);

        drop(a);
    }

    #[test]
    fn test_exhausted() {
        let (pool, _) = pool_with(2, None);

        let _a = acquire(&pool, "a");
        let _b = acquire(&pool, "b");

        let err = pool
            .acquire("c", &[], Access::ReadOnly, false, true, None)
            .unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { capacity: 2 }));
    }

    #[test]
    fn test_ram_pressure() {
        let (pool, opener) = pool_with(10, Some(100));
        opener.set_ram("a", 60);
        opener.set_ram("b", 60);

        drop(acquire(&pool, "a"));
        assert_eq!(pool.ram_used(), 60);

        let _b = acquire(&pool, "b");
        // 120 bytes exceeded the budget, the idle handle of "a" was closed.
        assert_eq!(pool.ram_used(), 60);
        assert_eq!(opener.journal().closes("a"), 1);
        // The slot itself is kept for recycling.
        assert_eq!(pool.count(), 2);
        assert!(pool.entries().iter().any(|entry| !entry.open));
    }

    #[test]
    fn test_miss_without_force_open() {
        let (pool, _) = pool_with(2, None);

        let miss = pool
            .acquire("a", &[], Access::ReadOnly, false, false, None)
            .unwrap();
        assert!(miss.is_none());

        drop(acquire(&pool, "a"));
        let hit = pool
            .acquire("a", &[], Access::ReadOnly, false, false, None)
            .unwrap();
        assert!(hit.is_some());
    }

    #[test]
    fn test_acquire_promotes_to_head() {
        let (pool, _) = pool_with(4, None);

        drop(acquire(&pool, "a"));
        drop(acquire(&pool, "b"));
        assert_eq!(descriptors(&pool)[0].as_deref(), Some("b"));

        drop(acquire(&pool, "a"));
        assert_eq!(descriptors(&pool)[0].as_deref(), Some("a"));
    }

    #[test]
    fn test_shared_same_thread_same_owner() {
        let (pool, opener) = pool_with(4, None);

        let x1 = pool
            .acquire("x", &[], Access::ReadOnly, true, true, Some("alpha"))
            .unwrap()
            .unwrap();
        let x2 = pool
            .acquire("x", &[], Access::ReadOnly, true, true, Some("alpha"))
            .unwrap()
            .unwrap();
        assert_eq!(opener.journal().opens("x"), 1);
        assert_eq!(pool.entries()[0].refs, 2);

        // A different owner never aliases the shared handle.
        let _x3 = pool
            .acquire("x", &[], Access::ReadOnly, true, true, Some("beta"))
            .unwrap()
            .unwrap();
        assert_eq!(opener.journal().opens("x"), 2);

        // Neither does another thread, even with an equal owner.
        let remote = pool.clone();
        std::thread::spawn(move || {
            let _x4 = remote
                .acquire("x", &[], Access::ReadOnly, true, true, Some("alpha"))
                .unwrap()
                .unwrap();
        })
        .join()
        .unwrap();
        assert_eq!(opener.journal().opens("x"), 3);

        drop(x1);
        drop(x2);
    }

    #[test]
    fn test_exclusive_never_aliases() {
        let (pool, opener) = pool_with(4, None);

        let a1 = acquire(&pool, "a");
        let a2 = acquire(&pool, "a");
        assert_eq!(opener.journal().opens("a"), 2);
        drop(a1);
        drop(a2);

        // Both slots are idle now, an exclusive acquire reuses one of them.
        drop(acquire(&pool, "a"));
        assert_eq!(opener.journal().opens("a"), 2);
    }

    #[test]
    fn test_open_failure_leaves_reusable_slot() {
        let (pool, opener) = pool_with(2, None);
        opener.fail("bad");

        let err = pool
            .acquire("bad", &[], Access::ReadOnly, false, true, None)
            .unwrap_err();
        assert!(matches!(err, Error::OpenFailed { .. }));

        let entries = pool.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].refs, 0);
        assert!(!entries[0].open);
        assert!(entries[0].descriptor.is_none());
        assert_eq!(pool.ram_used(), 0);

        drop(acquire(&pool, "good"));
        assert!(pool.entries().iter().all(|entry| entry.refs == 0));
    }

    #[test]
    fn test_close_if_idle() {
        let (pool, opener) = pool_with(2, None);
        opener.set_ram("a", 10);

        let a = acquire(&pool, "a");
        pool.close_if_idle("a", &[], None);
        assert_eq!(opener.journal().closes("a"), 0);

        drop(a);
        pool.close_if_idle("a", &[], None);
        assert_eq!(opener.journal().closes("a"), 1);
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.ram_used(), 0);

        // Second call is a no-op.
        pool.close_if_idle("a", &[], None);
        assert_eq!(opener.journal().closes("a"), 1);
    }

    #[test]
    fn test_reentrant_open() {
        let (pool, opener) = pool_with(2, None);

        let weak = Arc::downgrade(&pool);
        opener.set_open_hook(move |descriptor| {
            if descriptor == "x" {
                let pool = weak.upgrade().unwrap();
                let lease = pool
                    .acquire("y", &[], Access::ReadOnly, false, true, None)
                    .unwrap()
                    .unwrap();
                drop(lease);
            }
        });

        let _x = acquire(&pool, "x");
        assert_eq!(opener.journal().opens("y"), 1);
        assert_eq!(pool.count(), 2);

        let entries = pool.entries();
        let x = entries
            .iter()
            .find(|entry| entry.descriptor.as_deref() == Some("x"))
            .unwrap();
        let y = entries
            .iter()
            .find(|entry| entry.descriptor.as_deref() == Some("y"))
            .unwrap();
        assert_eq!(x.refs, 1);
        assert_eq!(y.refs, 0);
    }

    #[test]
    fn test_eviction_closes_under_opener_thread() {
        let (pool, opener) = pool_with(2, None);

        let remote = pool.clone();
        let t1 = std::thread::spawn(move || {
            drop(acquire(&remote, "a"));
            thread::responsible_id()
        });
        let t1_id = t1.join().unwrap();

        drop(acquire(&pool, "b"));
        // Capacity reached, "a" is the least recently used idle slot.
        let _c = acquire(&pool, "c");

        assert_eq!(opener.journal().last_close_thread("a"), Some(t1_id));
        // The current thread got its own identity back afterwards.
        assert_eq!(thread::responsible_id(), thread::thread_ordinal());
    }

    #[test]
    fn test_inflight_open_is_not_matched() {
        let (pool, opener) = pool_with(4, None);

        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let first = Arc::new(AtomicBool::new(true));
        opener.set_open_hook({
            let entered = entered.clone();
            let release = release.clone();
            let first = first.clone();
            move |descriptor| {
                if descriptor == "x" && first.swap(false, AtomicOrdering::SeqCst) {
                    entered.wait();
                    release.wait();
                }
            }
        });

        let remote = pool.clone();
        let opener_thread = std::thread::spawn(move || drop(acquire(&remote, "x")));

        // The first open of "x" is now parked inside the backend with the
        // pool lock free and its slot holding the opening sentinel.
        entered.wait();
        let x2 = pool
            .acquire("x", &[], Access::ReadOnly, false, true, None)
            .unwrap()
            .unwrap();
        release.wait();
        opener_thread.join().unwrap();

        assert_eq!(opener.journal().opens("x"), 2);
        drop(x2);
        assert!(pool.entries().iter().all(|entry| entry.refs == 0));
    }

    #[test]
    fn test_pool_fuzzy() {
        const DESCRIPTORS: &[&str] = &["a", "b", "c", "d", "e", "f", "g", "h"];

        let (pool, opener) = pool_with(4, Some(1000));
        for (i, descriptor) in DESCRIPTORS.iter().enumerate() {
            opener.set_ram(descriptor, i as u64 * 50);
        }

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let mut held: Vec<DatasetLease> = vec![];
        for _ in 0..10000 {
            if rng.gen_bool(0.5) && held.len() < 5 {
                let descriptor = DESCRIPTORS[rng.gen_range(0..DESCRIPTORS.len())];
                match pool.acquire(
                    descriptor,
                    &[],
                    Access::ReadOnly,
                    rng.gen_bool(0.5),
                    true,
                    None,
                ) {
                    Ok(Some(lease)) => held.push(lease),
                    Ok(None) => unreachable!(),
                    Err(Error::PoolExhausted { .. }) => {}
                    Err(err) => panic!("{err}"),
                }
            } else if !held.is_empty() {
                let index = rng.gen_range(0..held.len());
                held.swap_remove(index);
            }

            let entries = pool.entries();
            assert!(entries.len() <= 4);
            let ram: u64 = entries.iter().map(|entry| entry.ram).sum();
            assert_eq!(ram, pool.ram_used());
            assert!(entries.iter().all(|entry| entry.refs >= 0));
        }

        held.clear();
        assert!(pool.entries().iter().all(|entry| entry.refs == 0));
    }
}
