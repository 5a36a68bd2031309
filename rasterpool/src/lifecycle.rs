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

//! Lifecycle of the process-wide pool singleton.
//!
//! The pool is built lazily on the first [`pool_ref`] and destroyed when the
//! last counted [`PoolRef`] drops, closing every cached handle under its
//! recorded opener identity. References handed out while the thread-local
//! suppression counter is raised are uncounted: proxies constructed inside a
//! backend open or close must not keep the pool alive through their own
//! constructors.

use std::{cell::Cell, sync::Arc};

use parking_lot::Mutex;
use rasterpool_common::{config::PoolLimits, strict_assert};

use crate::{backend::DatasetOpener, pool::Pool};

struct SingletonState {
    pool: Option<Arc<Pool>>,
    refs: usize,
    prevent_destroy: usize,
    tearing_down: bool,
    opener: Option<Arc<dyn DatasetOpener>>,
    limits: Option<PoolLimits>,
}

static SINGLETON: Mutex<SingletonState> = Mutex::new(SingletonState {
    pool: None,
    refs: 0,
    prevent_destroy: 0,
    tearing_down: false,
    opener: None,
    limits: None,
});

thread_local! {
    static SUPPRESS: Cell<usize> = const { Cell::new(0) };
}

/// Raise the thread-local suppression counter for the current scope.
#[must_use]
pub(crate) struct SuppressGuard(());

pub(crate) fn suppress_pool_refcount() -> SuppressGuard {
    SUPPRESS.with(|counter| counter.set(counter.get() + 1));
    SuppressGuard(())
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        SUPPRESS.with(|counter| counter.set(counter.get() - 1));
    }
}

fn suppressed() -> bool {
    SUPPRESS.with(|counter| counter.get() > 0)
}

/// Install the process-wide backend opener. The pool snapshots it when it is
/// built; reinstalling takes effect at the next construction.
pub fn register_opener(opener: Arc<dyn DatasetOpener>) {
    SINGLETON.lock().opener = Some(opener);
}

/// Stage the limits used for the next pool construction. Without this, the
/// defaults overridden from the environment apply.
pub fn configure(limits: PoolLimits) {
    SINGLETON.lock().limits = Some(limits);
}

/// A counted reference to the pool singleton.
///
/// Dropping the last counted reference destroys the pool unless
/// [`prevent_destroy`] is in effect. References created under suppression
/// are uncounted and never participate in the singleton's liveness.
pub struct PoolRef {
    pool: Arc<Pool>,
    counted: bool,
}

impl PoolRef {
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// An uncounted reference to an arbitrary pool, bypassing the singleton.
    #[cfg(test)]
    pub(crate) fn detached(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            counted: false,
        }
    }
}

impl std::fmt::Debug for PoolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRef")
            .field("counted", &self.counted)
            .finish()
    }
}

impl Drop for PoolRef {
    fn drop(&mut self) {
        if self.counted {
            unref();
        }
    }
}

/// Reference the pool singleton, building it on first use.
///
/// Returns `None` while the singleton is being destroyed, or when no opener
/// has been registered yet.
pub fn pool_ref() -> Option<PoolRef> {
    let mut singleton = SINGLETON.lock();
    if singleton.tearing_down {
        return None;
    }
    if singleton.pool.is_none() {
        let Some(opener) = singleton.opener.clone() else {
            tracing::warn!("no dataset opener registered, pool unavailable");
            return None;
        };
        let limits = singleton
            .limits
            .clone()
            .unwrap_or_else(|| PoolLimits::default().overridden_from_env());
        tracing::debug!(?limits, "building dataset pool");
        singleton.pool = Some(Pool::new(limits, opener));
    }
    let pool = singleton.pool.clone()?;
    let counted = if suppressed() {
        false
    } else {
        singleton.refs += 1;
        true
    };
    Some(PoolRef { pool, counted })
}

fn unref() {
    let torn = {
        let mut singleton = SINGLETON.lock();
        strict_assert!(singleton.refs > 0, "unbalanced pool unref");
        singleton.refs = singleton.refs.saturating_sub(1);
        if singleton.refs == 0 && singleton.prevent_destroy == 0 {
            singleton.tearing_down = true;
            singleton.pool.take()
        } else {
            None
        }
    };
    if let Some(pool) = torn {
        // Dropping the last Arc closes every cached handle; uncounted
        // references may defer that to their own drop.
        drop(pool);
        SINGLETON.lock().tearing_down = false;
    }
}

/// Keep the singleton alive across a scope where the last reference may
/// transiently drop. Balanced by [`force_destroy`].
pub fn prevent_destroy() {
    SINGLETON.lock().prevent_destroy += 1;
}

/// Destroy the singleton now, regardless of outstanding counted references.
pub fn force_destroy() {
    let torn = {
        let mut singleton = SINGLETON.lock();
        strict_assert!(
            singleton.prevent_destroy <= 1,
            "unbalanced prevent_destroy at forced teardown"
        );
        singleton.prevent_destroy = 0;
        singleton.refs = 0;
        singleton.tearing_down = true;
        singleton.pool.take()
    };
    drop(torn);
    SINGLETON.lock().tearing_down = false;
}
