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

//! Per-thread responsible ids.
//!
//! Backend opens and closes are tagged with a "responsible id" so that the
//! logical identity that opened a handle can be restored around its close,
//! no matter which thread triggers the close. By default the responsible id
//! is a process-unique ordinal assigned to the thread on first use; it can
//! be overridden for code paths that act on behalf of another thread.

use std::{
    cell::Cell,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_THREAD_ORDINAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ORDINAL: u64 = NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed);
    static RESPONSIBLE_OVERRIDE: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Process-unique ordinal of the current thread.
pub fn thread_ordinal() -> u64 {
    THREAD_ORDINAL.with(|ordinal| *ordinal)
}

/// The id under which backend opens and closes on this thread are recorded.
///
/// Defaults to [`thread_ordinal`] unless overridden.
pub fn responsible_id() -> u64 {
    RESPONSIBLE_OVERRIDE
        .with(Cell::get)
        .unwrap_or_else(thread_ordinal)
}

/// Override the responsible id of the current thread.
pub fn set_responsible_id(id: u64) {
    RESPONSIBLE_OVERRIDE.with(|cell| cell.set(Some(id)));
}

/// Drop the override and fall back to the thread's own ordinal.
pub fn clear_responsible_id() {
    RESPONSIBLE_OVERRIDE.with(|cell| cell.set(None));
}

/// Scoped responsible-id override, restoring the previous state on drop.
#[must_use]
pub struct ResponsibleScope {
    prev: Option<u64>,
}

impl ResponsibleScope {
    pub fn enter(id: u64) -> Self {
        let prev = RESPONSIBLE_OVERRIDE.with(|cell| cell.replace(Some(id)));
        Self { prev }
    }
}

impl Drop for ResponsibleScope {
    fn drop(&mut self) {
        RESPONSIBLE_OVERRIDE.with(|cell| cell.set(self.prev));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinal_unique_across_threads() {
        let here = thread_ordinal();
        let there = std::thread::spawn(thread_ordinal).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, thread_ordinal());
    }

    #[test]
    fn test_override_and_clear() {
        let own = thread_ordinal();
        assert_eq!(responsible_id(), own);

        set_responsible_id(42);
        assert_eq!(responsible_id(), 42);

        clear_responsible_id();
        assert_eq!(responsible_id(), own);
    }

    #[test]
    fn test_scope_restores_previous_override() {
        set_responsible_id(7);
        {
            let _scope = ResponsibleScope::enter(13);
            assert_eq!(responsible_id(), 13);
            {
                let _inner = ResponsibleScope::enter(17);
                assert_eq!(responsible_id(), 17);
            }
            assert_eq!(responsible_id(), 13);
        }
        assert_eq!(responsible_id(), 7);
        clear_responsible_id();
    }
}
