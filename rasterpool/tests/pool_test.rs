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

//! End-to-end tests of the singleton pool and the proxy front-ends.
//!
//! The pool singleton is process-wide, so every test takes the serial lock
//! and tears the singleton down before it starts.

use std::sync::Arc;

use parking_lot::Mutex;
use rasterpool::{
    lifecycle::{configure, force_destroy, pool_ref, prevent_destroy, register_opener},
    prelude::*,
    test_utils::MockOpener,
};

static SERIAL: Mutex<()> = Mutex::new(());

fn setup(limits: PoolLimits) -> (parking_lot::MutexGuard<'static, ()>, Arc<MockOpener>) {
    let guard = SERIAL.lock();
    force_destroy();
    let opener = Arc::new(MockOpener::default());
    register_opener(opener.clone());
    configure(limits);
    (guard, opener)
}

#[test_log::test]
fn test_end_to_end_proxy_flow() {
    let (_guard, opener) = setup(PoolLimits::default().with_max_count(2));
    let journal = opener.journal();

    let mut alpha = ProxyDatasetBuilder::new("alpha").open().unwrap();
    let mut beta = ProxyDatasetBuilder::new("beta").open().unwrap();
    assert_eq!(journal.opens("alpha"), 1);
    assert_eq!(journal.opens("beta"), 1);

    // Proxy operations lease, delegate and release.
    assert_eq!(alpha.raster_size(), (64, 64));
    assert_eq!(
        alpha.metadata_item("AREA_OR_POINT", "").unwrap(),
        Some("Area")
    );
    let mut out = vec![0u8; 16];
    beta.read_region(
        0,
        Window {
            x: 0,
            y: 0,
            width: 4,
            height: 4,
        },
        &mut out,
    )
    .unwrap();
    assert!(out.iter().all(|byte| *byte == 7));

    // A third dataset recycles the least recently used idle slot.
    let mut gamma = ProxyDatasetBuilder::new("gamma").open().unwrap();
    assert_eq!(journal.closes("alpha") + journal.closes("beta"), 1);

    // The evicted dataset transparently re-opens on its next operation.
    let _ = alpha.metadata("").unwrap();
    let _ = gamma.band(0).unwrap().block_size().unwrap();

    drop(alpha);
    drop(beta);
    drop(gamma);

    // All proxies gone: the singleton tore down and closed every handle.
    let journal = opener.journal();
    for descriptor in ["alpha", "beta", "gamma"] {
        assert_eq!(journal.opens(descriptor), journal.closes(descriptor));
    }

    force_destroy();
}

#[test_log::test]
fn test_singleton_teardown_closes_handles() {
    let (_guard, opener) = setup(PoolLimits::default().with_max_count(4));
    let journal = opener.journal();

    let pool = pool_ref().unwrap();
    let lease = pool
        .pool()
        .acquire("x", &[], Access::ReadOnly, false, true, None)
        .unwrap()
        .unwrap();
    drop(lease);
    assert_eq!(journal.closes("x"), 0);

    // Last counted reference away: the pool closes its cached handles.
    drop(pool);
    assert_eq!(journal.closes("x"), 1);

    // A later reference builds a fresh pool.
    let pool = pool_ref().unwrap();
    assert_eq!(pool.pool().count(), 0);
    drop(pool);
}

#[test_log::test]
fn test_prevent_destroy_defers_teardown() {
    let (_guard, opener) = setup(PoolLimits::default().with_max_count(4));
    let journal = opener.journal();

    let pool = pool_ref().unwrap();
    drop(
        pool.pool()
            .acquire("x", &[], Access::ReadOnly, false, true, None)
            .unwrap()
            .unwrap(),
    );

    prevent_destroy();
    drop(pool);
    // The guard held the pool alive across the zero-refcount window.
    assert_eq!(journal.closes("x"), 0);

    force_destroy();
    assert_eq!(journal.closes("x"), 1);
}

#[test_log::test]
fn test_refs_inside_opener_are_uncounted() {
    let (_guard, opener) = setup(PoolLimits::default().with_max_count(4));
    let journal = opener.journal();

    // The opener constructs (and drops) a proxy of its own while it runs.
    opener.set_open_hook(|descriptor| {
        if descriptor == "outer" {
            let inner = ProxyDatasetBuilder::new("inner").build(1, 1);
            drop(inner);
        }
    });

    let pool = pool_ref().unwrap();
    drop(
        pool.pool()
            .acquire("outer", &[], Access::ReadOnly, false, true, None)
            .unwrap()
            .unwrap(),
    );

    // The inner proxy's reference did not count: dropping the only counted
    // reference tears the singleton down.
    drop(pool);
    assert_eq!(journal.closes("outer"), 1);
}

#[test_log::test]
fn test_capacity_is_clamped() {
    let (_guard, _opener) = setup(PoolLimits::default().with_max_count(1));

    let pool = pool_ref().unwrap();
    assert_eq!(pool.pool().capacity(), 2);
    drop(pool);

    force_destroy();
}

#[test_log::test]
fn test_exhaustion_reports_capacity() {
    let (_guard, _opener) = setup(PoolLimits::default().with_max_count(2));

    let pool = pool_ref().unwrap();
    let _a = pool
        .pool()
        .acquire("a", &[], Access::ReadOnly, false, true, None)
        .unwrap()
        .unwrap();
    let _b = pool
        .pool()
        .acquire("b", &[], Access::ReadOnly, false, true, None)
        .unwrap()
        .unwrap();

    let err = pool
        .pool()
        .acquire("c", &[], Access::ReadOnly, false, true, None)
        .unwrap_err();
    assert!(matches!(err, Error::PoolExhausted { capacity: 2 }));
    assert!(err.to_string().contains("raise the pool capacity limit"));
}

#[test_log::test]
fn test_shared_proxies_alias_one_handle() {
    let (_guard, opener) = setup(PoolLimits::default().with_max_count(4));
    let journal = opener.journal();

    let mut first = ProxyDatasetBuilder::new("scene")
        .with_owner("tiles")
        .open()
        .unwrap();
    let mut second = ProxyDatasetBuilder::new("scene")
        .with_owner("tiles")
        .open()
        .unwrap();
    let _ = first.metadata("").unwrap();
    let _ = second.metadata("").unwrap();
    assert_eq!(journal.opens("scene"), 1);

    // A different owner tag never aliases the cached handle.
    let mut stranger = ProxyDatasetBuilder::new("scene")
        .with_owner("elsewhere")
        .open()
        .unwrap();
    let _ = stranger.metadata("").unwrap();
    assert_eq!(journal.opens("scene"), 2);

    drop(first);
    drop(second);
    drop(stranger);
    force_destroy();
}
