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

//! Proxy datasets and bands.
//!
//! A proxy is the object user code holds indefinitely. Every forwarded
//! operation leases the real backend handle from the pool, delegates, and
//! releases; pointer-valued results are duplicated into proxy-owned caches
//! so they survive eviction of the handle they came from.

mod band;
mod dataset;

pub use band::ProxyBand;
pub use dataset::{ProxyDataset, ProxyDatasetBuilder};

use crate::{error::Result, lifecycle::PoolRef, pool::DatasetLease};

/// What a proxy dataset and its bands share: the pool reference and the
/// acquisition parameters of the logical dataset.
pub(crate) struct ProxySource {
    pub(crate) pool: Option<PoolRef>,
    pub(crate) descriptor: String,
    pub(crate) open_options: Vec<String>,
    pub(crate) owner: Option<String>,
    pub(crate) access: crate::backend::Access,
    pub(crate) shared: bool,
}

impl ProxySource {
    /// Lease the backend handle.
    ///
    /// `Ok(None)` means the proxy has no pool behind it (it was constructed
    /// while the singleton was tearing down, or before an opener was
    /// registered); forwarded operations silently no-op in that case.
    pub(crate) fn lease(&self) -> Result<Option<DatasetLease>> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };
        pool.pool().acquire(
            &self.descriptor,
            &self.open_options,
            self.access,
            self.shared,
            true,
            self.owner.as_deref(),
        )
    }
}
