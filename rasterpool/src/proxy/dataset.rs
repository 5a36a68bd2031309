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

use std::sync::Arc;

use hashbrown::{hash_map::Entry, HashMap};

use super::{ProxyBand, ProxySource};
use crate::{
    backend::{Access, DataType, Gcp, GeoTransform, SpatialRef, Window},
    error::{Error, Result},
    lifecycle::{self, PoolRef},
    pool::DatasetLease,
};

/// Builds a [`ProxyDataset`] in either of its two forms.
pub struct ProxyDatasetBuilder {
    descriptor: String,
    open_options: Vec<String>,
    access: Access,
    shared: bool,
    owner: Option<String>,
    spatial_ref: Option<SpatialRef>,
    geo_transform: Option<GeoTransform>,
    pool_override: Option<PoolRef>,
}

impl ProxyDatasetBuilder {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            open_options: vec![],
            access: Access::ReadOnly,
            shared: true,
            owner: None,
            spatial_ref: None,
            geo_transform: None,
            pool_override: None,
        }
    }

    pub fn with_open_options<I, S>(mut self, open_options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.open_options = open_options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Scope sharing to an owner tag: shared acquisitions alias a cached
    /// handle only when their owner tags are equal.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_spatial_ref(mut self, spatial_ref: SpatialRef) -> Self {
        self.spatial_ref = Some(spatial_ref);
        self
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = Some(geo_transform);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_pool_ref(mut self, pool: PoolRef) -> Self {
        self.pool_override = Some(pool);
        self
    }

    fn into_source(self) -> (Arc<ProxySource>, Option<SpatialRef>, Option<GeoTransform>) {
        let source = Arc::new(ProxySource {
            pool: self.pool_override.or_else(lifecycle::pool_ref),
            descriptor: self.descriptor,
            open_options: self.open_options,
            owner: self.owner,
            access: self.access,
            shared: self.shared,
        });
        (source, self.spatial_ref, self.geo_transform)
    }

    /// Explicit-dimensions form: the caller supplies the raster size and
    /// band descriptions, and the backend is not touched.
    pub fn build(self, width: usize, height: usize) -> ProxyDataset {
        let (src, srs_override, gt_override) = self.into_source();
        ProxyDataset {
            src,
            width,
            height,
            srs_override,
            gt_override,
            domain_metadata: HashMap::new(),
            item_metadata: HashMap::new(),
            gcps: vec![],
            gcp_srs: None,
            srs_copy: None,
            bands: vec![],
        }
    }

    /// Deferred-discovery form: acquires the backend once to read the raster
    /// size, spatial reference, geotransform and band descriptions, then
    /// releases it.
    pub fn open(self) -> Result<ProxyDataset> {
        let (src, srs_override, gt_override) = self.into_source();

        let (width, height, srs, gt, band_descriptions) = {
            // Discovery cannot no-op: without a pool there is nothing to
            // describe the dataset with.
            let Some(lease) = src.lease()? else {
                return Err(Error::Unavailable);
            };
            let (width, height) = lease.raster_size();
            let bands = (0..lease.band_count())
                .map(|index| {
                    lease
                        .band(index)
                        .map(|band| (band.data_type(), band.block_size()))
                })
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    Error::Backend(anyhow::anyhow!(
                        "backend band table inconsistent for {}",
                        src.descriptor
                    ))
                })?;
            (
                width,
                height,
                lease.spatial_ref(),
                lease.geo_transform(),
                bands,
            )
        };

        let mut dataset = ProxyDataset {
            src,
            width,
            height,
            srs_override: srs_override.or(srs),
            gt_override: gt_override.or(gt),
            domain_metadata: HashMap::new(),
            item_metadata: HashMap::new(),
            gcps: vec![],
            gcp_srs: None,
            srs_copy: None,
            bands: vec![],
        };
        for (data_type, (block_width, block_height)) in band_descriptions {
            dataset.add_band(data_type, block_width, block_height);
        }
        Ok(dataset)
    }
}

/// User-visible handle for one logical dataset.
///
/// The metadata caches grow monotonically for the proxy's lifetime: results
/// returned once stay valid for as long as the proxy exists, no matter what
/// happens to the backend handle behind it.
pub struct ProxyDataset {
    src: Arc<ProxySource>,
    width: usize,
    height: usize,
    srs_override: Option<SpatialRef>,
    gt_override: Option<GeoTransform>,
    domain_metadata: HashMap<String, Option<Vec<String>>>,
    item_metadata: HashMap<(String, String), Option<String>>,
    gcps: Vec<Gcp>,
    gcp_srs: Option<SpatialRef>,
    srs_copy: Option<SpatialRef>,
    bands: Vec<ProxyBand>,
}

impl ProxyDataset {
    pub fn descriptor(&self) -> &str {
        &self.src.descriptor
    }

    pub fn raster_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band(&mut self, index: usize) -> Option<&mut ProxyBand> {
        self.bands.get_mut(index)
    }

    /// Describe one more band. A block size of `(0, 0)` means "consult the
    /// backend on the first acquisition".
    pub fn add_band(&mut self, data_type: DataType, block_width: usize, block_height: usize) {
        let index = self.bands.len();
        self.bands.push(ProxyBand::main(
            self.src.clone(),
            index,
            data_type,
            block_width,
            block_height,
        ));
    }

    /// The dataset's spatial reference. An override supplied at construction
    /// wins without touching the backend; otherwise the backend's answer is
    /// copied into proxy-owned storage, replacing the previous copy.
    pub fn spatial_ref(&mut self) -> Result<Option<&SpatialRef>> {
        if self.srs_override.is_some() {
            return Ok(self.srs_override.as_ref());
        }
        let Some(lease) = self.src.lease()? else {
            return Ok(None);
        };
        self.srs_copy = lease.spatial_ref();
        Ok(self.srs_copy.as_ref())
    }

    /// Drop the construction-time spatial reference; later gets consult the
    /// backend again.
    pub fn clear_spatial_ref(&mut self) {
        self.srs_override = None;
    }

    pub fn geo_transform(&mut self) -> Result<Option<GeoTransform>> {
        if let Some(gt) = self.gt_override {
            return Ok(Some(gt));
        }
        let Some(lease) = self.src.lease()? else {
            return Ok(None);
        };
        Ok(lease.geo_transform())
    }

    pub fn clear_geo_transform(&mut self) {
        self.gt_override = None;
    }

    /// Metadata list of a domain. The first answer per domain is cached for
    /// the proxy's lifetime, even if the backend would answer differently
    /// after a re-open.
    pub fn metadata(&mut self, domain: &str) -> Result<Option<&[String]>> {
        match self.domain_metadata.entry(domain.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_deref()),
            Entry::Vacant(entry) => {
                let Some(lease) = self.src.lease()? else {
                    return Ok(None);
                };
                let fetched = lease.metadata(domain);
                Ok(entry.insert(fetched).as_deref())
            }
        }
    }

    /// Single metadata item, cached like [`ProxyDataset::metadata`].
    pub fn metadata_item(&mut self, name: &str, domain: &str) -> Result<Option<&str>> {
        match self
            .item_metadata
            .entry((name.to_owned(), domain.to_owned()))
        {
            Entry::Occupied(entry) => Ok(entry.into_mut().as_deref()),
            Entry::Vacant(entry) => {
                let Some(lease) = self.src.lease()? else {
                    return Ok(None);
                };
                let fetched = lease.metadata_item(name, domain);
                Ok(entry.insert(fetched).as_deref())
            }
        }
    }

    /// Ground control points, refreshed from the backend on every call.
    pub fn gcps(&mut self) -> Result<&[Gcp]> {
        let Some(lease) = self.src.lease()? else {
            return Ok(&self.gcps);
        };
        self.gcps = lease.gcps();
        Ok(&self.gcps)
    }

    pub fn gcp_spatial_ref(&mut self) -> Result<Option<&SpatialRef>> {
        let Some(lease) = self.src.lease()? else {
            return Ok(None);
        };
        self.gcp_srs = lease.gcp_spatial_ref();
        Ok(self.gcp_srs.as_ref())
    }

    pub fn read_region(&self, band: usize, window: Window, out: &mut [u8]) -> Result<()> {
        let Some(lease) = self.src.lease()? else {
            return Ok(());
        };
        lease.read_region(band, window, out)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let Some(lease) = self.src.lease()? else {
            return Ok(());
        };
        lease.flush();
        Ok(())
    }

    /// The transient backend lease itself.
    ///
    /// The handle behind it may be invalidated by eviction as soon as the
    /// lease drops; callers take that risk.
    pub fn internal_dataset(&self) -> Result<Option<DatasetLease>> {
        tracing::warn!(
            descriptor = %self.src.descriptor,
            "handing out the internal dataset handle of a proxy; it may be \
             invalidated once released"
        );
        self.src.lease()
    }
}

impl Drop for ProxyDataset {
    fn drop(&mut self) {
        // Let go of the cached handle if nobody else references it; the
        // slot itself stays in the pool for recycling.
        if let Some(pool) = &self.src.pool {
            pool.pool().close_if_idle(
                &self.src.descriptor,
                &self.src.open_options,
                self.src.owner.as_deref(),
            );
        }
    }
}
