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

use hashbrown::HashMap;
use rasterpool_common::strict_assert_eq;

use super::ProxySource;
use crate::{
    backend::{BackendBand, ColorInterpretation, ColorTable, DataType},
    error::{Error, Result},
};

/// How a proxy band finds its backend band inside an acquired dataset.
///
/// Overview and mask bands route through their main band's source, so one
/// child operation pins the dataset exactly once.
#[derive(Debug, Clone, Copy)]
enum BandRoute {
    Main { band: usize },
    Overview { band: usize, level: usize },
    Mask { band: usize },
}

/// Per-band proxy, acquired and released per operation like its dataset.
pub struct ProxyBand {
    src: Arc<ProxySource>,
    route: BandRoute,
    data_type: DataType,
    block_width: usize,
    block_height: usize,
    domain_metadata: HashMap<String, Option<Vec<String>>>,
    item_metadata: HashMap<(String, String), Option<String>>,
    category_names: Option<Vec<String>>,
    color_table: Option<ColorTable>,
    unit: Option<String>,
    overviews: Vec<ProxyBand>,
    overviews_built: bool,
    mask: Option<Box<ProxyBand>>,
    underlying: usize,
}

impl ProxyBand {
    pub(crate) fn main(
        src: Arc<ProxySource>,
        band: usize,
        data_type: DataType,
        block_width: usize,
        block_height: usize,
    ) -> Self {
        Self::with_route(src, BandRoute::Main { band }, data_type, block_width, block_height)
    }

    fn child(
        src: Arc<ProxySource>,
        route: BandRoute,
        data_type: DataType,
        block_width: usize,
        block_height: usize,
    ) -> Self {
        Self::with_route(src, route, data_type, block_width, block_height)
    }

    fn with_route(
        src: Arc<ProxySource>,
        route: BandRoute,
        data_type: DataType,
        block_width: usize,
        block_height: usize,
    ) -> Self {
        Self {
            src,
            route,
            data_type,
            block_width,
            block_height,
            domain_metadata: HashMap::new(),
            item_metadata: HashMap::new(),
            category_names: None,
            color_table: None,
            unit: None,
            overviews: vec![],
            overviews_built: false,
            mask: None,
            underlying: 0,
        }
    }

    /// Lease the dataset, locate this band and run `f` on it. The first
    /// successful acquisition backfills a declared `(0, 0)` block size.
    ///
    /// `Ok(None)` means the proxy has no pool behind it; band operations
    /// silently no-op in that case.
    fn with_band<T>(&mut self, f: impl FnOnce(&dyn BackendBand) -> T) -> Result<Option<T>> {
        let Some(lease) = self.src.lease()? else {
            return Ok(None);
        };
        self.underlying += 1;
        let located = match self.route {
            BandRoute::Main { band } => lease.band(band),
            BandRoute::Overview { band, level } => {
                lease.band(band).and_then(|main| main.overview(level))
            }
            BandRoute::Mask { band } => lease.band(band).and_then(|main| main.mask()),
        };
        let result = match located {
            Some(band) => {
                if self.block_width == 0 && self.block_height == 0 {
                    let (width, height) = band.block_size();
                    self.block_width = width;
                    self.block_height = height;
                }
                Ok(Some(f(band)))
            }
            None => Err(Error::Backend(anyhow::anyhow!(
                "band {:?} not present in backend dataset {}",
                self.route,
                self.src.descriptor
            ))),
        };
        self.underlying -= 1;
        result
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The band's natural block size. Declared `(0, 0)` bands consult the
    /// backend on the first call.
    pub fn block_size(&mut self) -> Result<(usize, usize)> {
        if self.block_width == 0 && self.block_height == 0 {
            self.with_band(|_| ())?;
        }
        Ok((self.block_width, self.block_height))
    }

    pub fn read_block(&mut self, x: usize, y: usize, out: &mut [u8]) -> Result<()> {
        if let Some(read) = self.with_band(|band| band.read_block(x, y, out))? {
            read?;
        }
        Ok(())
    }

    pub fn no_data_value(&mut self) -> Result<Option<f64>> {
        Ok(self.with_band(|band| band.no_data_value())?.flatten())
    }

    pub fn color_interpretation(&mut self) -> Result<ColorInterpretation> {
        Ok(self
            .with_band(|band| band.color_interpretation())?
            .unwrap_or(ColorInterpretation::Undefined))
    }

    pub fn scale(&mut self) -> Result<Option<f64>> {
        Ok(self.with_band(|band| band.scale())?.flatten())
    }

    pub fn offset(&mut self) -> Result<Option<f64>> {
        Ok(self.with_band(|band| band.offset())?.flatten())
    }

    /// Category names, copied into proxy-owned storage on every call.
    pub fn category_names(&mut self) -> Result<Option<&[String]>> {
        let Some(fetched) = self.with_band(|band| band.category_names())? else {
            return Ok(None);
        };
        self.category_names = fetched;
        Ok(self.category_names.as_deref())
    }

    pub fn color_table(&mut self) -> Result<Option<&ColorTable>> {
        let Some(fetched) = self.with_band(|band| band.color_table())? else {
            return Ok(None);
        };
        self.color_table = fetched;
        Ok(self.color_table.as_ref())
    }

    pub fn unit(&mut self) -> Result<Option<&str>> {
        let Some(fetched) = self.with_band(|band| band.unit())? else {
            return Ok(None);
        };
        self.unit = fetched;
        Ok(self.unit.as_deref())
    }

    /// Band metadata list of a domain, cached monotonically like the
    /// dataset-level metadata.
    pub fn metadata(&mut self, domain: &str) -> Result<Option<&[String]>> {
        if !self.domain_metadata.contains_key(domain) {
            let Some(fetched) = self.with_band(|band| band.metadata(domain))? else {
                return Ok(None);
            };
            self.domain_metadata.insert(domain.to_owned(), fetched);
        }
        Ok(self
            .domain_metadata
            .get(domain)
            .and_then(|cached| cached.as_deref()))
    }

    pub fn metadata_item(&mut self, name: &str, domain: &str) -> Result<Option<&str>> {
        let key = (name.to_owned(), domain.to_owned());
        if !self.item_metadata.contains_key(&key) {
            let Some(fetched) = self.with_band(|band| band.metadata_item(name, domain))? else {
                return Ok(None);
            };
            self.item_metadata.insert(key.clone(), fetched);
        }
        Ok(self
            .item_metadata
            .get(&key)
            .and_then(|cached| cached.as_deref()))
    }

    pub fn overview_count(&mut self) -> Result<usize> {
        Ok(self.with_band(|band| band.overview_count())?.unwrap_or(0))
    }

    /// The overview band at `level`, lazily built as a child proxy band.
    /// Child bands have no overviews of their own.
    pub fn overview(&mut self, level: usize) -> Result<Option<&mut ProxyBand>> {
        let BandRoute::Main { band } = self.route else {
            return Ok(None);
        };
        if !self.overviews_built {
            let Some(descriptions) = self.with_band(|backend| {
                (0..backend.overview_count())
                    .map(|index| {
                        backend
                            .overview(index)
                            .map(|overview| (index, overview.data_type(), overview.block_size()))
                    })
                    .collect::<Vec<_>>()
            })?
            else {
                return Ok(None);
            };
            self.overviews = descriptions
                .into_iter()
                .flatten()
                .map(|(index, data_type, (block_width, block_height))| {
                    ProxyBand::child(
                        self.src.clone(),
                        BandRoute::Overview { band, level: index },
                        data_type,
                        block_width,
                        block_height,
                    )
                })
                .collect();
            self.overviews_built = true;
        }
        Ok(self.overviews.get_mut(level))
    }

    /// The mask band, lazily built as a child proxy band.
    pub fn mask_band(&mut self) -> Result<Option<&mut ProxyBand>> {
        let BandRoute::Main { band } = self.route else {
            return Ok(None);
        };
        if self.mask.is_none() {
            let Some(description) = self.with_band(|backend| {
                backend.mask().map(|mask| (mask.data_type(), mask.block_size()))
            })?
            else {
                return Ok(None);
            };
            if let Some((data_type, (block_width, block_height))) = description {
                self.mask = Some(Box::new(ProxyBand::child(
                    self.src.clone(),
                    BandRoute::Mask { band },
                    data_type,
                    block_width,
                    block_height,
                )));
            }
        }
        Ok(self.mask.as_deref_mut())
    }
}

impl Drop for ProxyBand {
    fn drop(&mut self) {
        strict_assert_eq!(
            self.underlying, 0,
            "proxy band dropped while the backend was leased"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        lifecycle::PoolRef,
        pool::Pool,
        proxy::{ProxyDataset, ProxyDatasetBuilder},
        test_utils::MockOpener,
    };
    use rasterpool_common::config::PoolLimits;

    fn harness(max_count: usize) -> (Arc<Pool>, Arc<MockOpener>) {
        let opener = Arc::new(MockOpener::default());
        let pool = Pool::new(
            PoolLimits::default().with_max_count(max_count),
            opener.clone(),
        );
        (pool, opener)
    }

    fn proxy(pool: &Arc<Pool>, descriptor: &str) -> ProxyDataset {
        ProxyDatasetBuilder::new(descriptor)
            .with_pool_ref(PoolRef::detached(pool.clone()))
            .open()
            .unwrap()
    }

    #[test]
    fn test_block_size_backfill() {
        let (pool, opener) = harness(4);

        let mut dataset = ProxyDatasetBuilder::new("scene")
            .with_pool_ref(PoolRef::detached(pool.clone()))
            .build(64, 64);
        dataset.add_band(DataType::U8, 0, 0);
        assert_eq!(opener.journal().opens("scene"), 0);

        let band = dataset.band(0).unwrap();
        assert_eq!(band.block_size().unwrap(), (16, 16));
        assert_eq!(opener.journal().opens("scene"), 1);

        // Backfilled, no further acquisition needed.
        pool.close_if_idle("scene", &[], None);
        assert_eq!(band.block_size().unwrap(), (16, 16));
        assert_eq!(opener.journal().opens("scene"), 1);
    }

    #[test]
    fn test_read_block_backfills_too() {
        let (pool, _) = harness(4);

        let mut dataset = ProxyDatasetBuilder::new("scene")
            .with_pool_ref(PoolRef::detached(pool.clone()))
            .build(64, 64);
        dataset.add_band(DataType::U8, 0, 0);

        let band = dataset.band(0).unwrap();
        let mut out = vec![0u8; 256];
        band.read_block(0, 0, &mut out).unwrap();
        assert!(out.iter().all(|byte| *byte == 7));
        assert_eq!(band.block_size().unwrap(), (16, 16));
    }

    #[test]
    fn test_overview_children_pin_once() {
        let (pool, opener) = harness(4);
        let mut dataset = proxy(&pool, "scene");
        let band = dataset.band(0).unwrap();

        assert_eq!(band.overview_count().unwrap(), 2);
        let overview = band.overview(1).unwrap().unwrap();
        assert_eq!(overview.data_type(), DataType::U8);
        assert_eq!(overview.block_size().unwrap(), (4, 4));

        // A child operation acquires through the shared source, one lease
        // per call, never nested.
        let mut out = vec![0u8; 16];
        overview.read_block(0, 0, &mut out).unwrap();
        assert!(out.iter().all(|byte| *byte == 7));
        assert_eq!(pool.entries()[0].refs, 0);
        assert_eq!(opener.journal().opens("scene"), 1);

        // Children of children do not exist.
        assert!(overview.overview(0).unwrap().is_none());
        assert!(overview.mask_band().unwrap().is_none());
    }

    #[test]
    fn test_mask_band() {
        let (pool, _) = harness(4);
        let mut dataset = proxy(&pool, "scene");
        let band = dataset.band(0).unwrap();

        let mask = band.mask_band().unwrap().unwrap();
        assert_eq!(mask.block_size().unwrap(), (16, 16));
        let mut out = vec![0u8; 256];
        mask.read_block(0, 0, &mut out).unwrap();
        assert!(out.iter().all(|byte| *byte == 255));

        // The bare second band has no mask.
        let bare = dataset.band(1).unwrap();
        assert!(bare.mask_band().unwrap().is_none());
    }

    #[test]
    fn test_band_metadata_cache_is_monotonic() {
        let (pool, opener) = harness(4);
        let mut dataset = proxy(&pool, "scene");
        let band = dataset.band(0).unwrap();

        assert_eq!(band.metadata_item("FILL", "").unwrap(), Some("7"));
        pool.close_if_idle("scene", &[], None);
        assert_eq!(band.metadata_item("FILL", "").unwrap(), Some("7"));
        assert_eq!(opener.journal().opens("scene"), 1);

        assert!(band.metadata("absent").unwrap().is_none());
    }

    #[test]
    fn test_missing_band_is_a_backend_error() {
        let (pool, _) = harness(4);

        let mut dataset = ProxyDatasetBuilder::new("scene")
            .with_pool_ref(PoolRef::detached(pool.clone()))
            .build(64, 64);
        // The mock dataset only has two bands.
        dataset.add_band(DataType::U8, 16, 16);
        dataset.add_band(DataType::F32, 32, 8);
        dataset.add_band(DataType::F64, 16, 16);

        let ghost = dataset.band(2).unwrap();
        assert!(matches!(
            ghost.no_data_value().unwrap_err(),
            Error::Backend(_)
        ));
    }
}
