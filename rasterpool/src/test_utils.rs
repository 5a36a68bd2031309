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

//! Mock backend for tests.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use rasterpool_common::thread;

use crate::backend::{
    Access, BackendBand, BackendDataset, ColorEntry, ColorInterpretation, ColorTable, DataType,
    DatasetOpener, Gcp, GeoTransform, SpatialRef, Window,
};

/// Every backend open and close, tagged with the responsible id it ran under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEvent {
    Open { descriptor: String, thread: u64 },
    Close { descriptor: String, thread: u64 },
}

#[derive(Debug, Default)]
pub struct Journal {
    events: Mutex<Vec<JournalEvent>>,
}

impl Journal {
    fn record(&self, event: JournalEvent) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<JournalEvent> {
        self.events.lock().clone()
    }

    pub fn opens(&self, descriptor: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, JournalEvent::Open { descriptor: d, .. } if d == descriptor)
            })
            .count()
    }

    pub fn closes(&self, descriptor: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, JournalEvent::Close { descriptor: d, .. } if d == descriptor)
            })
            .count()
    }

    pub fn last_close_thread(&self, descriptor: &str) -> Option<u64> {
        self.events()
            .iter()
            .rev()
            .find_map(|event| match event {
                JournalEvent::Close {
                    descriptor: d,
                    thread,
                } if d == descriptor => Some(*thread),
                _ => None,
            })
    }
}

type OpenHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A scriptable in-memory opener.
///
/// Every open produces a fresh [`MockDataset`] with a monotonically
/// increasing generation stamp, so tests can tell re-opens from cache hits.
#[derive(Default)]
pub struct MockOpener {
    journal: Arc<Journal>,
    ram: Mutex<HashMap<String, u64>>,
    failing: Mutex<HashSet<String>>,
    hook: Mutex<Option<OpenHook>>,
    generation: AtomicU64,
}

impl MockOpener {
    pub fn journal(&self) -> Arc<Journal> {
        self.journal.clone()
    }

    /// RAM estimate reported by datasets opened for `descriptor`.
    pub fn set_ram(&self, descriptor: &str, bytes: u64) {
        self.ram.lock().insert(descriptor.to_owned(), bytes);
    }

    /// Make opens of `descriptor` fail.
    pub fn fail(&self, descriptor: &str) {
        self.failing.lock().insert(descriptor.to_owned());
    }

    /// Run `hook` at the start of every open, before the dataset is built.
    pub fn set_open_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }
}

impl DatasetOpener for MockOpener {
    fn open(
        &self,
        descriptor: &str,
        _open_options: &[String],
        _access: Access,
    ) -> anyhow::Result<Box<dyn BackendDataset>> {
        if self.failing.lock().contains(descriptor) {
            anyhow::bail!("mock backend refuses to open {descriptor}");
        }
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(descriptor);
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let ram = self.ram.lock().get(descriptor).copied().unwrap_or(0);
        self.journal.record(JournalEvent::Open {
            descriptor: descriptor.to_owned(),
            thread: thread::responsible_id(),
        });
        Ok(Box::new(MockDataset::new(
            descriptor,
            generation,
            ram,
            self.journal.clone(),
        )))
    }
}

pub struct MockDataset {
    descriptor: String,
    generation: u64,
    ram: u64,
    bands: Vec<MockBand>,
    journal: Arc<Journal>,
}

impl MockDataset {
    fn new(descriptor: &str, generation: u64, ram: u64, journal: Arc<Journal>) -> Self {
        let full = MockBand {
            data_type: DataType::U8,
            block: (16, 16),
            fill: 7,
            no_data: Some(-9999.0),
            categories: Some(vec!["water".to_owned(), "land".to_owned()]),
            color_table: Some(ColorTable {
                entries: vec![
                    ColorEntry {
                        c1: 0,
                        c2: 0,
                        c3: 255,
                        c4: 255,
                    },
                    ColorEntry {
                        c1: 0,
                        c2: 128,
                        c3: 0,
                        c4: 255,
                    },
                ],
            }),
            unit: Some("m".to_owned()),
            overviews: vec![
                MockBand::plain(DataType::U8, (8, 8), 7),
                MockBand::plain(DataType::U8, (4, 4), 7),
            ],
            mask: Some(Box::new(MockBand::plain(DataType::U8, (16, 16), 255))),
        };
        let bare = MockBand::plain(DataType::F32, (32, 8), 3);
        Self {
            descriptor: descriptor.to_owned(),
            generation,
            ram,
            bands: vec![full, bare],
            journal,
        }
    }
}

impl Drop for MockDataset {
    fn drop(&mut self) {
        self.journal.record(JournalEvent::Close {
            descriptor: self.descriptor.clone(),
            thread: thread::responsible_id(),
        });
    }
}

impl BackendDataset for MockDataset {
    fn raster_size(&self) -> (usize, usize) {
        (64, 64)
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band(&self, index: usize) -> Option<&dyn BackendBand> {
        self.bands.get(index).map(|band| band as &dyn BackendBand)
    }

    fn estimated_ram_usage(&self) -> u64 {
        self.ram
    }

    fn spatial_ref(&self) -> Option<SpatialRef> {
        Some(SpatialRef("LOCAL_CS[\"mock\"]".to_owned()))
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        Some([0.0, 1.0, 0.0, 0.0, 0.0, -1.0])
    }

    fn metadata(&self, domain: &str) -> Option<Vec<String>> {
        match domain {
            "" => Some(vec![
                "AREA_OR_POINT=Area".to_owned(),
                format!("GENERATION={}", self.generation),
            ]),
            "mock" => Some(vec![format!("DESCRIPTOR={}", self.descriptor)]),
            _ => None,
        }
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<String> {
        match (name, domain) {
            ("GENERATION", "") => Some(self.generation.to_string()),
            ("AREA_OR_POINT", "") => Some("Area".to_owned()),
            _ => None,
        }
    }

    fn gcps(&self) -> Vec<Gcp> {
        vec![
            Gcp {
                id: "1".to_owned(),
                info: format!("generation {}", self.generation),
                pixel: 0.0,
                line: 0.0,
                x: 10.0,
                y: 20.0,
                z: 0.0,
            },
            Gcp {
                id: "2".to_owned(),
                info: String::new(),
                pixel: 63.0,
                line: 63.0,
                x: 11.0,
                y: 19.0,
                z: 0.0,
            },
        ]
    }

    fn gcp_spatial_ref(&self) -> Option<SpatialRef> {
        Some(SpatialRef("LOCAL_CS[\"mock gcp\"]".to_owned()))
    }

    fn read_region(&self, band: usize, window: Window, out: &mut [u8]) -> anyhow::Result<()> {
        let Some(band) = self.bands.get(band) else {
            anyhow::bail!("band {band} out of range");
        };
        let wanted = window.width * window.height * band.data_type.size();
        anyhow::ensure!(out.len() >= wanted, "buffer too small");
        out[..wanted].fill(band.fill);
        Ok(())
    }
}

pub struct MockBand {
    data_type: DataType,
    block: (usize, usize),
    fill: u8,
    no_data: Option<f64>,
    categories: Option<Vec<String>>,
    color_table: Option<ColorTable>,
    unit: Option<String>,
    overviews: Vec<MockBand>,
    mask: Option<Box<MockBand>>,
}

impl MockBand {
    fn plain(data_type: DataType, block: (usize, usize), fill: u8) -> Self {
        Self {
            data_type,
            block,
            fill,
            no_data: None,
            categories: None,
            color_table: None,
            unit: None,
            overviews: vec![],
            mask: None,
        }
    }
}

impl BackendBand for MockBand {
    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn block_size(&self) -> (usize, usize) {
        self.block
    }

    fn read_block(&self, _x: usize, _y: usize, out: &mut [u8]) -> anyhow::Result<()> {
        out.fill(self.fill);
        Ok(())
    }

    fn no_data_value(&self) -> Option<f64> {
        self.no_data
    }

    fn color_interpretation(&self) -> ColorInterpretation {
        if self.color_table.is_some() {
            ColorInterpretation::Palette
        } else {
            ColorInterpretation::Gray
        }
    }

    fn category_names(&self) -> Option<Vec<String>> {
        self.categories.clone()
    }

    fn color_table(&self) -> Option<ColorTable> {
        self.color_table.clone()
    }

    fn unit(&self) -> Option<String> {
        self.unit.clone()
    }

    fn overview_count(&self) -> usize {
        self.overviews.len()
    }

    fn overview(&self, level: usize) -> Option<&dyn BackendBand> {
        self.overviews.get(level).map(|band| band as &dyn BackendBand)
    }

    fn mask(&self) -> Option<&dyn BackendBand> {
        self.mask.as_deref().map(|band| band as &dyn BackendBand)
    }

    fn metadata_item(&self, name: &str, domain: &str) -> Option<String> {
        match (name, domain) {
            ("FILL", "") => Some(self.fill.to_string()),
            _ => None,
        }
    }
}
