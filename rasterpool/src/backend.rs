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

//! The backend seam consumed by the pool.
//!
//! A backend turns a descriptor string into an open dataset handle. The pool
//! controls when handles are opened, and under which responsible thread id
//! they are dropped; everything else about the physical formats is the
//! backend's business.

use serde::{Deserialize, Serialize};

/// Opens backend datasets on behalf of the pool.
///
/// The opener may itself lease datasets from the pool while it runs; the
/// pool never holds its lock across this call.
pub trait DatasetOpener: Send + Sync + 'static {
    fn open(
        &self,
        descriptor: &str,
        open_options: &[String],
        access: Access,
    ) -> anyhow::Result<Box<dyn BackendDataset>>;
}

/// An open backend dataset handle. Closing is dropping.
pub trait BackendDataset: Send + Sync {
    /// `(width, height)` in pixels.
    fn raster_size(&self) -> (usize, usize);

    fn band_count(&self) -> usize;

    /// Band by zero-based index.
    fn band(&self, index: usize) -> Option<&dyn BackendBand>;

    /// Estimated resident memory of this handle in bytes. Zero means
    /// "unknown"; the pool then skips RAM accounting for the handle.
    fn estimated_ram_usage(&self) -> u64 {
        0
    }

    fn spatial_ref(&self) -> Option<SpatialRef> {
        None
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        None
    }

    fn metadata(&self, _domain: &str) -> Option<Vec<String>> {
        None
    }

    fn metadata_item(&self, _name: &str, _domain: &str) -> Option<String> {
        None
    }

    fn gcps(&self) -> Vec<Gcp> {
        Vec::new()
    }

    fn gcp_spatial_ref(&self) -> Option<SpatialRef> {
        None
    }

    /// Read a window of `band` into `out`, packed in the band's data type.
    fn read_region(&self, band: usize, window: Window, out: &mut [u8]) -> anyhow::Result<()>;

    fn flush(&self) {}
}

/// One band of an open backend dataset.
pub trait BackendBand {
    fn data_type(&self) -> DataType;

    /// `(width, height)` of the natural I/O block.
    fn block_size(&self) -> (usize, usize);

    fn read_block(&self, x: usize, y: usize, out: &mut [u8]) -> anyhow::Result<()>;

    fn no_data_value(&self) -> Option<f64> {
        None
    }

    fn color_interpretation(&self) -> ColorInterpretation {
        ColorInterpretation::Undefined
    }

    fn scale(&self) -> Option<f64> {
        None
    }

    fn offset(&self) -> Option<f64> {
        None
    }

    fn category_names(&self) -> Option<Vec<String>> {
        None
    }

    fn color_table(&self) -> Option<ColorTable> {
        None
    }

    fn unit(&self) -> Option<String> {
        None
    }

    fn overview_count(&self) -> usize {
        0
    }

    fn overview(&self, _level: usize) -> Option<&dyn BackendBand> {
        None
    }

    fn mask(&self) -> Option<&dyn BackendBand> {
        None
    }

    fn metadata(&self, _domain: &str) -> Option<Vec<String>> {
        None
    }

    fn metadata_item(&self, _name: &str, _domain: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Access {
    #[default]
    ReadOnly,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl DataType {
    /// Bytes per sample.
    pub fn size(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Affine transform from pixel/line to georeferenced coordinates, in the
/// order `[x0, x_pixel, x_line, y0, y_pixel, y_line]`.
pub type GeoTransform = [f64; 6];

/// An opaque spatial reference, carried as WKT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialRef(pub String);

impl SpatialRef {
    pub fn wkt(&self) -> &str {
        &self.0
    }
}

/// A ground control point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gcp {
    pub id: String,
    pub info: String,
    pub pixel: f64,
    pub line: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorEntry {
    pub c1: i16,
    pub c2: i16,
    pub c3: i16,
    pub c4: i16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColorTable {
    pub entries: Vec<ColorEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorInterpretation {
    Undefined,
    Gray,
    Palette,
    Red,
    Green,
    Blue,
    Alpha,
}

/// A pixel window of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}
