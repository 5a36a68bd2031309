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

pub use rasterpool_common::config::PoolLimits;

pub use crate::{
    backend::{
        Access, BackendBand, BackendDataset, ColorEntry, ColorInterpretation, ColorTable,
        DataType, DatasetOpener, Gcp, GeoTransform, SpatialRef, Window,
    },
    error::{Error, Result},
    lifecycle::{configure, force_destroy, pool_ref, prevent_destroy, register_opener, PoolRef},
    pool::{DatasetKey, DatasetLease, Pool, PoolMetrics, SlotSnapshot},
    proxy::{ProxyBand, ProxyDataset, ProxyDatasetBuilder},
};
