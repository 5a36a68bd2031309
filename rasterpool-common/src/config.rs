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

use std::{env, str::FromStr};

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

/// Capacity below which the pool cannot operate: one slot for the caller
/// plus one for a reentrant open.
pub const MIN_POOL_SIZE: usize = 2;
pub const MAX_POOL_SIZE: usize = 1000;
pub const DEFAULT_POOL_SIZE: usize = 100;

/// Environment override for the slot capacity.
pub const POOL_SIZE_ENV: &str = "RASTERPOOL_MAX_POOL_SIZE";
/// Environment override for the RAM budget. Accepts a plain byte count or a
/// `MB`/`GB` suffixed value.
pub const POOL_RAM_ENV: &str = "RASTERPOOL_MAX_POOL_RAM_USAGE";

/// Limits applied to the dataset handle pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimits {
    /// Maximum number of slots in the pool. Clamped to
    /// `[MIN_POOL_SIZE, MAX_POOL_SIZE]` when the pool is built.
    pub max_count: usize,
    /// RAM budget in bytes for the handles kept open by the pool.
    /// `None` disables RAM-driven eviction.
    pub max_ram: Option<u64>,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_count: DEFAULT_POOL_SIZE,
            max_ram: None,
        }
    }
}

impl PoolLimits {
    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_max_ram(mut self, bytes: u64) -> Self {
        self.max_ram = Some(bytes);
        self
    }

    /// Apply environment overrides on top of `self`. Unparsable values are
    /// ignored with a warning.
    pub fn overridden_from_env(mut self) -> Self {
        if let Ok(raw) = env::var(POOL_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(count) => self.max_count = count,
                Err(_) => tracing::warn!(value = %raw, "ignoring unparsable {POOL_SIZE_ENV}"),
            }
        }
        if let Ok(raw) = env::var(POOL_RAM_ENV) {
            match parse_byte_size(&raw) {
                Some(bytes) => self.max_ram = Some(bytes),
                None => tracing::warn!(value = %raw, "ignoring unparsable {POOL_RAM_ENV}"),
            }
        }
        self
    }

    /// The effective slot capacity, clamped to the supported range.
    pub fn clamped_max_count(&self) -> usize {
        let clamped = self.max_count.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE);
        if clamped != self.max_count {
            tracing::warn!(
                requested = self.max_count,
                clamped,
                "pool capacity out of range"
            );
        }
        clamped
    }
}

/// Parse a byte count such as `"1048576"`, `"512MB"` or `"2 GB"`.
pub fn parse_byte_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(bytes) = raw.parse::<u64>() {
        return Some(bytes);
    }
    ByteSize::from_str(raw).ok().map(|size| size.as_u64())
}
