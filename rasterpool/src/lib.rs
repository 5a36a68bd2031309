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

//! Bounded, LRU-evicting dataset handle pool.
//!
//! The pool multiplexes access to an unbounded set of logical datasets
//! through a fixed-size working set of open backend handles. Proxy datasets
//! are the user-facing front-ends: each proxy operation transiently leases
//! the real handle from the pool, delegates, and releases it.

pub mod backend;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod proxy;

pub mod test_utils;

pub mod prelude;
