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

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("backend open of {descriptor} failed: {source}")]
    OpenFailed {
        descriptor: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(
        "too many datasets referenced at the same time: all {capacity} pool slots are busy, \
         raise the pool capacity limit"
    )]
    PoolExhausted { capacity: usize },
    /// No pool was available to open the dataset with. Only raised at
    /// construction time; forwarded proxy operations on a detached proxy
    /// silently no-op instead.
    #[error("no dataset pool is available")]
    Unavailable,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
