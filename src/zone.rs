// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Zone maps: per-chunk min/max summaries enabling skip-scans
//!
//! A zone map is built once per numeric column when a record batch is
//! wrapped into a [`Table`](crate::table::Table) and is immutable afterwards.
//! Range predicates consult it to rule out whole chunks without touching the
//! value buffer.

use arrow::buffer::NullBuffer;

/// Min/max summary of one chunk of one column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkStats<T> {
    /// Smallest non-null value in the chunk. A placeholder when `all_null`.
    pub min: T,
    /// Largest non-null value in the chunk. A placeholder when `all_null`.
    pub max: T,
    /// Whether the chunk contains no non-null value
    pub all_null: bool,
}

/// Zone map of a single column at a fixed chunk size
#[derive(Debug, Clone, PartialEq)]
pub struct TypedZoneMap<T> {
    chunks: Vec<ChunkStats<T>>,
    /// Global (min, max) over all chunks that hold at least one value
    global: Option<(T, T)>,
    chunk_size: usize,
}

impl<T: Copy + Default + PartialOrd> TypedZoneMap<T> {
    /// Build from a value buffer and its validity in a single pass.
    ///
    /// Comparisons use `<`/`>` directly, so float NaNs never become a chunk
    /// extremum; skipping them keeps the summary conservative.
    pub(crate) fn build(
        values: &[T],
        nulls: Option<&NullBuffer>,
        chunk_size: usize,
    ) -> Self {
        debug_assert!(chunk_size > 0);
        let num_rows = values.len();
        let num_chunks = num_rows.div_ceil(chunk_size);
        let mut chunks = Vec::with_capacity(num_chunks);
        for k in 0..num_chunks {
            let lo = k * chunk_size;
            let hi = ((k + 1) * chunk_size).min(num_rows);
            let mut min = T::default();
            let mut max = T::default();
            let mut saw_value = false;
            for row in lo..hi {
                if nulls.is_some_and(|nulls| nulls.is_null(row)) {
                    continue;
                }
                let value = values[row];
                // NaN is unordered and can never satisfy a range predicate;
                // keeping it out of the extrema keeps chunk skipping safe.
                // The float NotEq skip test is disabled separately.
                if value.partial_cmp(&value).is_none() {
                    continue;
                }
                if !saw_value {
                    min = value;
                    max = value;
                    saw_value = true;
                } else {
                    if value < min {
                        min = value;
                    }
                    if value > max {
                        max = value;
                    }
                }
            }
            chunks.push(ChunkStats {
                min,
                max,
                all_null: !saw_value,
            });
        }

        let global = chunks
            .iter()
            .filter(|stats| !stats.all_null)
            .fold(None, |acc: Option<(T, T)>, stats| match acc {
                None => Some((stats.min, stats.max)),
                Some((min, max)) => Some((
                    if stats.min < min { stats.min } else { min },
                    if stats.max > max { stats.max } else { max },
                )),
            });

        Self {
            chunks,
            global,
            chunk_size,
        }
    }

    /// Stats for chunk `k`
    pub fn chunk(&self, k: usize) -> &ChunkStats<T> {
        &self.chunks[k]
    }

    /// Number of summarized chunks
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk size the map was built with
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Global (min, max), `None` when every chunk is all-null
    pub fn global(&self) -> Option<(T, T)> {
        self.global
    }
}

/// Zone map over the numeric column types the engine summarizes.
/// String and boolean columns carry no zone map.
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneMap {
    /// For Int32 and Date32 columns
    Int32(TypedZoneMap<i32>),
    /// For Int64, Date64 and timestamp columns
    Int64(TypedZoneMap<i64>),
    /// For Float32 columns
    Float32(TypedZoneMap<f32>),
    /// For Float64 columns
    Float64(TypedZoneMap<f64>),
    /// For Decimal128 columns (unscaled representation)
    Decimal128(TypedZoneMap<i128>),
}

impl ZoneMap {
    /// Number of summarized chunks
    pub fn num_chunks(&self) -> usize {
        match self {
            ZoneMap::Int32(map) => map.num_chunks(),
            ZoneMap::Int64(map) => map.num_chunks(),
            ZoneMap::Float32(map) => map.num_chunks(),
            ZoneMap::Float64(map) => map.num_chunks(),
            ZoneMap::Decimal128(map) => map.num_chunks(),
        }
    }

    /// Chunk size the map was built with
    pub fn chunk_size(&self) -> usize {
        match self {
            ZoneMap::Int32(map) => map.chunk_size(),
            ZoneMap::Int64(map) => map.chunk_size(),
            ZoneMap::Float32(map) => map.chunk_size(),
            ZoneMap::Float64(map) => map.chunk_size(),
            ZoneMap::Decimal128(map) => map.chunk_size(),
        }
    }

    /// Whether chunk `k` holds no non-null value
    pub fn all_null(&self, k: usize) -> bool {
        match self {
            ZoneMap::Int32(map) => map.chunk(k).all_null,
            ZoneMap::Int64(map) => map.chunk(k).all_null,
            ZoneMap::Float32(map) => map.chunk(k).all_null,
            ZoneMap::Float64(map) => map.chunk(k).all_null,
            ZoneMap::Decimal128(map) => map.chunk(k).all_null,
        }
    }
}
