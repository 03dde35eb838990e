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

//! Engine configuration

use crate::error::Result;

/// Default row count below which execution stays sequential
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 10_000;

/// Default chunk size for zone maps and parallel work distribution.
/// Must stay a multiple of 64 so parallel workers write disjoint
/// selection-bitmap blocks.
pub const DEFAULT_CHUNK_SIZE: usize = 16_384;

/// Default maximum number of cached plans
pub const DEFAULT_PLAN_CACHE_SIZE: usize = 256;

/// Configuration options for the query engine
///
/// Options are set builder-style:
///
/// ```
/// use permafrost::config::EngineOptions;
///
/// let options = EngineOptions::new()
///     .with_chunk_size(8192)
///     .with_parallel_execution(false);
/// ```
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Row count below which all execution is sequential
    pub parallel_threshold: usize,
    /// Rows per chunk: the unit of zone-map summary, predicate skip and
    /// parallel work distribution. Must be a multiple of 64.
    pub chunk_size: usize,
    /// Number of worker threads; 1 forces sequential execution
    pub max_degree_of_parallelism: usize,
    /// Master switch for parallel execution
    pub enable_parallel_execution: bool,
    /// Whether compiled plans are cached
    pub plan_cache_enabled: bool,
    /// Maximum number of cached plans before eviction
    pub plan_cache_max_size: usize,
    /// When true, queries the engine cannot plan fail with
    /// [`Error::Unsupported`](crate::error::Error::Unsupported); when false
    /// the ingress is permissive where it can be
    pub strict_mode: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_degree_of_parallelism: num_cpus::get(),
            enable_parallel_execution: true,
            plan_cache_enabled: true,
            plan_cache_max_size: DEFAULT_PLAN_CACHE_SIZE,
            strict_mode: true,
        }
    }
}

impl EngineOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Customize the parallelism row threshold
    pub fn with_parallel_threshold(mut self, n: usize) -> Self {
        self.parallel_threshold = n;
        self
    }

    /// Customize the chunk size (must be a multiple of 64)
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// Customize the worker count
    pub fn with_max_degree_of_parallelism(mut self, n: usize) -> Self {
        self.max_degree_of_parallelism = n;
        self
    }

    /// Enable or disable parallel execution
    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.enable_parallel_execution = enabled;
        self
    }

    /// Enable or disable the plan cache
    pub fn with_plan_cache(mut self, enabled: bool) -> Self {
        self.plan_cache_enabled = enabled;
        self
    }

    /// Customize the plan cache capacity
    pub fn with_plan_cache_max_size(mut self, n: usize) -> Self {
        self.plan_cache_max_size = n;
        self
    }

    /// Enable or disable strict mode
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Whether a stage over `num_rows` rows should run on the worker pool
    pub fn use_parallel(&self, num_rows: usize) -> bool {
        self.enable_parallel_execution
            && self.max_degree_of_parallelism > 1
            && num_rows >= self.parallel_threshold
    }

    /// Validate option combinations
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size % 64 != 0 {
            return invalid_argument_err!(
                "chunk_size must be a non-zero multiple of 64, got {}",
                self.chunk_size
            );
        }
        if self.max_degree_of_parallelism == 0 {
            return invalid_argument_err!("max_degree_of_parallelism must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = EngineOptions::default();
        options.validate().unwrap();
        assert_eq!(options.chunk_size, 16_384);
        assert_eq!(options.parallel_threshold, 10_000);
        assert!(options.enable_parallel_execution);
        assert!(options.plan_cache_enabled);
    }

    #[test]
    fn rejects_unaligned_chunk_size() {
        let options = EngineOptions::new().with_chunk_size(1000);
        assert!(options.validate().is_err());

        let options = EngineOptions::new().with_chunk_size(0);
        assert!(options.validate().is_err());

        let options = EngineOptions::new().with_chunk_size(128);
        options.validate().unwrap();
    }

    #[test]
    fn degree_one_forces_sequential() {
        let options = EngineOptions::new().with_max_degree_of_parallelism(1);
        assert!(!options.use_parallel(1_000_000));
    }
}
