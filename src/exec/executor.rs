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

//! The query executor
//!
//! One evaluation: resolve the compiled plan (through the cache), pick an
//! execution strategy, drive it to a terminal result. Strategies:
//!
//! - *fused*: single ungrouped aggregate over a filter, reduced in one pass
//! - *streaming*: `any`/`all`/`first` and small `take n`, scalar row path
//! - *sparse*: low-selectivity materialization through an index list
//! - *bitmap*: the general path through a full selection bitmap
//!
//! An `InternalFused` failure falls back to the bitmap path exactly once;
//! every other error propagates immediately.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use log::{debug, warn};
use rayon::prelude::*;

use crate::aggregate::fused;
use crate::aggregate::masked::aggregate_selection;
use crate::aggregate::{group::group_aggregate, AggregateDescriptor, GroupRow};
use crate::bitmap::{BitmapChunkMut, BitmapPool, SelectionBitmap};
use crate::cache::{CacheStats, PlanCache};
use crate::collect::{
    can_skip_chunk, sparse_collect, stream_all, stream_any, stream_first, stream_take,
};
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::exec::materialize::{
    batch_from_bitmap, batch_from_indices, materialize_rows, project_batch, RowBatches,
};
use crate::plan::optimizer::Optimizer;
use crate::plan::query::{flatten, QueryPlan};
use crate::plan::LogicalPlan;
use crate::predicate::Predicate;
use crate::scalar::ScalarValue;
use crate::table::Table;

/// Largest `take` the streaming collector serves
const STREAM_TAKE_MAX: usize = 1_024;

/// Below this estimated selectivity, materialization goes through the
/// sparse index collector instead of a bitmap
const SPARSE_SELECTIVITY: f64 = 0.05;

/// Result of [`Engine::execute`]
#[derive(Debug, Clone)]
pub enum QueryOutput {
    /// A single aggregate value
    Scalar(ScalarValue),
    /// Grouped aggregation results in first-occurrence key order
    Groups(Vec<GroupRow>),
    /// Materialized rows as a new record batch
    Batch(RecordBatch),
}

/// The query engine: options, plan cache and worker pool
#[derive(Debug)]
pub struct Engine {
    options: EngineOptions,
    optimizer: Optimizer,
    cache: PlanCache,
    pool: Arc<BitmapPool>,
    workers: Option<rayon::ThreadPool>,
}

impl Engine {
    /// Create an engine with default options
    pub fn new() -> Result<Self> {
        Self::with_options(EngineOptions::default())
    }

    /// Create an engine with the given options
    pub fn with_options(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        let workers = if options.enable_parallel_execution
            && options.max_degree_of_parallelism > 1
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.max_degree_of_parallelism)
                .build()
                .map_err(|e| Error::Internal(format!("worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            cache: PlanCache::new(options.plan_cache_enabled, options.plan_cache_max_size),
            optimizer: Optimizer::new(),
            pool: BitmapPool::new(),
            workers,
            options,
        })
    }

    /// The engine's options
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Plan cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of cached plans
    pub fn cached_plans(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached plan
    pub fn clear_plan_cache(&self) {
        self.cache.clear();
    }

    /// Wrap a batch for this engine's chunk geometry
    pub fn wrap(
        &self,
        name: impl Into<String>,
        batch: RecordBatch,
    ) -> Result<Table> {
        Table::try_new(name, batch, self.options.chunk_size)
    }

    /// Compile `plan`: cache lookup, optimize on miss, flatten, insert
    pub fn compile(&self, table: &Table, plan: &LogicalPlan) -> Result<Arc<QueryPlan>> {
        if table.chunk_size() != self.options.chunk_size {
            return Err(Error::RowCountMismatch {
                expected: table.chunk_size(),
                actual: self.options.chunk_size,
            });
        }
        if let Some(compiled) = self.cache.get(plan) {
            debug!("plan cache hit");
            return Ok(compiled);
        }
        let optimized = self.optimizer.optimize(plan.clone(), table)?;
        let compiled = Arc::new(flatten(&optimized, table)?);
        self.cache.put(plan, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Execute `plan`, producing a scalar, groups, or a record batch
    /// according to its terminal node
    pub fn execute(&self, table: &Table, plan: &LogicalPlan) -> Result<QueryOutput> {
        let query = self.compile(table, plan)?;
        if let Some(descriptor) = &query.aggregate {
            return self
                .run_aggregate(table, &query, descriptor)
                .map(QueryOutput::Scalar);
        }
        if let Some(descriptor) = &query.group_by {
            let selection = self.evaluate_selection(table, &query)?;
            debug!("execution strategy: bitmap group-by");
            return group_aggregate(table, &selection, descriptor).map(QueryOutput::Groups);
        }
        self.materialize_batch(table, &query).map(QueryOutput::Batch)
    }

    /// Parse and execute a SQL query against `table`
    pub fn sql(&self, table: &Table, sql: &str) -> Result<QueryOutput> {
        let plan = crate::sql::parse(sql, table, &self.options)?;
        self.execute(table, &plan)
    }

    /// Materialize one `T` per matching row via `build`, in row order
    pub fn collect_rows<T, F>(&self, table: &Table, plan: &LogicalPlan, build: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&Table, usize) -> T + Sync,
    {
        let query = self.compile(table, plan)?;
        let indices = match self.select_rows(table, &query)? {
            RowSelection::Indices(indices) => indices,
            RowSelection::Bitmap(selection) => collect_bitmap_indices(&selection),
        };
        let parallel = self.options.use_parallel(indices.len());
        Ok(self.run(|| materialize_rows(table, &indices, &build, parallel)))
    }

    /// Iterate matching rows through a pooled, batched constructor
    pub fn iter_rows<'a, T, F>(
        &self,
        table: &'a Table,
        plan: &LogicalPlan,
        build: F,
    ) -> Result<RowBatches<'a, T, F>>
    where
        F: Fn(&Table, usize) -> T,
    {
        let query = self.compile(table, plan)?;
        let indices = match self.select_rows(table, &query)? {
            RowSelection::Indices(indices) => indices,
            RowSelection::Bitmap(selection) => collect_bitmap_indices(&selection),
        };
        Ok(RowBatches::new(table, indices, build))
    }

    /// Whether any row matches the plan's filter (after its pagination)
    pub fn any(&self, table: &Table, plan: &LogicalPlan) -> Result<bool> {
        let query = self.compile(table, plan)?;
        if query.take == Some(0) {
            return Ok(false);
        }
        if query.pagination_before_predicates && query.has_pagination() {
            let selection = self.evaluate_selection(table, &query)?;
            return Ok(selection.any());
        }
        debug!("execution strategy: streaming any");
        match query.skip {
            // Skipped matches only count if they exist, so ANY with a skip
            // of n asks for a match of rank n
            Some(skip) => Ok(stream_first(table, &query.predicates, skip)?.is_some()),
            None => stream_any(table, &query.predicates),
        }
    }

    /// Whether every row matches the plan's filter
    pub fn all(&self, table: &Table, plan: &LogicalPlan) -> Result<bool> {
        let query = self.compile(table, plan)?;
        if query.has_pagination() {
            return unsupported_err!("ALL over a paginated query is not supported");
        }
        debug!("execution strategy: streaming all");
        stream_all(table, &query.predicates)
    }

    /// The first matching row, built through `build`; `EmptySequence` when
    /// nothing matches
    pub fn first_with<T, F>(&self, table: &Table, plan: &LogicalPlan, build: F) -> Result<T>
    where
        F: Fn(&Table, usize) -> T,
    {
        let query = self.compile(table, plan)?;
        if query.take == Some(0) {
            return Err(Error::EmptySequence("FIRST"));
        }
        let row = if query.pagination_before_predicates && query.has_pagination() {
            let selection = self.evaluate_selection(table, &query)?;
            selection.selected_indices().next()
        } else {
            debug!("execution strategy: streaming first");
            stream_first(table, &query.predicates, query.skip.unwrap_or(0))?
        };
        row.map(|row| build(table, row))
            .ok_or(Error::EmptySequence("FIRST"))
    }

    fn run_aggregate(
        &self,
        table: &Table,
        query: &QueryPlan,
        descriptor: &AggregateDescriptor,
    ) -> Result<ScalarValue> {
        if !query.has_pagination() && fused::eligible(table, &query.predicates, descriptor)
        {
            debug!("execution strategy: fused aggregate");
            match self.run(|| {
                fused::fused_aggregate(table, &query.predicates, descriptor, &self.options)
            }) {
                Ok(value) => return Ok(value),
                Err(Error::InternalFused(reason)) => {
                    // Same query, same result: retry once through the
                    // general path before surfacing anything
                    warn!("fused path failed ({reason}); retrying via bitmap");
                }
                Err(error) => return Err(error),
            }
        }
        debug!("execution strategy: bitmap aggregate");
        let mut selection = self.evaluate_selection(table, query)?;
        aggregate_selection(table, &mut selection, descriptor)
    }

    fn materialize_batch(&self, table: &Table, query: &QueryPlan) -> Result<RecordBatch> {
        // Pure pagination over the scan: slice, no evaluation at all
        if query.predicates.is_empty() && query.has_pagination() {
            let num_rows = table.num_rows();
            let start = query.skip.unwrap_or(0).min(num_rows);
            let len = query.take.unwrap_or(num_rows).min(num_rows - start);
            debug!("execution strategy: slice");
            let projected = project_batch(table, query.projected_columns.as_deref())?;
            return Ok(projected.slice(start, len));
        }
        match self.select_rows(table, query)? {
            RowSelection::Indices(indices) => {
                batch_from_indices(table, &indices, query.projected_columns.as_deref())
            }
            RowSelection::Bitmap(selection) => {
                batch_from_bitmap(table, &selection, query.projected_columns.as_deref())
            }
        }
    }

    /// Choose streaming, sparse, or bitmap row selection
    fn select_rows(&self, table: &Table, query: &QueryPlan) -> Result<RowSelection> {
        if !query.pagination_before_predicates {
            if let Some(take) = query.take {
                if take <= STREAM_TAKE_MAX {
                    debug!("execution strategy: streaming take {take}");
                    let indices = stream_take(
                        table,
                        &query.predicates,
                        query.skip.unwrap_or(0),
                        take,
                    )?;
                    return Ok(RowSelection::Indices(indices));
                }
            }
            if !query.predicates.is_empty() && query.selectivity < SPARSE_SELECTIVITY {
                debug!(
                    "execution strategy: sparse collect (selectivity {:.4})",
                    query.selectivity
                );
                let parallel = self.options.use_parallel(table.num_rows());
                let mut indices = self.run(|| {
                    sparse_collect(table, &query.predicates, None, parallel)
                })?;
                if query.has_pagination() {
                    let skip = query.skip.unwrap_or(0).min(indices.len());
                    let end = query
                        .take
                        .map_or(indices.len(), |take| (skip + take).min(indices.len()));
                    indices = indices[skip..end].to_vec();
                }
                return Ok(RowSelection::Indices(indices));
            }
        }
        debug!("execution strategy: bitmap");
        self.evaluate_selection(table, query).map(RowSelection::Bitmap)
    }

    /// Evaluate the plan's predicates into a full selection bitmap and
    /// apply its pagination window
    fn evaluate_selection(&self, table: &Table, query: &QueryPlan) -> Result<SelectionBitmap> {
        let num_rows = table.num_rows();
        let mut selection = self.pool.acquire(num_rows, true);
        if num_rows == 0 {
            return Ok(selection);
        }

        if query.pagination_before_predicates {
            // The window restricts raw row positions before any predicate
            let skip = query.skip.unwrap_or(0);
            if skip > 0 {
                selection.clear_range(0, skip.min(num_rows));
            }
            if let Some(take) = query.take {
                let end = skip.saturating_add(take);
                if end < num_rows {
                    selection.clear_range(end, num_rows);
                }
            }
        }

        if !query.predicates.is_empty() {
            let chunk_size = self.options.chunk_size;
            let predicates = &query.predicates;
            if self.options.use_parallel(num_rows) {
                // Chunk boundaries are 64-aligned, so workers own disjoint
                // blocks of the bitmap
                let words = chunk_size / 64;
                let blocks = selection.blocks_mut();
                self.run(|| {
                    blocks
                        .par_chunks_mut(words)
                        .enumerate()
                        .try_for_each(|(k, blocks)| {
                            let bounds = table.chunk_bounds(k);
                            let mut view = BitmapChunkMut::new(
                                blocks,
                                bounds.start,
                                bounds.end - bounds.start,
                            );
                            evaluate_chunk(table, predicates, k, &mut view)
                        })
                })?;
            } else {
                for (k, mut view) in
                    selection.chunk_views_mut(chunk_size).into_iter().enumerate()
                {
                    evaluate_chunk(table, predicates, k, &mut view)?;
                }
            }
        }

        if !query.pagination_before_predicates && query.has_pagination() {
            selection.retain_window(query.skip.unwrap_or(0), query.take);
        }
        Ok(selection)
    }

    /// Run `f` on the engine's worker pool when one exists
    fn run<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.workers {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

impl QueryPlan {
    pub(crate) fn has_pagination(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }
}

enum RowSelection {
    Indices(Vec<u32>),
    Bitmap(SelectionBitmap),
}

fn collect_bitmap_indices(selection: &SelectionBitmap) -> Vec<u32> {
    selection.selected_indices().map(|row| row as u32).collect()
}

fn evaluate_chunk(
    table: &Table,
    predicates: &[Predicate],
    k: usize,
    view: &mut BitmapChunkMut<'_>,
) -> Result<()> {
    if can_skip_chunk(table, predicates, k) {
        view.clear_all();
        return Ok(());
    }
    for predicate in predicates {
        if !view.any() {
            break;
        }
        predicate.evaluate_range(table, view)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AggregateDescriptor, AggregateOp, GroupByDescriptor};
    use crate::plan::LogicalPlanBuilder;
    use crate::predicate::tests::int32_cmp;
    use crate::predicate::CompareOp;
    use arrow::array::{AsArray, Int32Array};
    use arrow::datatypes::{DataType, Field, Int32Type, Schema};
    use std::sync::Arc as StdArc;

    fn small_engine() -> Engine {
        Engine::with_options(
            EngineOptions::new()
                .with_chunk_size(128)
                .with_parallel_execution(false),
        )
        .unwrap()
    }

    fn ramp_table(engine: &Engine, n: i32) -> Table {
        let schema = StdArc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![StdArc::new(Int32Array::from_iter_values(0..n))],
        )
        .unwrap();
        engine.wrap("t", batch).unwrap()
    }

    #[test]
    fn execute_filter_to_batch() {
        let engine = small_engine();
        let table = ramp_table(&engine, 1_000);
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::GtEq, 995))
            .build();
        match engine.execute(&table, &plan).unwrap() {
            QueryOutput::Batch(batch) => {
                assert_eq!(batch.num_rows(), 5);
                let a = batch.column(0).as_primitive::<Int32Type>();
                assert_eq!(a.value(0), 995);
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn chunk_size_mismatch_is_row_count_mismatch() {
        let engine = small_engine();
        let batch = RecordBatch::try_new(
            StdArc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)])),
            vec![StdArc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let table = Table::try_new("t", batch, 64).unwrap();
        let plan = LogicalPlanBuilder::scan(&table).build();
        let err = engine.execute(&table, &plan).unwrap_err();
        assert!(matches!(err, Error::RowCountMismatch { .. }));
    }

    #[test]
    fn aggregate_uses_cache_on_second_run() {
        let engine = small_engine();
        let table = ramp_table(&engine, 10_000);
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Sum, Some("a")).unwrap();
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Lt, 10))
            .aggregate(descriptor)
            .build();
        let first = engine.execute(&table, &plan).unwrap();
        let second = engine.execute(&table, &plan).unwrap();
        match (first, second) {
            (QueryOutput::Scalar(a), QueryOutput::Scalar(b)) => {
                assert_eq!(a, ScalarValue::Int64(Some(45)));
                assert_eq!(a, b);
            }
            other => panic!("expected scalars, got {other:?}"),
        }
        assert_eq!(engine.cache_stats().hits, 1);
        assert_eq!(engine.cached_plans(), 1);
    }

    #[test]
    fn group_by_over_selection() {
        let engine = small_engine();
        let schema = StdArc::new(Schema::new(vec![
            Field::new("k", DataType::Int32, false),
            Field::new("v", DataType::Int32, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                StdArc::new(Int32Array::from(vec![1, 2, 1, 2, 1])),
                StdArc::new(Int32Array::from(vec![10, 20, 30, 40, 50])),
            ],
        )
        .unwrap();
        let table = engine.wrap("t", batch).unwrap();
        let group_by = GroupByDescriptor::try_new(
            &table,
            "k",
            vec![AggregateDescriptor::try_new(&table, AggregateOp::Sum, Some("v")).unwrap()],
        )
        .unwrap();
        let plan = LogicalPlanBuilder::scan(&table).group_by(group_by).build();
        match engine.execute(&table, &plan).unwrap() {
            QueryOutput::Groups(groups) => {
                assert_eq!(groups.len(), 2);
                assert_eq!(groups[0].key, ScalarValue::Int32(Some(1)));
                assert_eq!(groups[0].values[0].1, ScalarValue::Int64(Some(90)));
                assert_eq!(groups[1].values[0].1, ScalarValue::Int64(Some(60)));
            }
            other => panic!("expected groups, got {other:?}"),
        }
    }

    #[test]
    fn limit_over_scan_slices() {
        let engine = small_engine();
        let table = ramp_table(&engine, 1_000);
        let plan = LogicalPlanBuilder::scan(&table).offset(10).limit(3).build();
        match engine.execute(&table, &plan).unwrap() {
            QueryOutput::Batch(batch) => {
                assert_eq!(batch.num_rows(), 3);
                let a = batch.column(0).as_primitive::<Int32Type>();
                assert_eq!(a.value(0), 10);
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn any_all_first() {
        let engine = small_engine();
        let table = ramp_table(&engine, 1_000);
        let matching = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 990))
            .build();
        assert!(engine.any(&table, &matching).unwrap());
        assert!(!engine.all(&table, &matching).unwrap());
        let first = engine.first_with(&table, &matching, |_, row| row).unwrap();
        assert_eq!(first, 991);

        let nothing = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 10_000))
            .build();
        assert!(!engine.any(&table, &nothing).unwrap());
        let err = engine.first_with(&table, &nothing, |_, row| row).unwrap_err();
        assert!(matches!(err, Error::EmptySequence("FIRST")));
    }

    #[test]
    fn collect_rows_in_order() {
        let engine = small_engine();
        let table = ramp_table(&engine, 2_000);
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::GtEq, 1_990))
            .build();
        let rows = engine
            .collect_rows(&table, &plan, |_, row| row as i32)
            .unwrap();
        assert_eq!(rows, (1_990..2_000).collect::<Vec<i32>>());
    }

    #[test]
    fn pagination_after_filter() {
        let engine = small_engine();
        let table = ramp_table(&engine, 1_000);
        // matches 501..=999, skip 2 take 3 -> 503, 504, 505
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 500))
            .offset(2)
            .limit(3)
            .build();
        let rows = engine
            .collect_rows(&table, &plan, |_, row| row as i32)
            .unwrap();
        assert_eq!(rows, vec![503, 504, 505]);
    }

    #[test]
    fn pagination_before_filter() {
        let engine = small_engine();
        let table = ramp_table(&engine, 1_000);
        // first 10 raw rows, then filter a > 5 -> 6..=9
        let plan = LogicalPlanBuilder::scan(&table)
            .limit(10)
            .filter(int32_cmp(&table, "a", CompareOp::Gt, 5))
            .build();
        let rows = engine
            .collect_rows(&table, &plan, |_, row| row as i32)
            .unwrap();
        assert_eq!(rows, vec![6, 7, 8, 9]);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let sequential = small_engine();
        let parallel = Engine::with_options(
            EngineOptions::new()
                .with_chunk_size(128)
                .with_parallel_threshold(100),
        )
        .unwrap();
        let table = ramp_table(&sequential, 50_000);
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(int32_cmp(&table, "a", CompareOp::GtEq, 12_345))
            .build();
        let seq_rows = sequential
            .collect_rows(&table, &plan, |_, row| row as u32)
            .unwrap();
        let par_rows = parallel
            .collect_rows(&table, &plan, |_, row| row as u32)
            .unwrap();
        assert_eq!(seq_rows, par_rows);
    }
}
