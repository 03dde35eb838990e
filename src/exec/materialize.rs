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

//! Result materialization
//!
//! Typed rows are built by a caller-supplied constructor over the selected
//! indices: sequentially below a size threshold, otherwise in parallel over
//! contiguous index chunks writing disjoint ranges of the output directly.
//! Arrow output slices the original columns through the selection instead
//! of copying rows. A batched row iterator reuses one fixed-size buffer
//! across refills for enumerator-style consumption.

use std::collections::VecDeque;

use arrow::array::{ArrayRef, BooleanArray, UInt32Array};
use arrow::compute;
use arrow::record_batch::RecordBatch;
use rayon::prelude::*;

use crate::bitmap::SelectionBitmap;
use crate::error::{Error, Result};
use crate::table::Table;

/// Below this many rows, materialization stays sequential
pub(crate) const SEQUENTIAL_MAX_ROWS: usize = 10_000;

/// Rows per parallel materialization chunk
pub(crate) const PARALLEL_CHUNK_ROWS: usize = 4_096;

/// Rows the batched iterator builds per refill
const ITER_BATCH_ROWS: usize = 1_024;

/// Build one `T` per selected row via `build`, in index order
pub(crate) fn materialize_rows<T, F>(
    table: &Table,
    indices: &[u32],
    build: &F,
    parallel: bool,
) -> Vec<T>
where
    T: Send,
    F: Fn(&Table, usize) -> T + Sync,
{
    if !parallel || indices.len() < SEQUENTIAL_MAX_ROWS {
        return indices
            .iter()
            .map(|row| build(table, *row as usize))
            .collect();
    }
    // Indexed parallel collect fills non-overlapping ranges of the output
    // in place; there are no per-worker intermediate lists to merge
    indices
        .par_iter()
        .with_min_len(PARALLEL_CHUNK_ROWS)
        .map(|row| build(table, *row as usize))
        .collect()
}

/// Arrow output from a final selection bitmap: project, then filter every
/// column through the mask
pub(crate) fn batch_from_bitmap(
    table: &Table,
    selection: &SelectionBitmap,
    projected: Option<&[String]>,
) -> Result<RecordBatch> {
    let batch = project_batch(table, projected)?;
    let mask = BooleanArray::new(selection.to_boolean_buffer(), None);
    compute::filter_record_batch(&batch, &mask).map_err(Error::ArrowError)
}

/// Arrow output from a sparse index list: `take` every column at the
/// selected positions
pub(crate) fn batch_from_indices(
    table: &Table,
    indices: &[u32],
    projected: Option<&[String]>,
) -> Result<RecordBatch> {
    let batch = project_batch(table, projected)?;
    let indices = UInt32Array::from(indices.to_vec());
    let columns = batch
        .columns()
        .iter()
        .map(|column| {
            compute::take(column.as_ref(), &indices, None).map_err(Error::ArrowError)
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    RecordBatch::try_new(batch.schema(), columns).map_err(Error::ArrowError)
}

pub(crate) fn project_batch(
    table: &Table,
    projected: Option<&[String]>,
) -> Result<RecordBatch> {
    match projected {
        None => Ok(table.batch().clone()),
        Some(columns) => {
            let indices = columns
                .iter()
                .map(|name| table.column_index(name))
                .collect::<Result<Vec<_>>>()?;
            table.batch().project(&indices).map_err(Error::ArrowError)
        }
    }
}

/// Iterator over constructed rows that fills a reused fixed-size buffer per
/// batch, yielding elements from it sequentially
pub struct RowBatches<'a, T, F> {
    table: &'a Table,
    indices: Vec<u32>,
    next: usize,
    buffer: VecDeque<T>,
    build: F,
}

impl<'a, T, F> RowBatches<'a, T, F>
where
    F: Fn(&Table, usize) -> T,
{
    pub(crate) fn new(table: &'a Table, indices: Vec<u32>, build: F) -> Self {
        Self {
            table,
            indices,
            next: 0,
            buffer: VecDeque::with_capacity(ITER_BATCH_ROWS),
            build,
        }
    }

    fn refill(&mut self) {
        let end = (self.next + ITER_BATCH_ROWS).min(self.indices.len());
        for idx in self.next..end {
            let row = self.indices[idx] as usize;
            self.buffer.push_back((self.build)(self.table, row));
        }
        self.next = end;
    }
}

impl<T, F> Iterator for RowBatches<'_, T, F>
where
    F: Fn(&Table, usize) -> T,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.buffer.is_empty() {
            if self.next >= self.indices.len() {
                return None;
            }
            self.refill();
        }
        self.buffer.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.buffer.len() + (self.indices.len() - self.next);
        (remaining, Some(remaining))
    }
}
