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

//! Fused filter+aggregate execution
//!
//! For a single ungrouped aggregate over a filtered scan, evaluation and
//! reduction run in one pass per chunk: the predicates fill a chunk-local
//! scratch mask, then a block-wise extraction loop feeds matching lanes
//! straight into the accumulator. The full-length selection bitmap is never
//! materialized. Chunks reduce associatively, in parallel when the row count
//! warrants it.

use arrow::buffer::NullBuffer;
use rayon::prelude::*;

use crate::aggregate::{AggValue, AggregateDescriptor, ChunkAccumulator, NumericAccumulator};
use crate::bitmap::{and_bit_chunks, BitmapChunkMut};
use crate::collect::can_skip_chunk;
use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::scalar::ScalarValue;
use crate::table::{ColumnData, Table};

/// Row count below which the fused path is not worth choosing
pub(crate) const FUSED_MIN_ROWS: usize = 1_000;

/// Whether the fused path applies: exactly one ungrouped aggregate, at least
/// one predicate, enough rows, and a primitive (non-dictionary) aggregate
/// column
pub(crate) fn eligible(
    table: &Table,
    predicates: &[Predicate],
    descriptor: &AggregateDescriptor,
) -> bool {
    if predicates.is_empty() || table.num_rows() < FUSED_MIN_ROWS {
        return false;
    }
    match &descriptor.column {
        None => true,
        Some(column) => matches!(
            table.column_data(column.index),
            Ok(ColumnData::Int32 { .. }
                | ColumnData::Int64 { .. }
                | ColumnData::Float32 { .. }
                | ColumnData::Float64 { .. }
                | ColumnData::Decimal128 { .. })
        ),
    }
}

/// Run the fused aggregation. Internal faults are reported as
/// [`Error::InternalFused`] so the executor can retry once through the
/// bitmap path; result-bearing errors (`EmptySequence`, `Overflow`) pass
/// through untouched.
pub(crate) fn fused_aggregate(
    table: &Table,
    predicates: &[Predicate],
    descriptor: &AggregateDescriptor,
    options: &EngineOptions,
) -> Result<ScalarValue> {
    let accumulator = match &descriptor.column {
        None => {
            let count = fused_count(table, predicates, options).map_err(to_fused)?;
            NumericAccumulator::CountOnly(count)
        }
        Some(column) => {
            let data = table.column_data(column.index).map_err(to_fused)?;
            match data {
                ColumnData::Int32 { values, nulls } => NumericAccumulator::Int32(
                    fused_chunks(table, predicates, values, nulls, options)
                        .map_err(to_fused)?,
                ),
                ColumnData::Int64 { values, nulls } => NumericAccumulator::Int64(
                    fused_chunks(table, predicates, values, nulls, options)
                        .map_err(to_fused)?,
                ),
                ColumnData::Float32 { values, nulls } => NumericAccumulator::Float32(
                    fused_chunks(table, predicates, values, nulls, options)
                        .map_err(to_fused)?,
                ),
                ColumnData::Float64 { values, nulls } => NumericAccumulator::Float64(
                    fused_chunks(table, predicates, values, nulls, options)
                        .map_err(to_fused)?,
                ),
                ColumnData::Decimal128 { values, nulls, .. } => {
                    NumericAccumulator::Decimal128(
                        fused_chunks(table, predicates, values, nulls, options)
                            .map_err(to_fused)?,
                    )
                }
                _ => {
                    return Err(Error::InternalFused(format!(
                        "fused aggregation chosen for non-primitive column '{}'",
                        column.name
                    )))
                }
            }
        }
    };
    accumulator.finalize(descriptor)
}

fn to_fused(error: Error) -> Error {
    match error {
        // Result-bearing failures must not trigger the bitmap retry
        Error::EmptySequence(_) | Error::Overflow(_) => error,
        other => Error::InternalFused(other.to_string()),
    }
}

fn fused_chunks<T: AggValue>(
    table: &Table,
    predicates: &[Predicate],
    values: &[T],
    nulls: Option<&NullBuffer>,
    options: &EngineOptions,
) -> Result<ChunkAccumulator<T>> {
    let num_chunks = table.num_chunks();
    if options.use_parallel(table.num_rows()) {
        (0..num_chunks)
            .into_par_iter()
            .map(|k| fused_chunk(table, predicates, values, nulls, k))
            .try_reduce(ChunkAccumulator::default, |a, b| Ok(a.merge(b)))
    } else {
        let mut acc = ChunkAccumulator::default();
        for k in 0..num_chunks {
            acc = acc.merge(fused_chunk(table, predicates, values, nulls, k)?);
        }
        Ok(acc)
    }
}

/// Evaluate all predicates into a chunk-local mask, then extract matching
/// lanes into the accumulator
fn fused_chunk<T: AggValue>(
    table: &Table,
    predicates: &[Predicate],
    values: &[T],
    nulls: Option<&NullBuffer>,
    k: usize,
) -> Result<ChunkAccumulator<T>> {
    let mut acc = ChunkAccumulator::default();
    if can_skip_chunk(table, predicates, k) {
        return Ok(acc);
    }
    let bounds = table.chunk_bounds(k);
    let len = bounds.end - bounds.start;
    let mut scratch = chunk_mask(len);
    {
        let mut view = BitmapChunkMut::new(&mut scratch, bounds.start, len);
        for predicate in predicates {
            predicate.evaluate_range(table, &mut view)?;
            if !view.any() {
                return Ok(acc);
            }
        }
        // Fold the aggregate column's validity in so extraction skips nulls
        if let Some(nulls) = nulls {
            let inner = nulls.inner();
            and_bit_chunks(
                view.blocks_mut(),
                inner.inner(),
                inner.offset() + bounds.start,
                len,
            );
        }
    }

    for (idx, word) in scratch.iter().enumerate() {
        let base = bounds.start + (idx << 6);
        if *word == u64::MAX {
            // Saturated mask: reduce the whole block of lanes
            for value in &values[base..base + 64] {
                acc.update(*value);
            }
        } else {
            let mut scan = *word;
            while scan != 0 {
                let row = base + scan.trailing_zeros() as usize;
                acc.update(values[row]);
                scan &= scan - 1;
            }
        }
    }
    Ok(acc)
}

/// COUNT(*) under predicates: popcount of the chunk masks, no value access
fn fused_count(
    table: &Table,
    predicates: &[Predicate],
    options: &EngineOptions,
) -> Result<u64> {
    let count_chunk = |k: usize| -> Result<u64> {
        if can_skip_chunk(table, predicates, k) {
            return Ok(0);
        }
        let bounds = table.chunk_bounds(k);
        let len = bounds.end - bounds.start;
        let mut scratch = chunk_mask(len);
        let mut view = BitmapChunkMut::new(&mut scratch, bounds.start, len);
        for predicate in predicates {
            predicate.evaluate_range(table, &mut view)?;
            if !view.any() {
                return Ok(0);
            }
        }
        Ok(view.count_set() as u64)
    };

    if options.use_parallel(table.num_rows()) {
        (0..table.num_chunks())
            .into_par_iter()
            .map(count_chunk)
            .try_reduce(|| 0, |a, b| Ok(a + b))
    } else {
        let mut total = 0;
        for k in 0..table.num_chunks() {
            total += count_chunk(k)?;
        }
        Ok(total)
    }
}

/// All-ones mask of `len` bits with the trailing bits cleared
fn chunk_mask(len: usize) -> Vec<u64> {
    let mut mask = vec![u64::MAX; len.div_ceil(64)];
    let tail = len & 63;
    if tail != 0 {
        if let Some(last) = mask.last_mut() {
            *last = (1u64 << tail) - 1;
        }
    }
    mask
}
