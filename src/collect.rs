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

//! Streaming terminals and the sparse index collector
//!
//! Streaming serves `any`/`all`/`first`/`take n`: chunks are visited in
//! order, skipped via the zone maps where possible, and rows are evaluated
//! through the scalar predicate path with the predicate list short-circuited
//! on the first failure (most selective first after reordering).
//!
//! The sparse collector serves low-selectivity materialization: instead of a
//! bitmap it produces the sorted ascending list of matching row indices
//! directly, optionally in parallel with per-worker local vectors.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::error::Result;
use crate::predicate::Predicate;
use crate::table::Table;

/// Whether chunk `k` provably contains no matching row
pub(crate) fn can_skip_chunk(table: &Table, predicates: &[Predicate], k: usize) -> bool {
    predicates
        .iter()
        .any(|predicate| !predicate.may_contain_matches(table, k))
}

/// AND-composed scalar evaluation, short-circuiting on the first failing
/// predicate
pub(crate) fn row_matches(
    table: &Table,
    predicates: &[Predicate],
    row: usize,
) -> Result<bool> {
    for predicate in predicates {
        if !predicate.evaluate_row(table, row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether any row matches; returns on the first hit
pub(crate) fn stream_any(table: &Table, predicates: &[Predicate]) -> Result<bool> {
    for k in 0..table.num_chunks() {
        if can_skip_chunk(table, predicates, k) {
            continue;
        }
        for row in table.chunk_bounds(k) {
            if row_matches(table, predicates, row)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Whether every row matches; returns on the first miss.
/// Vacuously true for an empty table.
pub(crate) fn stream_all(table: &Table, predicates: &[Predicate]) -> Result<bool> {
    for k in 0..table.num_chunks() {
        if can_skip_chunk(table, predicates, k) {
            // The chunk has rows and provably no matches
            return Ok(false);
        }
        for row in table.chunk_bounds(k) {
            if !row_matches(table, predicates, row)? {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Index of the match with rank `skip`, scanning in row order
pub(crate) fn stream_first(
    table: &Table,
    predicates: &[Predicate],
    skip: usize,
) -> Result<Option<usize>> {
    let mut seen = 0usize;
    for k in 0..table.num_chunks() {
        if can_skip_chunk(table, predicates, k) {
            continue;
        }
        for row in table.chunk_bounds(k) {
            if row_matches(table, predicates, row)? {
                if seen == skip {
                    return Ok(Some(row));
                }
                seen += 1;
            }
        }
    }
    Ok(None)
}

/// The first `take` matching rows after skipping `skip` matches
pub(crate) fn stream_take(
    table: &Table,
    predicates: &[Predicate],
    skip: usize,
    take: usize,
) -> Result<Vec<u32>> {
    let mut out = Vec::with_capacity(take.min(1024));
    if take == 0 {
        return Ok(out);
    }
    let mut seen = 0usize;
    for k in 0..table.num_chunks() {
        if can_skip_chunk(table, predicates, k) {
            continue;
        }
        for row in table.chunk_bounds(k) {
            if row_matches(table, predicates, row)? {
                if seen >= skip {
                    out.push(row as u32);
                    if out.len() == take {
                        return Ok(out);
                    }
                }
                seen += 1;
            }
        }
    }
    Ok(out)
}

/// Collect matching row indices directly, without a bitmap.
///
/// In parallel mode each worker fills a local vector; the merge concatenates
/// in chunk order, so the result stays sorted ascending. An optional
/// `max_collect` cap is enforced through an atomic counter with a
/// cooperative stop flag; a worker may overshoot by at most its current
/// chunk and the merge trims the excess.
pub(crate) fn sparse_collect(
    table: &Table,
    predicates: &[Predicate],
    max_collect: Option<usize>,
    parallel: bool,
) -> Result<Vec<u32>> {
    if max_collect == Some(0) {
        return Ok(vec![]);
    }
    if !parallel {
        return sparse_collect_sequential(table, predicates, max_collect);
    }

    let collected = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let per_chunk: Vec<Vec<u32>> = (0..table.num_chunks())
        .into_par_iter()
        .map(|k| -> Result<Vec<u32>> {
            if stop.load(Ordering::Relaxed) || can_skip_chunk(table, predicates, k) {
                return Ok(vec![]);
            }
            let mut local = Vec::new();
            for row in table.chunk_bounds(k) {
                if row_matches(table, predicates, row)? {
                    local.push(row as u32);
                    if let Some(max) = max_collect {
                        if collected.fetch_add(1, Ordering::Relaxed) + 1 >= max {
                            stop.store(true, Ordering::Relaxed);
                        }
                    }
                }
            }
            Ok(local)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out: Vec<u32> = per_chunk.into_iter().flatten().collect();
    // Chunk order already implies ascending rows, but the contract is a
    // sorted list; keep it explicit and cheap on sorted input
    out.sort_unstable();
    if let Some(max) = max_collect {
        out.truncate(max);
    }
    Ok(out)
}

fn sparse_collect_sequential(
    table: &Table,
    predicates: &[Predicate],
    max_collect: Option<usize>,
) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for k in 0..table.num_chunks() {
        if can_skip_chunk(table, predicates, k) {
            continue;
        }
        for row in table.chunk_bounds(k) {
            if row_matches(table, predicates, row)? {
                out.push(row as u32);
                if max_collect.is_some_and(|max| out.len() >= max) {
                    return Ok(out);
                }
            }
        }
    }
    Ok(out)
}
