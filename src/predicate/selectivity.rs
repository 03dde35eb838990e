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

//! Zone-map chunk skipping and selectivity estimation
//!
//! The skip test is conservative: it may answer `true` for a chunk with no
//! matches, but must never answer `false` for a chunk containing one.
//! Selectivity estimates steer predicate ordering and strategy choice only;
//! they carry no correctness weight.

use arrow::array::Array;

use crate::predicate::{CompareOp, Predicate, StrOp};
use crate::table::Table;
use crate::zone::{ChunkStats, ZoneMap};

/// Fallback estimate for equality predicates without a distinct-count source
const EQUALITY_SELECTIVITY: f64 = 0.1;
/// Estimate for IS NULL predicates
const IS_NULL_SELECTIVITY: f64 = 0.05;
/// Estimate when nothing is known
const UNKNOWN_SELECTIVITY: f64 = 0.5;

impl Predicate {
    /// Conservative test: can chunk `k` contain a row satisfying this
    /// predicate?
    pub fn may_contain_matches(&self, table: &Table, k: usize) -> bool {
        match self {
            Predicate::Int32Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Int32(map)) => zone_admits(map.chunk(k), *op, *value),
                    _ => true,
                }
            }
            Predicate::Int64Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Int64(map)) => zone_admits(map.chunk(k), *op, *value),
                    _ => true,
                }
            }
            Predicate::Float32Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    // NaN rows satisfy NotEq but are excluded from the
                    // extrema, so NotEq cannot be skipped for floats
                    Some(ZoneMap::Float32(map)) if *op != CompareOp::NotEq => {
                        zone_admits(map.chunk(k), *op, *value)
                    }
                    _ => true,
                }
            }
            Predicate::Float64Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Float64(map)) if *op != CompareOp::NotEq => {
                        zone_admits(map.chunk(k), *op, *value)
                    }
                    _ => true,
                }
            }
            Predicate::DecimalCmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Decimal128(map)) => {
                        zone_admits(map.chunk(k), *op, *value)
                    }
                    _ => true,
                }
            }
            Predicate::IsNull { column, negated } => {
                let null_count = table.batch().column(column.index).null_count();
                if *negated {
                    // IS NOT NULL: an all-null chunk cannot match
                    !table
                        .zone_map(column.index)
                        .is_some_and(|map| map.all_null(k))
                } else {
                    // IS NULL: a column without nulls cannot match anywhere
                    null_count > 0
                }
            }
            Predicate::And(lhs, rhs) => {
                lhs.may_contain_matches(table, k) && rhs.may_contain_matches(table, k)
            }
            Predicate::Or(lhs, rhs) => {
                lhs.may_contain_matches(table, k) || rhs.may_contain_matches(table, k)
            }
            // No summary admits a conclusion for these
            Predicate::Bool { .. } | Predicate::Utf8Cmp { .. } | Predicate::Not(_) => {
                true
            }
        }
    }

    /// Estimated fraction of rows satisfying this predicate, in `[0, 1]`
    pub fn estimated_selectivity(&self, table: &Table) -> f64 {
        match self {
            Predicate::Int32Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Int32(map)) => range_selectivity(
                        map.global().map(|(lo, hi)| (f64::from(lo), f64::from(hi))),
                        *op,
                        f64::from(*value),
                    ),
                    _ => cmp_fallback(*op),
                }
            }
            Predicate::Int64Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Int64(map)) => range_selectivity(
                        map.global().map(|(lo, hi)| (lo as f64, hi as f64)),
                        *op,
                        *value as f64,
                    ),
                    _ => cmp_fallback(*op),
                }
            }
            Predicate::Float32Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Float32(map)) => range_selectivity(
                        map.global().map(|(lo, hi)| (f64::from(lo), f64::from(hi))),
                        *op,
                        f64::from(*value),
                    ),
                    _ => cmp_fallback(*op),
                }
            }
            Predicate::Float64Cmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Float64(map)) => {
                        range_selectivity(map.global(), *op, *value)
                    }
                    _ => cmp_fallback(*op),
                }
            }
            Predicate::DecimalCmp { column, op, value } => {
                match table.zone_map(column.index) {
                    Some(ZoneMap::Decimal128(map)) => range_selectivity(
                        map.global().map(|(lo, hi)| (lo as f64, hi as f64)),
                        *op,
                        *value as f64,
                    ),
                    _ => cmp_fallback(*op),
                }
            }
            Predicate::Bool { .. } => 0.5,
            Predicate::IsNull { negated, .. } => {
                if *negated {
                    1.0 - IS_NULL_SELECTIVITY
                } else {
                    IS_NULL_SELECTIVITY
                }
            }
            Predicate::Utf8Cmp { op, .. } => match op {
                StrOp::Eq => EQUALITY_SELECTIVITY,
                StrOp::NotEq => 1.0 - EQUALITY_SELECTIVITY,
                _ => UNKNOWN_SELECTIVITY,
            },
            Predicate::And(lhs, rhs) => {
                lhs.estimated_selectivity(table) * rhs.estimated_selectivity(table)
            }
            Predicate::Or(lhs, rhs) => {
                let (l, r) = (
                    lhs.estimated_selectivity(table),
                    rhs.estimated_selectivity(table),
                );
                l + r - l * r
            }
            Predicate::Not(inner) => 1.0 - inner.estimated_selectivity(table),
        }
    }
}

fn zone_admits<T: Copy + PartialOrd>(stats: &ChunkStats<T>, op: CompareOp, value: T) -> bool {
    if stats.all_null {
        return false;
    }
    match op {
        CompareOp::Eq => stats.min <= value && value <= stats.max,
        CompareOp::NotEq => !(stats.min == value && stats.max == value),
        CompareOp::Lt => stats.min < value,
        CompareOp::LtEq => stats.min <= value,
        CompareOp::Gt => stats.max > value,
        CompareOp::GtEq => stats.max >= value,
    }
}

fn cmp_fallback(op: CompareOp) -> f64 {
    match op {
        CompareOp::Eq => EQUALITY_SELECTIVITY,
        CompareOp::NotEq => 1.0 - EQUALITY_SELECTIVITY,
        _ => UNKNOWN_SELECTIVITY,
    }
}

fn range_selectivity(global: Option<(f64, f64)>, op: CompareOp, value: f64) -> f64 {
    let Some((min, max)) = global else {
        // Every chunk is all-null
        return 0.0;
    };
    if max <= min {
        // Constant column: the answer is exact
        let admits = match op {
            CompareOp::Eq => min == value,
            CompareOp::NotEq => min != value,
            CompareOp::Lt => min < value,
            CompareOp::LtEq => min <= value,
            CompareOp::Gt => min > value,
            CompareOp::GtEq => min >= value,
        };
        return if admits { 1.0 } else { 0.0 };
    }
    let width = max - min;
    let fraction = match op {
        CompareOp::Eq => EQUALITY_SELECTIVITY,
        CompareOp::NotEq => 1.0 - EQUALITY_SELECTIVITY,
        CompareOp::Lt | CompareOp::LtEq => (value - min) / width,
        CompareOp::Gt | CompareOp::GtEq => (max - value) / width,
    };
    fraction.clamp(0.0, 1.0)
}

/// Stable sort of predicates ascending by estimated selectivity.
/// Equal estimates keep their original position.
pub fn reorder_by_selectivity(predicates: &mut [Predicate], table: &Table) {
    let mut keyed: Vec<(f64, Predicate)> = predicates
        .iter()
        .map(|p| (p.estimated_selectivity(table), p.clone()))
        .collect();
    keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    for (slot, (_, predicate)) in predicates.iter_mut().zip(keyed) {
        *slot = predicate;
    }
}
