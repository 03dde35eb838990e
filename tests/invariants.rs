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

//! Universal invariants, fuzzed where the contract calls for it

mod common;

use std::sync::Arc;

use arrow::array::Int32Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use common::*;
use permafrost::bitmap::SelectionBitmap;
use permafrost::plan::optimizer::Optimizer;
use permafrost::plan::LogicalPlanBuilder;
use permafrost::predicate::{CompareOp, Predicate};
use permafrost::{EngineOptions, QueryOutput, ScalarValue, Table};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_bitmap(rng: &mut StdRng, len: usize) -> SelectionBitmap {
    let mut bitmap = SelectionBitmap::new(len, false);
    for row in 0..len {
        if rng.gen_bool(0.3) {
            bitmap.set(row);
        }
    }
    bitmap
}

fn random_nullable_table(rng: &mut StdRng, n: usize, chunk_size: usize) -> Table {
    let values: Vec<Option<i32>> = (0..n)
        .map(|_| rng.gen_bool(0.9).then(|| rng.gen_range(-1_000..1_000)))
        .collect();
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
    let batch =
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap();
    Table::try_new("t", batch, chunk_size).unwrap()
}

fn random_predicate(rng: &mut StdRng, table: &Table) -> Predicate {
    let column = table.column_ref("a").unwrap();
    let op = match rng.gen_range(0..6) {
        0 => CompareOp::Eq,
        1 => CompareOp::NotEq,
        2 => CompareOp::Lt,
        3 => CompareOp::LtEq,
        4 => CompareOp::Gt,
        _ => CompareOp::GtEq,
    };
    let value = rng.gen_range(-1_100..1_100);
    match rng.gen_range(0..4) {
        0 => Predicate::Or(
            Box::new(Predicate::Int32Cmp {
                column: column.clone(),
                op,
                value,
            }),
            Box::new(Predicate::Int32Cmp {
                column,
                op: CompareOp::Eq,
                value: rng.gen_range(-1_100..1_100),
            }),
        ),
        1 => Predicate::Not(Box::new(Predicate::Int32Cmp { column, op, value })),
        2 => Predicate::IsNull {
            column,
            negated: rng.gen_bool(0.5),
        },
        _ => Predicate::Int32Cmp { column, op, value },
    }
}

/// Invariant 1: count_set equals the number of indices the iterator yields
#[test]
fn count_matches_iteration() {
    let mut rng = StdRng::seed_from_u64(42);
    for len in [0usize, 1, 63, 64, 65, 1_000, 4_096] {
        for _ in 0..10 {
            let bitmap = random_bitmap(&mut rng, len);
            let iterated = bitmap.selected_indices().count();
            assert_eq!(bitmap.count_set(), iterated, "len = {len}");
        }
    }
}

/// Invariant 2: the range path and the row path agree on every row
#[test]
fn range_and_row_evaluation_agree() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..20 {
        let n = rng.gen_range(1..400);
        let table = random_nullable_table(&mut rng, n, 64);
        let predicate = random_predicate(&mut rng, &table);

        let mut bitmap = SelectionBitmap::new(n, true);
        {
            let mut views = bitmap.chunk_views_mut(64);
            for view in &mut views {
                predicate.evaluate_range(&table, view).unwrap();
            }
        }
        for row in 0..n {
            assert_eq!(
                bitmap.get(row),
                predicate.evaluate_row(&table, row).unwrap(),
                "row {row} of predicate {predicate}"
            );
        }
    }
}

/// Invariant 3: optimizing an optimized plan changes nothing
#[test]
fn optimizer_idempotence() {
    let mut rng = StdRng::seed_from_u64(3);
    let table = random_nullable_table(&mut rng, 1_000, 64);
    let optimizer = Optimizer::new();
    for _ in 0..10 {
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(random_predicate(&mut rng, &table))
            .filter(random_predicate(&mut rng, &table))
            .project(["a"])
            .offset(rng.gen_range(0..5))
            .limit(rng.gen_range(1..100))
            .build();
        let once = optimizer.optimize(plan, &table).unwrap();
        let twice = optimizer.optimize(once.clone(), &table).unwrap();
        assert_eq!(once, twice);
    }
}

/// Invariant 4: parallel and sequential execution agree (exactly for
/// integers, within 1e-12 relative error for float sums)
#[test]
fn parallel_equals_sequential() {
    let sequential = sequential_engine();
    let parallel = parallel_engine();
    let batch = wide_batch(200_000);
    let seq_table = wrap(&sequential, "t", batch.clone());
    let par_table = wrap(&parallel, "t", batch);

    // integer materialization, bit-exact
    let seq = sequential
        .sql(&seq_table, "SELECT COUNT(*) FROM t WHERE ColA >= 100000")
        .unwrap();
    let par = parallel
        .sql(&par_table, "SELECT COUNT(*) FROM t WHERE ColA >= 100000")
        .unwrap();
    match (seq, par) {
        (QueryOutput::Scalar(a), QueryOutput::Scalar(b)) => assert_eq!(a, b),
        other => panic!("expected scalars, got {other:?}"),
    }

    // float sum, tolerance-bounded
    let seq = sequential
        .sql(&seq_table, "SELECT SUM(ColB) FROM t WHERE ColA < 150000")
        .unwrap();
    let par = parallel
        .sql(&par_table, "SELECT SUM(ColB) FROM t WHERE ColA < 150000")
        .unwrap();
    match (seq, par) {
        (
            QueryOutput::Scalar(ScalarValue::Float64(Some(a))),
            QueryOutput::Scalar(ScalarValue::Float64(Some(b))),
        ) => {
            let relative = ((a - b) / a).abs();
            assert!(relative <= 1e-12, "relative error {relative}");
        }
        other => panic!("expected float scalars, got {other:?}"),
    }
}

/// Invariant 5: the sparse collector's output is strictly ascending and a
/// subset of the bitmap enumeration
#[test]
fn sparse_is_sorted_subset_of_bitmap() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", ramp_batch(100_000));
    // ~0.1% selectivity routes through the sparse collector
    let sparse_plan = LogicalPlanBuilder::scan(&table)
        .filter(Predicate::Int32Cmp {
            column: table.column_ref("ColA").unwrap(),
            op: CompareOp::GtEq,
            value: 99_900,
        })
        .build();
    let sparse_rows = engine
        .collect_rows(&table, &sparse_plan, |_, row| row as u32)
        .unwrap();
    assert!(sparse_rows.windows(2).all(|w| w[0] < w[1]));

    // Brute force over the same predicate
    let expected: Vec<u32> = (99_900..100_000).collect();
    assert_eq!(sparse_rows, expected);
}

/// Invariant 6: chunk skipping never hides a matching row
#[test]
fn zone_map_skip_is_safe() {
    let mut rng = StdRng::seed_from_u64(11);
    let engine = common::engine_with(
        EngineOptions::new()
            .with_parallel_execution(false)
            .with_chunk_size(64),
    );
    for _ in 0..10 {
        let table = random_nullable_table(&mut rng, 500, 64);
        let predicate = random_predicate(&mut rng, &table);
        let plan = LogicalPlanBuilder::scan(&table)
            .filter(predicate.clone())
            .build();
        let rows = engine
            .collect_rows(&table, &plan, |_, row| row)
            .unwrap();
        let expected: Vec<usize> = (0..table.num_rows())
            .filter(|row| predicate.evaluate_row(&table, *row).unwrap())
            .collect();
        assert_eq!(rows, expected, "predicate {predicate}");
    }
}

/// Invariant 7: the fused path and the bitmap path produce the same result
/// for every fused-eligible query
#[test]
fn fused_equals_bitmap() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(50_000));

    // Fused-eligible: single aggregate, one predicate, large table
    let fused = engine
        .sql(&table, "SELECT SUM(ColA) FROM t WHERE ColA < 12345")
        .unwrap();
    // Brute force
    let expected: i64 = (0..12_345i64).sum();
    match fused {
        QueryOutput::Scalar(value) => assert_eq!(value, ScalarValue::Int64(Some(expected))),
        other => panic!("expected scalar, got {other:?}"),
    }

    // The same aggregate forced through the bitmap path by pagination
    let bitmap = engine
        .sql(&table, "SELECT SUM(ColA) FROM t WHERE ColA < 12345 LIMIT 100000")
        .unwrap();
    match bitmap {
        QueryOutput::Scalar(value) => assert_eq!(value, ScalarValue::Int64(Some(expected))),
        other => panic!("expected scalar, got {other:?}"),
    }
}

/// Invariant 8: a cache hit returns a plan structurally equal to the
/// freshly compiled one
#[test]
fn cache_hit_equals_fresh_plan() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", ramp_batch(10_000));
    let plan = LogicalPlanBuilder::scan(&table)
        .filter(Predicate::Int32Cmp {
            column: table.column_ref("ColA").unwrap(),
            op: CompareOp::Gt,
            value: 9_000,
        })
        .build();
    let fresh = engine.compile(&table, &plan).unwrap();
    let cached = engine.compile(&table, &plan).unwrap();
    assert_eq!(*fresh, *cached);
    assert_eq!(engine.cache_stats().hits, 1);
}
