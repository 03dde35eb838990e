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

//! SQL dialect coverage

mod common;

use arrow::array::AsArray;
use arrow::datatypes::Int32Type;
use common::*;
use permafrost::{Error, QueryOutput, ScalarValue};

fn batch_rows(output: QueryOutput) -> usize {
    match output {
        QueryOutput::Batch(batch) => batch.num_rows(),
        other => panic!("expected batch, got {other:?}"),
    }
}

fn scalar(output: QueryOutput) -> ScalarValue {
    match output {
        QueryOutput::Scalar(value) => value,
        other => panic!("expected scalar, got {other:?}"),
    }
}

#[test]
fn comparison_operators() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", ramp_batch(100));
    let cases = [
        ("SELECT COUNT(*) FROM t WHERE ColA = 5", 1),
        ("SELECT COUNT(*) FROM t WHERE ColA != 5", 99),
        ("SELECT COUNT(*) FROM t WHERE ColA <> 5", 99),
        ("SELECT COUNT(*) FROM t WHERE ColA < 5", 5),
        ("SELECT COUNT(*) FROM t WHERE ColA <= 5", 6),
        ("SELECT COUNT(*) FROM t WHERE ColA > 95", 4),
        ("SELECT COUNT(*) FROM t WHERE ColA >= 95", 5),
    ];
    for (sql, expected) in cases {
        let value = scalar(engine.sql(&table, sql).unwrap());
        assert_eq!(value, ScalarValue::Int32(Some(expected)), "{sql}");
    }
}

#[test]
fn logical_connectives_and_parentheses() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", ramp_batch(100));
    let cases = [
        ("SELECT COUNT(*) FROM t WHERE ColA > 10 AND ColA < 20", 9),
        ("SELECT COUNT(*) FROM t WHERE ColA < 10 OR ColA > 89", 20),
        ("SELECT COUNT(*) FROM t WHERE NOT ColA < 90", 10),
        (
            "SELECT COUNT(*) FROM t WHERE (ColA < 10 OR ColA > 89) AND ColA != 0",
            19,
        ),
    ];
    for (sql, expected) in cases {
        let value = scalar(engine.sql(&table, sql).unwrap());
        assert_eq!(value, ScalarValue::Int32(Some(expected)), "{sql}");
    }
}

#[test]
fn projection_and_star() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(50));

    match engine.sql(&table, "SELECT ColA, ColB FROM t LIMIT 3").unwrap() {
        QueryOutput::Batch(batch) => {
            assert_eq!(batch.num_columns(), 2);
            assert_eq!(batch.num_rows(), 3);
            assert_eq!(batch.schema().field(0).name(), "ColA");
        }
        other => panic!("expected batch, got {other:?}"),
    }

    assert_eq!(batch_rows(engine.sql(&table, "SELECT * FROM t").unwrap()), 50);
}

#[test]
fn aggregate_functions() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(100));
    assert_eq!(
        scalar(engine.sql(&table, "SELECT COUNT(ColA) FROM t").unwrap()),
        ScalarValue::Int32(Some(100))
    );
    assert_eq!(
        scalar(engine.sql(&table, "SELECT SUM(ColA) FROM t").unwrap()),
        ScalarValue::Int64(Some(4_950))
    );
    assert_eq!(
        scalar(engine.sql(&table, "SELECT MIN(ColA) FROM t").unwrap()),
        ScalarValue::Int32(Some(0))
    );
    assert_eq!(
        scalar(engine.sql(&table, "SELECT MAX(ColA) FROM t").unwrap()),
        ScalarValue::Int32(Some(99))
    );
    match scalar(engine.sql(&table, "SELECT AVG(ColB) FROM t").unwrap()) {
        ScalarValue::Float64(Some(avg)) => {
            assert!((avg - 24.75).abs() < 1e-12);
        }
        other => panic!("expected float, got {other:?}"),
    }
}

#[test]
fn group_by_with_multiple_aggregates() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(100));
    match engine
        .sql(
            &table,
            "SELECT ColC, COUNT(*), SUM(ColA), MAX(ColA) FROM t GROUP BY ColC",
        )
        .unwrap()
    {
        QueryOutput::Groups(groups) => {
            assert_eq!(groups.len(), 5);
            // First group is "alpha" (rows 0, 5, 10, ...)
            assert_eq!(groups[0].key, ScalarValue::Utf8(Some("alpha".to_string())));
            assert_eq!(groups[0].values[0].1, ScalarValue::Int32(Some(20)));
            let alpha_sum: i64 = (0..100).filter(|i| i % 5 == 0).sum();
            assert_eq!(groups[0].values[1].1, ScalarValue::Int64(Some(alpha_sum)));
            assert_eq!(groups[0].values[2].1, ScalarValue::Int32(Some(95)));
        }
        other => panic!("expected groups, got {other:?}"),
    }
}

#[test]
fn group_by_respects_where() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(100));
    match engine
        .sql(
            &table,
            "SELECT ColC, COUNT(*) FROM t WHERE ColA < 10 GROUP BY ColC",
        )
        .unwrap()
    {
        QueryOutput::Groups(groups) => {
            assert_eq!(groups.len(), 5);
            for group in &groups {
                assert_eq!(group.values[0].1, ScalarValue::Int32(Some(2)));
            }
        }
        other => panic!("expected groups, got {other:?}"),
    }
}

#[test]
fn limit_offset_pagination() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", ramp_batch(100));
    match engine
        .sql(&table, "SELECT * FROM t WHERE ColA >= 10 LIMIT 5 OFFSET 3")
        .unwrap()
    {
        QueryOutput::Batch(batch) => {
            let values = batch.column(0).as_primitive::<Int32Type>();
            assert_eq!(values.values().to_vec(), vec![13, 14, 15, 16, 17]);
        }
        other => panic!("expected batch, got {other:?}"),
    }
}

#[test]
fn string_operators_end_to_end() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(10));
    let cases = [
        ("SELECT COUNT(*) FROM t WHERE ColC = 'beta'", 2),
        ("SELECT COUNT(*) FROM t WHERE ColC != 'beta'", 8),
        ("SELECT COUNT(*) FROM t WHERE ColC LIKE 'al%'", 2),
        ("SELECT COUNT(*) FROM t WHERE ColC LIKE '%ta'", 4),
        ("SELECT COUNT(*) FROM t WHERE ColC LIKE '%amm%'", 2),
    ];
    for (sql, expected) in cases {
        let value = scalar(engine.sql(&table, sql).unwrap());
        assert_eq!(value, ScalarValue::Int32(Some(expected)), "{sql}");
    }
}

#[test]
fn error_cases() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", wide_batch(10));

    // not a SELECT
    assert!(matches!(
        engine.sql(&table, "DELETE FROM t").unwrap_err(),
        Error::Unsupported(_)
    ));
    // unknown table
    assert!(matches!(
        engine.sql(&table, "SELECT * FROM nope").unwrap_err(),
        Error::InvalidArgument(_)
    ));
    // unknown column
    assert!(matches!(
        engine.sql(&table, "SELECT * FROM t WHERE ghost = 1").unwrap_err(),
        Error::InvalidArgument(_)
    ));
    // operator/type mismatch
    assert!(engine.sql(&table, "SELECT * FROM t WHERE ColA = 'x'").is_err());
    // aggregates mixed with plain columns outside GROUP BY
    assert!(matches!(
        engine.sql(&table, "SELECT ColA, COUNT(*) FROM t").unwrap_err(),
        Error::Unsupported(_)
    ));
    // multiple aggregates without GROUP BY
    assert!(matches!(
        engine.sql(&table, "SELECT SUM(ColA), COUNT(*) FROM t").unwrap_err(),
        Error::Unsupported(_)
    ));
    // pagination combined with grouping
    assert!(matches!(
        engine
            .sql(&table, "SELECT ColC, COUNT(*) FROM t GROUP BY ColC LIMIT 2")
            .unwrap_err(),
        Error::Unsupported(_)
    ));
}

#[test]
fn case_insensitive_keywords() {
    let engine = sequential_engine();
    let table = wrap(&engine, "t", ramp_batch(10));
    let value = scalar(
        engine
            .sql(&table, "select count(*) from t where ColA >= 5")
            .unwrap(),
    );
    assert_eq!(value, ScalarValue::Int32(Some(5)));
}
