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

//! Selection-driven aggregation
//!
//! Runs an aggregate against an existing selection bitmap. The column's
//! validity bitmap is bulk-ANDed into the selection up front, eliminating
//! the per-row null check; the selection is then walked block-wise,
//! enumerating set bits with trailing-zero count.

use crate::aggregate::{AggValue, AggregateDescriptor, ChunkAccumulator, NumericAccumulator};
use crate::bitmap::SelectionBitmap;
use crate::error::Result;
use crate::scalar::ScalarValue;
use crate::table::{ColumnData, Table};

/// Aggregate over the rows selected in `selection`.
///
/// The selection is consumed by this stage: folding the column's validity
/// into it is the point of the bulk AND, so callers needing the original
/// mask afterwards must clone it first.
pub(crate) fn aggregate_selection(
    table: &Table,
    selection: &mut SelectionBitmap,
    descriptor: &AggregateDescriptor,
) -> Result<ScalarValue> {
    let accumulator = match &descriptor.column {
        None => NumericAccumulator::CountOnly(selection.count_set() as u64),
        Some(column) => {
            let data = table.column_data(column.index)?;
            if let Some(nulls) = data.nulls() {
                if nulls.null_count() > 0 {
                    selection.and_with_null_bitmap(nulls)?;
                }
            }
            match data {
                ColumnData::Int32 { values, .. } => {
                    NumericAccumulator::Int32(accumulate::<i32>(values, selection))
                }
                ColumnData::Int64 { values, .. } => {
                    NumericAccumulator::Int64(accumulate::<i64>(values, selection))
                }
                ColumnData::Float32 { values, .. } => {
                    NumericAccumulator::Float32(accumulate::<f32>(values, selection))
                }
                ColumnData::Float64 { values, .. } => {
                    NumericAccumulator::Float64(accumulate::<f64>(values, selection))
                }
                ColumnData::Decimal128 { values, .. } => {
                    NumericAccumulator::Decimal128(accumulate::<i128>(values, selection))
                }
                _ => {
                    return invalid_argument_err!(
                        "{} is not defined over column '{}'",
                        descriptor.op,
                        column.name
                    )
                }
            }
        }
    };
    accumulator.finalize(descriptor)
}

fn accumulate<T: AggValue>(values: &[T], selection: &SelectionBitmap) -> ChunkAccumulator<T> {
    let mut acc = ChunkAccumulator::default();
    for (idx, block) in selection.blocks().iter().enumerate() {
        let base = idx << 6;
        let mut scan = *block;
        while scan != 0 {
            let row = base + scan.trailing_zeros() as usize;
            acc.update(values[row]);
            scan &= scan - 1;
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateOp;
    use crate::error::Error;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn nullable_table() -> Table {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(vec![
                Some(1),
                Some(2),
                Some(3),
                None,
                Some(5),
                None,
                Some(7),
                Some(8),
            ]))],
        )
        .unwrap();
        Table::try_new("t", batch, 64).unwrap()
    }

    #[test]
    fn avg_skips_nulls_via_bulk_and() {
        let table = nullable_table();
        let mut selection = SelectionBitmap::new(8, true);
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Avg, Some("a")).unwrap();
        let result = aggregate_selection(&table, &mut selection, &descriptor).unwrap();
        // (1 + 2 + 3 + 5 + 7 + 8) / 6
        assert_eq!(result, ScalarValue::Float64(Some(26.0 / 6.0)));
    }

    #[test]
    fn count_star_ignores_column_nulls() {
        let table = nullable_table();
        let mut selection = SelectionBitmap::new(8, true);
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Count, None).unwrap();
        let result = aggregate_selection(&table, &mut selection, &descriptor).unwrap();
        assert_eq!(result, ScalarValue::Int32(Some(8)));

        // COUNT(a) counts only non-null rows
        let mut selection = SelectionBitmap::new(8, true);
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Count, Some("a")).unwrap();
        let result = aggregate_selection(&table, &mut selection, &descriptor).unwrap();
        assert_eq!(result, ScalarValue::Int32(Some(6)));
    }

    #[test]
    fn partial_selection() {
        let table = nullable_table();
        let mut selection = SelectionBitmap::new(8, false);
        for row in [0, 2, 4, 6] {
            selection.set(row);
        }
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Sum, Some("a")).unwrap();
        let result = aggregate_selection(&table, &mut selection, &descriptor).unwrap();
        // 1 + 3 + 5 + 7
        assert_eq!(result, ScalarValue::Int64(Some(16)));
    }

    #[test]
    fn min_on_empty_selection_fails() {
        let table = nullable_table();
        let mut selection = SelectionBitmap::new(8, false);
        let descriptor =
            AggregateDescriptor::try_new(&table, AggregateOp::Min, Some("a")).unwrap();
        let result = aggregate_selection(&table, &mut selection, &descriptor);
        assert!(matches!(result, Err(Error::EmptySequence("MIN"))));
    }
}
