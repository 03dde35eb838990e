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

//! Hash aggregation over a grouping key
//!
//! Selected rows are walked in order; each row's key indexes a hash table
//! mapping to a dense slot of per-aggregate accumulators, so output groups
//! appear in first-occurrence order. Null keys form their own group.

use ahash::RandomState;
use arrow::datatypes::DataType;
use hashbrown::HashMap;

use crate::aggregate::{AggregateDescriptor, NumericAccumulator};
use crate::bitmap::SelectionBitmap;
use crate::error::{Error, Result};
use crate::scalar::ScalarValue;
use crate::table::{ColumnData, ColumnRef, Table};

/// A grouped aggregation: key column, output name for the key, and the
/// aggregates computed per group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByDescriptor {
    /// Grouping key column
    pub key: ColumnRef,
    /// Name the key is reported under
    pub key_name: String,
    /// Aggregates computed for each group
    pub aggregates: Vec<AggregateDescriptor>,
}

impl GroupByDescriptor {
    /// Build a descriptor, validating that the key column type can act as a
    /// grouping key (integers, dates, timestamps, booleans and strings)
    pub fn try_new(
        table: &Table,
        key_column: &str,
        aggregates: Vec<AggregateDescriptor>,
    ) -> Result<Self> {
        let key = table.column_ref(key_column)?;
        match table.data_type(key.index) {
            DataType::Int32
            | DataType::Int64
            | DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
            | DataType::Boolean
            | DataType::Utf8
            | DataType::Dictionary(_, _) => {}
            other => {
                return invalid_argument_err!(
                    "column '{key_column}' of type {other} cannot be a grouping key"
                )
            }
        }
        Ok(Self {
            key_name: key.name.to_string(),
            key,
            aggregates,
        })
    }
}

impl std::fmt::Display for GroupByDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "groupBy=[{}], aggr=[[", self.key)?;
        for (i, aggregate) in self.aggregates.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{aggregate}")?;
        }
        write!(f, "]]")
    }
}

/// One output group: the key value and the named aggregate results
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Key value of this group; `ScalarValue::Null` for the null group
    pub key: ScalarValue,
    /// `(result_name, value)` per aggregate, in descriptor order
    pub values: Vec<(String, ScalarValue)>,
}

/// Hashable form of a grouping key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Utf8(String),
}

impl GroupKey {
    fn from_row(data: &ColumnData<'_>, row: usize) -> Result<Self> {
        Ok(match data {
            ColumnData::Int32 { values, nulls } => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    GroupKey::Int32(values[row])
                } else {
                    GroupKey::Null
                }
            }
            ColumnData::Int64 { values, nulls } => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    GroupKey::Int64(values[row])
                } else {
                    GroupKey::Null
                }
            }
            ColumnData::Boolean { values, nulls } => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    GroupKey::Boolean(values.value(row))
                } else {
                    GroupKey::Null
                }
            }
            ColumnData::Utf8(_) | ColumnData::DictUtf8 { .. } => {
                match data.str_value(row) {
                    Some(value) => GroupKey::Utf8(value.to_string()),
                    None => GroupKey::Null,
                }
            }
            _ => return internal_err!("unsupported grouping key column"),
        })
    }

    /// Convert back to a scalar in the key column's logical type
    fn into_scalar(self, key_type: &DataType) -> ScalarValue {
        match self {
            GroupKey::Null => ScalarValue::Null,
            GroupKey::Boolean(value) => ScalarValue::Boolean(Some(value)),
            GroupKey::Int32(value) => match key_type {
                DataType::Date32 => ScalarValue::Date32(Some(value)),
                _ => ScalarValue::Int32(Some(value)),
            },
            GroupKey::Int64(value) => match key_type {
                DataType::Date64 => ScalarValue::Date64(Some(value)),
                DataType::Timestamp(unit, _) => {
                    ScalarValue::Timestamp(Some(value), unit.clone())
                }
                _ => ScalarValue::Int64(Some(value)),
            },
            GroupKey::Utf8(value) => ScalarValue::Utf8(Some(value)),
        }
    }
}

/// Aggregate the selected rows per group, in first-occurrence order
pub(crate) fn group_aggregate(
    table: &Table,
    selection: &SelectionBitmap,
    descriptor: &GroupByDescriptor,
) -> Result<Vec<GroupRow>> {
    let key_data = table.column_data(descriptor.key.index)?;
    let key_type = table.data_type(descriptor.key.index).clone();
    let inputs: Vec<Option<ColumnData<'_>>> = descriptor
        .aggregates
        .iter()
        .map(|aggregate| {
            aggregate
                .column
                .as_ref()
                .map(|column| table.column_data(column.index))
                .transpose()
        })
        .collect::<Result<_>>()?;

    let mut slots: HashMap<GroupKey, usize, RandomState> =
        HashMap::with_hasher(RandomState::new());
    let mut groups: Vec<(GroupKey, Vec<NumericAccumulator>)> = Vec::new();

    for row in selection.selected_indices() {
        let key = GroupKey::from_row(&key_data, row)?;
        let slot = match slots.get(&key) {
            Some(slot) => *slot,
            None => {
                let accumulators = descriptor
                    .aggregates
                    .iter()
                    .map(|aggregate| NumericAccumulator::for_descriptor(table, aggregate))
                    .collect::<Result<Vec<_>>>()?;
                let slot = groups.len();
                groups.push((key.clone(), accumulators));
                slots.insert(key, slot);
                slot
            }
        };
        let (_, accumulators) = &mut groups[slot];
        for (accumulator, input) in accumulators.iter_mut().zip(&inputs) {
            accumulator.update_row(input.as_ref(), row)?;
        }
    }

    groups
        .into_iter()
        .map(|(key, accumulators)| {
            let values = descriptor
                .aggregates
                .iter()
                .zip(accumulators)
                .map(|(aggregate, accumulator)| {
                    let value = match accumulator.finalize(aggregate) {
                        Ok(value) => value,
                        // A group whose aggregate column is entirely null
                        // reports a typed null rather than failing the query
                        Err(Error::EmptySequence(_)) => null_of(&aggregate.out_type),
                        Err(error) => return Err(error),
                    };
                    Ok((aggregate.result_name.clone(), value))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(GroupRow {
                key: key.into_scalar(&key_type),
                values,
            })
        })
        .collect()
}

fn null_of(data_type: &DataType) -> ScalarValue {
    match data_type {
        DataType::Int32 => ScalarValue::Int32(None),
        DataType::Int64 => ScalarValue::Int64(None),
        DataType::Float32 => ScalarValue::Float32(None),
        DataType::Float64 => ScalarValue::Float64(None),
        DataType::Decimal128(precision, scale) => {
            ScalarValue::Decimal128(None, *precision, *scale)
        }
        DataType::Date32 => ScalarValue::Date32(None),
        DataType::Date64 => ScalarValue::Date64(None),
        DataType::Timestamp(unit, _) => ScalarValue::Timestamp(None, unit.clone()),
        _ => ScalarValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateOp;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn sales_table() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("region", DataType::Utf8, true),
            Field::new("amount", DataType::Int32, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![
                    Some("east"),
                    Some("west"),
                    Some("east"),
                    None,
                    Some("west"),
                    Some("east"),
                ])),
                Arc::new(Int32Array::from(vec![
                    Some(10),
                    Some(20),
                    Some(30),
                    Some(40),
                    None,
                    Some(50),
                ])),
            ],
        )
        .unwrap();
        Table::try_new("sales", batch, 64).unwrap()
    }

    #[test]
    fn groups_in_first_occurrence_order() {
        let table = sales_table();
        let descriptor = GroupByDescriptor::try_new(
            &table,
            "region",
            vec![
                AggregateDescriptor::try_new(&table, AggregateOp::Count, None).unwrap(),
                AggregateDescriptor::try_new(&table, AggregateOp::Sum, Some("amount"))
                    .unwrap(),
            ],
        )
        .unwrap();
        let selection = SelectionBitmap::new(6, true);
        let groups = group_aggregate(&table, &selection, &descriptor).unwrap();
        assert_eq!(groups.len(), 3);

        assert_eq!(groups[0].key, ScalarValue::Utf8(Some("east".to_string())));
        assert_eq!(groups[0].values[0], ("COUNT(*)".to_string(), ScalarValue::Int32(Some(3))));
        assert_eq!(groups[0].values[1], ("SUM(amount)".to_string(), ScalarValue::Int64(Some(90))));

        assert_eq!(groups[1].key, ScalarValue::Utf8(Some("west".to_string())));
        // west: amounts 20 and null; SUM skips the null
        assert_eq!(groups[1].values[1].1, ScalarValue::Int64(Some(20)));

        assert_eq!(groups[2].key, ScalarValue::Null);
        assert_eq!(groups[2].values[0].1, ScalarValue::Int32(Some(1)));
    }

    #[test]
    fn all_null_group_aggregate_reports_null() {
        let table = sales_table();
        let descriptor = GroupByDescriptor::try_new(
            &table,
            "region",
            vec![AggregateDescriptor::try_new(&table, AggregateOp::Min, Some("amount"))
                .unwrap()],
        )
        .unwrap();
        // Select only the west/null-amount row
        let mut selection = SelectionBitmap::new(6, false);
        selection.set(4);
        let groups = group_aggregate(&table, &selection, &descriptor).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].values[0].1, ScalarValue::Int32(None));
    }

    #[test]
    fn respects_selection() {
        let table = sales_table();
        let descriptor = GroupByDescriptor::try_new(
            &table,
            "region",
            vec![AggregateDescriptor::try_new(&table, AggregateOp::Count, None).unwrap()],
        )
        .unwrap();
        let mut selection = SelectionBitmap::new(6, false);
        selection.set(0);
        selection.set(2);
        let groups = group_aggregate(&table, &selection, &descriptor).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].values[0].1, ScalarValue::Int32(Some(2)));
    }

    #[test]
    fn float_key_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("f", DataType::Float64, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow::array::Float64Array::from(vec![1.0]))],
        )
        .unwrap();
        let table = Table::try_new("t", batch, 64).unwrap();
        assert!(GroupByDescriptor::try_new(&table, "f", vec![]).is_err());
    }
}
