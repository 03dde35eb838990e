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

//! The queryable wrapper around an Arrow [`RecordBatch`]
//!
//! Wrapping derives the schema map (column name to index and logical type)
//! once, classifies each column's physical representation, and eagerly builds
//! zone maps for the numeric columns. The wrapped batch is immutable; the
//! caller guarantees it outlives every query against it.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use ahash::RandomState;
use arrow::array::{Array, AsArray, PrimitiveArray, StringArray};
use arrow::buffer::{BooleanBuffer, NullBuffer};
use arrow::datatypes::{
    DataType, Decimal128Type, Float32Type, Float64Type, Int32Type, Int64Type,
    SchemaRef,
};
use arrow::record_batch::RecordBatch;

use crate::error::Result;
use crate::zone::{TypedZoneMap, ZoneMap};

/// A column referenced by both name and resolved index, so predicates are
/// self-contained after analysis
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Column name as it appears in the schema
    pub name: Arc<str>,
    /// Zero-based column index in the batch
    pub index: usize,
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.name)
    }
}

/// Physical representation of a column, derived once at wrap time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal128,
    Boolean,
    Utf8,
    DictUtf8,
    Unsupported,
}

impl ColumnKind {
    fn classify(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int32 | DataType::Date32 => ColumnKind::Int32,
            DataType::Int64 | DataType::Date64 | DataType::Timestamp(_, _) => {
                ColumnKind::Int64
            }
            DataType::Float32 => ColumnKind::Float32,
            DataType::Float64 => ColumnKind::Float64,
            DataType::Decimal128(_, _) => ColumnKind::Decimal128,
            DataType::Boolean => ColumnKind::Boolean,
            DataType::Utf8 => ColumnKind::Utf8,
            DataType::Dictionary(key, value)
                if key.as_ref() == &DataType::Int32
                    && value.as_ref() == &DataType::Utf8 =>
            {
                ColumnKind::DictUtf8
            }
            _ => ColumnKind::Unsupported,
        }
    }
}

/// Borrowed, typed view of one column's buffers
#[derive(Debug, Clone, Copy)]
pub enum ColumnData<'a> {
    /// Int32 and Date32 columns
    Int32 {
        /// Packed value buffer
        values: &'a [i32],
        /// Validity bitmap, `None` when the column has no null slot
        nulls: Option<&'a NullBuffer>,
    },
    /// Int64, Date64 and timestamp columns
    Int64 {
        values: &'a [i64],
        nulls: Option<&'a NullBuffer>,
    },
    /// Float32 columns
    Float32 {
        values: &'a [f32],
        nulls: Option<&'a NullBuffer>,
    },
    /// Float64 columns
    Float64 {
        values: &'a [f64],
        nulls: Option<&'a NullBuffer>,
    },
    /// Decimal128 columns; values are unscaled
    Decimal128 {
        values: &'a [i128],
        nulls: Option<&'a NullBuffer>,
        /// Decimal scale (digits right of the point)
        scale: i8,
    },
    /// Boolean columns
    Boolean {
        /// Packed value bits
        values: &'a BooleanBuffer,
        nulls: Option<&'a NullBuffer>,
    },
    /// UTF-8 columns
    Utf8(&'a StringArray),
    /// Dictionary-encoded UTF-8 columns
    DictUtf8 {
        /// Dictionary keys, one per row
        keys: &'a PrimitiveArray<Int32Type>,
        /// Dictionary values
        values: &'a StringArray,
    },
}

impl<'a> ColumnData<'a> {
    /// Validity bitmap of the column, if any
    pub fn nulls(&self) -> Option<&'a NullBuffer> {
        match self {
            ColumnData::Int32 { nulls, .. }
            | ColumnData::Int64 { nulls, .. }
            | ColumnData::Float32 { nulls, .. }
            | ColumnData::Float64 { nulls, .. }
            | ColumnData::Decimal128 { nulls, .. }
            | ColumnData::Boolean { nulls, .. } => *nulls,
            ColumnData::Utf8(array) => {
                let array: &'a StringArray = array;
                array.nulls()
            }
            ColumnData::DictUtf8 { keys, .. } => {
                let keys: &'a PrimitiveArray<Int32Type> = keys;
                keys.nulls()
            }
        }
    }

    /// Whether the column has at least one null row
    pub fn has_nulls(&self) -> bool {
        self.nulls().is_some_and(|nulls| nulls.null_count() > 0)
    }

    /// Whether `row` holds a non-null value
    pub fn is_valid(&self, row: usize) -> bool {
        self.nulls().map_or(true, |nulls| nulls.is_valid(row))
    }

    /// String value at `row` for UTF-8 and dictionary columns,
    /// `None` when null
    pub fn str_value(&self, row: usize) -> Option<&'a str> {
        match self {
            ColumnData::Utf8(array) => {
                array.is_valid(row).then(|| array.value(row))
            }
            ColumnData::DictUtf8 { keys, values } => {
                if !keys.is_valid(row) {
                    return None;
                }
                let key = keys.value(row) as usize;
                values.is_valid(key).then(|| values.value(key))
            }
            _ => None,
        }
    }
}

/// An immutable record batch wrapped for querying
#[derive(Debug)]
pub struct Table {
    name: String,
    batch: RecordBatch,
    kinds: Vec<ColumnKind>,
    name_to_index: HashMap<String, usize, RandomState>,
    zone_maps: Vec<Option<ZoneMap>>,
    chunk_size: usize,
}

impl Table {
    /// Wrap `batch` under `name`, deriving the schema map and building zone
    /// maps with `chunk_size` rows per chunk (must be a multiple of 64).
    pub fn try_new(
        name: impl Into<String>,
        batch: RecordBatch,
        chunk_size: usize,
    ) -> Result<Self> {
        if chunk_size == 0 || chunk_size % 64 != 0 {
            return invalid_argument_err!(
                "chunk_size must be a non-zero multiple of 64, got {chunk_size}"
            );
        }
        let schema = batch.schema();
        let mut name_to_index =
            HashMap::with_capacity_and_hasher(schema.fields().len(), RandomState::new());
        let mut kinds = Vec::with_capacity(schema.fields().len());
        for (index, field) in schema.fields().iter().enumerate() {
            name_to_index
                .entry(field.name().clone())
                .or_insert(index);
            kinds.push(ColumnKind::classify(field.data_type()));
        }

        let zone_maps = kinds
            .iter()
            .enumerate()
            .map(|(index, kind)| build_zone_map(&batch, index, *kind, chunk_size))
            .collect();

        Ok(Self {
            name: name.into(),
            batch,
            kinds,
            name_to_index,
            zone_maps,
            chunk_size,
        })
    }

    /// The table name used by the SQL front-end
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped batch
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// The batch schema
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Number of rows
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Number of columns
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Rows per chunk the table was wrapped with
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks covering the batch
    pub fn num_chunks(&self) -> usize {
        self.num_rows().div_ceil(self.chunk_size)
    }

    /// Row range of chunk `k`
    pub fn chunk_bounds(&self, k: usize) -> Range<usize> {
        let lo = k * self.chunk_size;
        let hi = ((k + 1) * self.chunk_size).min(self.num_rows());
        lo..hi
    }

    /// Resolve a column name to its index
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.name_to_index.get(name).copied().ok_or_else(|| {
            crate::error::Error::InvalidArgument(format!(
                "unknown column name '{name}' in table '{}'",
                self.name
            ))
        })
    }

    /// Resolve a column name to a self-contained reference
    pub fn column_ref(&self, name: &str) -> Result<ColumnRef> {
        let index = self.column_index(name)?;
        Ok(ColumnRef {
            name: Arc::from(name),
            index,
        })
    }

    /// Logical type of column `index`
    pub fn data_type(&self, index: usize) -> &DataType {
        self.batch.schema_ref().field(index).data_type()
    }

    pub(crate) fn column_kind(&self, index: usize) -> ColumnKind {
        self.kinds[index]
    }

    /// Typed view of column `index`
    pub fn column_data(&self, index: usize) -> Result<ColumnData<'_>> {
        if index >= self.batch.num_columns() {
            return invalid_argument_err!(
                "column index {index} out of bounds for {} columns",
                self.batch.num_columns()
            );
        }
        let array = self.batch.column(index);
        let data = match self.kinds[index] {
            ColumnKind::Int32 => {
                let array = array.as_primitive::<Int32Type>();
                ColumnData::Int32 {
                    values: array.values(),
                    nulls: array.nulls(),
                }
            }
            ColumnKind::Int64 => {
                let array = array.as_primitive::<Int64Type>();
                ColumnData::Int64 {
                    values: array.values(),
                    nulls: array.nulls(),
                }
            }
            ColumnKind::Float32 => {
                let array = array.as_primitive::<Float32Type>();
                ColumnData::Float32 {
                    values: array.values(),
                    nulls: array.nulls(),
                }
            }
            ColumnKind::Float64 => {
                let array = array.as_primitive::<Float64Type>();
                ColumnData::Float64 {
                    values: array.values(),
                    nulls: array.nulls(),
                }
            }
            ColumnKind::Decimal128 => {
                let array = array.as_primitive::<Decimal128Type>();
                let scale = match self.data_type(index) {
                    DataType::Decimal128(_, scale) => *scale,
                    _ => 0,
                };
                ColumnData::Decimal128 {
                    values: array.values(),
                    nulls: array.nulls(),
                    scale,
                }
            }
            ColumnKind::Boolean => {
                let array = array.as_boolean();
                ColumnData::Boolean {
                    values: array.values(),
                    nulls: array.nulls(),
                }
            }
            ColumnKind::Utf8 => ColumnData::Utf8(array.as_string::<i32>()),
            ColumnKind::DictUtf8 => {
                let dict = array.as_dictionary::<Int32Type>();
                let values = dict.values().as_string::<i32>();
                ColumnData::DictUtf8 {
                    keys: dict.keys(),
                    values,
                }
            }
            ColumnKind::Unsupported => {
                return unsupported_err!(
                    "column '{}' has unsupported type {}",
                    self.batch.schema_ref().field(index).name(),
                    self.data_type(index)
                );
            }
        };
        Ok(data)
    }

    /// Zone map of column `index`, `None` for non-numeric columns
    pub fn zone_map(&self, index: usize) -> Option<&ZoneMap> {
        self.zone_maps.get(index).and_then(|map| map.as_ref())
    }
}

fn build_zone_map(
    batch: &RecordBatch,
    index: usize,
    kind: ColumnKind,
    chunk_size: usize,
) -> Option<ZoneMap> {
    let array = batch.column(index);
    match kind {
        ColumnKind::Int32 => {
            let array = array.as_primitive::<Int32Type>();
            Some(ZoneMap::Int32(TypedZoneMap::build(
                array.values(),
                array.nulls(),
                chunk_size,
            )))
        }
        ColumnKind::Int64 => {
            let array = array.as_primitive::<Int64Type>();
            Some(ZoneMap::Int64(TypedZoneMap::build(
                array.values(),
                array.nulls(),
                chunk_size,
            )))
        }
        ColumnKind::Float32 => {
            let array = array.as_primitive::<Float32Type>();
            Some(ZoneMap::Float32(TypedZoneMap::build(
                array.values(),
                array.nulls(),
                chunk_size,
            )))
        }
        ColumnKind::Float64 => {
            let array = array.as_primitive::<Float64Type>();
            Some(ZoneMap::Float64(TypedZoneMap::build(
                array.values(),
                array.nulls(),
                chunk_size,
            )))
        }
        ColumnKind::Decimal128 => {
            let array = array.as_primitive::<Decimal128Type>();
            Some(ZoneMap::Decimal128(TypedZoneMap::build(
                array.values(),
                array.nulls(),
                chunk_size,
            )))
        }
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use arrow::array::{BooleanArray, Float64Array, Int32Array};
    use arrow::datatypes::{Field, Schema};

    pub(crate) fn test_table() -> Table {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("b", DataType::Float64, false),
            Field::new("c", DataType::Utf8, true),
            Field::new("d", DataType::Boolean, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None, Some(3), Some(4)])),
                Arc::new(Float64Array::from(vec![0.5, 1.5, 2.5, 3.5])),
                Arc::new(StringArray::from(vec![
                    Some("alpha"),
                    Some("beta"),
                    None,
                    Some("delta"),
                ])),
                Arc::new(BooleanArray::from(vec![true, false, true, false])),
            ],
        )
        .unwrap();
        Table::try_new("test", batch, 64).unwrap()
    }

    #[test]
    fn schema_map_resolution() {
        let table = test_table();
        assert_eq!(table.column_index("a").unwrap(), 0);
        assert_eq!(table.column_index("d").unwrap(), 3);
        let err = table.column_index("nope").unwrap_err();
        assert!(err.to_string().contains("unknown column name 'nope'"));

        let column = table.column_ref("b").unwrap();
        assert_eq!(column.index, 1);
        assert_eq!(column.to_string(), "#b");
    }

    #[test]
    fn zone_maps_only_for_numeric_columns() {
        let table = test_table();
        assert!(table.zone_map(0).is_some());
        assert!(table.zone_map(1).is_some());
        assert!(table.zone_map(2).is_none());
        assert!(table.zone_map(3).is_none());
    }

    #[test]
    fn chunk_geometry() {
        let table = test_table();
        assert_eq!(table.num_chunks(), 1);
        assert_eq!(table.chunk_bounds(0), 0..4);

        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from_iter_values(0..200))],
        )
        .unwrap();
        let table = Table::try_new("t", batch, 128).unwrap();
        assert_eq!(table.num_chunks(), 2);
        assert_eq!(table.chunk_bounds(1), 128..200);
    }

    #[test]
    fn rejects_unaligned_chunk_size() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )
        .unwrap();
        assert!(Table::try_new("t", batch, 100).is_err());
    }

    #[test]
    fn string_access_through_handles() {
        let table = test_table();
        let data = table.column_data(2).unwrap();
        assert_eq!(data.str_value(0), Some("alpha"));
        assert_eq!(data.str_value(2), None);
        assert!(data.has_nulls());
    }
}
