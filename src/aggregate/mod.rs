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

//! Aggregate operations and the accumulator machinery shared by the fused,
//! selection-driven and grouped execution paths

pub(crate) mod fused;
pub(crate) mod group;
pub(crate) mod masked;

use std::fmt::{Display, Formatter};

use arrow::datatypes::DataType;

use crate::error::{Error, Result};
use crate::scalar::ScalarValue;
use crate::table::{ColumnData, ColumnRef, Table};

pub use group::{GroupByDescriptor, GroupRow};

/// The simple aggregate operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    /// 32-bit row count
    Count,
    /// 64-bit row count
    LongCount,
    /// Sum of non-null values
    Sum,
    /// Arithmetic mean of non-null values
    Avg,
    /// Smallest non-null value
    Min,
    /// Largest non-null value
    Max,
}

impl Display for AggregateOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateOp::Count => "COUNT",
            AggregateOp::LongCount => "LONGCOUNT",
            AggregateOp::Sum => "SUM",
            AggregateOp::Avg => "AVG",
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
        };
        write!(f, "{name}")
    }
}

/// One aggregate to compute: operation, optional input column, result name
/// and declared output type
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDescriptor {
    /// The operation
    pub op: AggregateOp,
    /// Input column; `None` only for Count/LongCount (count matching rows)
    pub column: Option<ColumnRef>,
    /// Name the result is reported under
    pub result_name: String,
    /// Declared output type
    pub out_type: DataType,
}

impl AggregateDescriptor {
    /// Build a descriptor against `table`, inferring the output type.
    /// Count/LongCount accept a missing column; every other operation
    /// requires one.
    pub fn try_new(table: &Table, op: AggregateOp, column: Option<&str>) -> Result<Self> {
        let column = match column {
            Some(name) => Some(table.column_ref(name)?),
            None => None,
        };
        let column_type = column
            .as_ref()
            .map(|column| table.data_type(column.index).clone());
        let out_type = infer_out_type(op, column_type.as_ref())?;
        let result_name = match &column {
            Some(column) => format!("{op}({})", column.name),
            None => format!("{op}(*)"),
        };
        Ok(Self {
            op,
            column,
            result_name,
            out_type,
        })
    }
}

impl Display for AggregateDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}({column})", self.op),
            None => write!(f, "{}(*)", self.op),
        }
    }
}

fn infer_out_type(op: AggregateOp, column_type: Option<&DataType>) -> Result<DataType> {
    match op {
        AggregateOp::Count => Ok(DataType::Int32),
        AggregateOp::LongCount => Ok(DataType::Int64),
        AggregateOp::Sum => match column_type {
            Some(DataType::Int32 | DataType::Int64) => Ok(DataType::Int64),
            Some(DataType::Float32 | DataType::Float64) => Ok(DataType::Float64),
            Some(DataType::Decimal128(_, scale)) => Ok(DataType::Decimal128(38, *scale)),
            Some(other) => invalid_argument_err!("SUM is not defined over {other}"),
            None => invalid_argument_err!("SUM requires an input column"),
        },
        AggregateOp::Avg => match column_type {
            Some(
                DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal128(_, _),
            ) => Ok(DataType::Float64),
            Some(other) => invalid_argument_err!("AVG is not defined over {other}"),
            None => invalid_argument_err!("AVG requires an input column"),
        },
        AggregateOp::Min | AggregateOp::Max => match column_type {
            Some(
                data_type @ (DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal128(_, _)
                | DataType::Date32
                | DataType::Date64
                | DataType::Timestamp(_, _)),
            ) => Ok(data_type.clone()),
            Some(other) => invalid_argument_err!("{op} is not defined over {other}"),
            None => invalid_argument_err!("{op} requires an input column"),
        },
    }
}

/// Values with a widened sum representation for lossless accumulation
pub(crate) trait AggValue: Copy + PartialOrd + Default + Send + Sync {
    /// Accumulator type for sums
    type Sum: Copy + Send;
    /// The additive identity
    const ZERO_SUM: Self::Sum;
    /// Fold one value into a sum
    fn add(sum: Self::Sum, value: Self) -> Self::Sum;
    /// Combine two partial sums
    fn merge_sum(a: Self::Sum, b: Self::Sum) -> Self::Sum;
}

impl AggValue for i32 {
    // i32 values over an in-memory batch cannot overflow an i64 sum
    type Sum = i64;
    const ZERO_SUM: i64 = 0;
    fn add(sum: i64, value: i32) -> i64 {
        sum + i64::from(value)
    }
    fn merge_sum(a: i64, b: i64) -> i64 {
        a + b
    }
}

impl AggValue for i64 {
    type Sum = i128;
    const ZERO_SUM: i128 = 0;
    fn add(sum: i128, value: i64) -> i128 {
        sum + i128::from(value)
    }
    fn merge_sum(a: i128, b: i128) -> i128 {
        a + b
    }
}

impl AggValue for f32 {
    type Sum = f64;
    const ZERO_SUM: f64 = 0.0;
    fn add(sum: f64, value: f32) -> f64 {
        sum + f64::from(value)
    }
    fn merge_sum(a: f64, b: f64) -> f64 {
        a + b
    }
}

impl AggValue for f64 {
    type Sum = f64;
    const ZERO_SUM: f64 = 0.0;
    fn add(sum: f64, value: f64) -> f64 {
        sum + value
    }
    fn merge_sum(a: f64, b: f64) -> f64 {
        a + b
    }
}

impl AggValue for i128 {
    // `None` marks an overflowed sum; surfaced as an error at finalization
    type Sum = Option<i128>;
    const ZERO_SUM: Option<i128> = Some(0);
    fn add(sum: Option<i128>, value: i128) -> Option<i128> {
        sum.and_then(|sum| sum.checked_add(value))
    }
    fn merge_sum(a: Option<i128>, b: Option<i128>) -> Option<i128> {
        match (a, b) {
            (Some(a), Some(b)) => a.checked_add(b),
            _ => None,
        }
    }
}

/// Running (sum, count, min, max) over one worker's share of rows
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkAccumulator<T: AggValue> {
    pub sum: T::Sum,
    pub count: u64,
    pub min: T,
    pub max: T,
    pub saw_value: bool,
}

impl<T: AggValue> Default for ChunkAccumulator<T> {
    fn default() -> Self {
        Self {
            sum: T::ZERO_SUM,
            count: 0,
            min: T::default(),
            max: T::default(),
            saw_value: false,
        }
    }
}

impl<T: AggValue> ChunkAccumulator<T> {
    #[inline]
    pub fn update(&mut self, value: T) {
        self.sum = T::add(self.sum, value);
        self.count += 1;
        if !self.saw_value {
            self.min = value;
            self.max = value;
            self.saw_value = true;
        } else {
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
    }

    /// Associative merge across workers; partials without a value are
    /// ignored for the extrema
    pub fn merge(mut self, other: Self) -> Self {
        self.sum = T::merge_sum(self.sum, other.sum);
        self.count += other.count;
        if other.saw_value {
            if !self.saw_value {
                self.min = other.min;
                self.max = other.max;
                self.saw_value = true;
            } else {
                if other.min < self.min {
                    self.min = other.min;
                }
                if other.max > self.max {
                    self.max = other.max;
                }
            }
        }
        self
    }
}

/// Type-erased accumulation result, ready for finalization against a
/// descriptor
#[derive(Debug, Clone)]
pub(crate) enum NumericAccumulator {
    /// Count of matching rows, no input column
    CountOnly(u64),
    Int32(ChunkAccumulator<i32>),
    Int64(ChunkAccumulator<i64>),
    Float32(ChunkAccumulator<f32>),
    Float64(ChunkAccumulator<f64>),
    Decimal128(ChunkAccumulator<i128>),
}

impl NumericAccumulator {
    /// Fresh accumulator for the column backing `descriptor`, or
    /// `CountOnly` when the descriptor has no column
    pub fn for_descriptor(table: &Table, descriptor: &AggregateDescriptor) -> Result<Self> {
        let Some(column) = &descriptor.column else {
            return Ok(NumericAccumulator::CountOnly(0));
        };
        Ok(match table.column_data(column.index)? {
            ColumnData::Int32 { .. } => NumericAccumulator::Int32(Default::default()),
            ColumnData::Int64 { .. } => NumericAccumulator::Int64(Default::default()),
            ColumnData::Float32 { .. } => NumericAccumulator::Float32(Default::default()),
            ColumnData::Float64 { .. } => NumericAccumulator::Float64(Default::default()),
            ColumnData::Decimal128 { .. } => {
                NumericAccumulator::Decimal128(Default::default())
            }
            _ => {
                return invalid_argument_err!(
                    "{} is not defined over column '{}'",
                    descriptor.op,
                    column.name
                )
            }
        })
    }

    /// Fold the value at `row` into the accumulator. Null rows are skipped;
    /// `CountOnly` counts every row it sees.
    pub fn update_row(&mut self, column: Option<&ColumnData<'_>>, row: usize) -> Result<()> {
        match (self, column) {
            (NumericAccumulator::CountOnly(count), _) => {
                *count += 1;
                Ok(())
            }
            (NumericAccumulator::Int32(acc), Some(ColumnData::Int32 { values, nulls })) => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    acc.update(values[row]);
                }
                Ok(())
            }
            (NumericAccumulator::Int64(acc), Some(ColumnData::Int64 { values, nulls })) => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    acc.update(values[row]);
                }
                Ok(())
            }
            (
                NumericAccumulator::Float32(acc),
                Some(ColumnData::Float32 { values, nulls }),
            ) => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    acc.update(values[row]);
                }
                Ok(())
            }
            (
                NumericAccumulator::Float64(acc),
                Some(ColumnData::Float64 { values, nulls }),
            ) => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    acc.update(values[row]);
                }
                Ok(())
            }
            (
                NumericAccumulator::Decimal128(acc),
                Some(ColumnData::Decimal128 { values, nulls, .. }),
            ) => {
                if nulls.map_or(true, |nulls| nulls.is_valid(row)) {
                    acc.update(values[row]);
                }
                Ok(())
            }
            _ => internal_err!("accumulator/column type mismatch"),
        }
    }

    /// Produce the final scalar for `descriptor`
    pub fn finalize(self, descriptor: &AggregateDescriptor) -> Result<ScalarValue> {
        match self {
            NumericAccumulator::CountOnly(count) => finalize_count(descriptor.op, count),
            NumericAccumulator::Int32(acc) => finalize_int(
                descriptor,
                i128::from(acc.sum),
                acc.count,
                acc.saw_value,
                i64::from(acc.min),
                i64::from(acc.max),
            ),
            NumericAccumulator::Int64(acc) => finalize_int(
                descriptor,
                acc.sum,
                acc.count,
                acc.saw_value,
                acc.min,
                acc.max,
            ),
            NumericAccumulator::Float32(acc) => finalize_float(
                descriptor,
                acc.sum,
                acc.count,
                acc.saw_value,
                f64::from(acc.min),
                f64::from(acc.max),
            ),
            NumericAccumulator::Float64(acc) => finalize_float(
                descriptor,
                acc.sum,
                acc.count,
                acc.saw_value,
                acc.min,
                acc.max,
            ),
            NumericAccumulator::Decimal128(acc) => {
                finalize_decimal(descriptor, acc)
            }
        }
    }
}

fn finalize_count(op: AggregateOp, count: u64) -> Result<ScalarValue> {
    match op {
        AggregateOp::Count => {
            let count = i32::try_from(count).map_err(|_| {
                Error::Overflow(format!("COUNT of {count} rows exceeds Int32 range"))
            })?;
            Ok(ScalarValue::Int32(Some(count)))
        }
        AggregateOp::LongCount => Ok(ScalarValue::Int64(Some(count as i64))),
        _ => internal_err!("count finalization for non-count operation {op}"),
    }
}

fn finalize_int(
    descriptor: &AggregateDescriptor,
    sum: i128,
    count: u64,
    saw_value: bool,
    min: i64,
    max: i64,
) -> Result<ScalarValue> {
    match descriptor.op {
        AggregateOp::Count | AggregateOp::LongCount => {
            finalize_count(descriptor.op, count)
        }
        AggregateOp::Sum => {
            // Overflow is checked once, at the final reduction
            let sum = i64::try_from(sum).map_err(|_| {
                Error::Overflow(format!(
                    "{} overflowed Int64 (unchecked total {sum})",
                    descriptor.result_name
                ))
            })?;
            Ok(ScalarValue::Int64(Some(sum)))
        }
        AggregateOp::Avg => {
            if count == 0 {
                return Err(Error::EmptySequence("AVG"));
            }
            Ok(ScalarValue::Float64(Some(sum as f64 / count as f64)))
        }
        AggregateOp::Min | AggregateOp::Max => {
            if !saw_value {
                return Err(Error::EmptySequence(min_max_label(descriptor.op)));
            }
            let value = if descriptor.op == AggregateOp::Min { min } else { max };
            // Date and timestamp columns report in their logical type
            Ok(match &descriptor.out_type {
                DataType::Int32 => ScalarValue::Int32(Some(value as i32)),
                DataType::Date32 => ScalarValue::Date32(Some(value as i32)),
                DataType::Date64 => ScalarValue::Date64(Some(value)),
                DataType::Timestamp(unit, _) => {
                    ScalarValue::Timestamp(Some(value), unit.clone())
                }
                _ => ScalarValue::Int64(Some(value)),
            })
        }
    }
}

fn finalize_float(
    descriptor: &AggregateDescriptor,
    sum: f64,
    count: u64,
    saw_value: bool,
    min: f64,
    max: f64,
) -> Result<ScalarValue> {
    match descriptor.op {
        AggregateOp::Count | AggregateOp::LongCount => {
            finalize_count(descriptor.op, count)
        }
        AggregateOp::Sum => Ok(ScalarValue::Float64(Some(sum))),
        AggregateOp::Avg => {
            if count == 0 {
                return Err(Error::EmptySequence("AVG"));
            }
            Ok(ScalarValue::Float64(Some(sum / count as f64)))
        }
        AggregateOp::Min | AggregateOp::Max => {
            if !saw_value {
                return Err(Error::EmptySequence(min_max_label(descriptor.op)));
            }
            let value = if descriptor.op == AggregateOp::Min { min } else { max };
            match descriptor.out_type {
                DataType::Float32 => Ok(ScalarValue::Float32(Some(value as f32))),
                _ => Ok(ScalarValue::Float64(Some(value))),
            }
        }
    }
}

fn finalize_decimal(
    descriptor: &AggregateDescriptor,
    acc: ChunkAccumulator<i128>,
) -> Result<ScalarValue> {
    let scale = match descriptor.out_type {
        DataType::Decimal128(_, scale) => scale,
        _ => 0,
    };
    match descriptor.op {
        AggregateOp::Count | AggregateOp::LongCount => {
            finalize_count(descriptor.op, acc.count)
        }
        AggregateOp::Sum => {
            let sum = acc.sum.ok_or_else(|| {
                Error::Overflow(format!(
                    "{} overflowed Decimal128",
                    descriptor.result_name
                ))
            })?;
            Ok(ScalarValue::Decimal128(Some(sum), 38, scale))
        }
        AggregateOp::Avg => {
            if acc.count == 0 {
                return Err(Error::EmptySequence("AVG"));
            }
            let sum = acc.sum.ok_or_else(|| {
                Error::Overflow(format!(
                    "{} overflowed Decimal128",
                    descriptor.result_name
                ))
            })?;
            let unscaled = sum as f64 / 10f64.powi(i32::from(scale));
            Ok(ScalarValue::Float64(Some(unscaled / acc.count as f64)))
        }
        AggregateOp::Min | AggregateOp::Max => {
            if !acc.saw_value {
                return Err(Error::EmptySequence(min_max_label(descriptor.op)));
            }
            let value = if descriptor.op == AggregateOp::Min {
                acc.min
            } else {
                acc.max
            };
            let (precision, scale) = match descriptor.out_type {
                DataType::Decimal128(precision, scale) => (precision, scale),
                _ => (38, 0),
            };
            Ok(ScalarValue::Decimal128(Some(value), precision, scale))
        }
    }
}

fn min_max_label(op: AggregateOp) -> &'static str {
    match op {
        AggregateOp::Min => "MIN",
        _ => "MAX",
    }
}
