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

//! Typed, vectorized, null-aware column predicates
//!
//! A [`Predicate`] is a closed sum over the row filters the engine executes.
//! Each leaf carries its column by name and resolved index, so a predicate
//! is self-contained and thread-safe once analyzed. Evaluation clears
//! selection bits for rows that fail; null rows never satisfy a comparison.

mod compare;
mod string;

pub mod selectivity;

use std::fmt::{Display, Formatter};

use crate::bitmap::{and_bit_chunks, and_not_bit_chunks, BitmapChunkMut};
use crate::error::Result;
use crate::table::{ColumnData, ColumnKind, Table};

use compare::VectorCompare;

pub use crate::table::ColumnRef;
pub use selectivity::reorder_by_selectivity;

/// Comparison operator for numeric predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// Apply to two values of a partially ordered type
    pub fn compare<T: PartialOrd>(&self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::NotEq => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::LtEq => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::GtEq => lhs >= rhs,
        }
    }
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{token}")
    }
}

/// Comparison operator for string predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum StrOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Contains,
    StartsWith,
    EndsWith,
}

impl Display for StrOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let token = match self {
            StrOp::Eq => "=",
            StrOp::NotEq => "!=",
            StrOp::Lt => "<",
            StrOp::LtEq => "<=",
            StrOp::Gt => ">",
            StrOp::GtEq => ">=",
            StrOp::Contains => "CONTAINS",
            StrOp::StartsWith => "STARTS WITH",
            StrOp::EndsWith => "ENDS WITH",
        };
        write!(f, "{token}")
    }
}

/// Whether string comparisons are ordinal or case-insensitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StringComparison {
    /// Byte-wise UTF-8 comparison
    #[default]
    Ordinal,
    /// Both sides are lowered before comparing
    CaseInsensitive,
}

/// A typed row filter over one column, or a combination of filters.
///
/// The predicate lists held by plan nodes combine AND-wise; `And` exists for
/// composing beneath an `Or`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Boolean column equals `expected`
    Bool {
        /// Filtered column
        column: ColumnRef,
        /// Value a row must hold to pass
        expected: bool,
    },
    /// Row is null (or non-null when `negated`)
    IsNull {
        /// Filtered column
        column: ColumnRef,
        /// `true` flips the test to IS NOT NULL
        negated: bool,
    },
    /// Int32/Date32 comparison
    Int32Cmp {
        /// Filtered column
        column: ColumnRef,
        /// Comparison operator
        op: CompareOp,
        /// Comparand
        value: i32,
    },
    /// Int64/Date64/timestamp comparison
    Int64Cmp {
        /// Filtered column
        column: ColumnRef,
        /// Comparison operator
        op: CompareOp,
        /// Comparand
        value: i64,
    },
    /// Float32 comparison
    Float32Cmp {
        /// Filtered column
        column: ColumnRef,
        /// Comparison operator
        op: CompareOp,
        /// Comparand
        value: f32,
    },
    /// Float64 comparison
    Float64Cmp {
        /// Filtered column
        column: ColumnRef,
        /// Comparison operator
        op: CompareOp,
        /// Comparand
        value: f64,
    },
    /// Decimal128 comparison; the comparand is unscaled at the column scale
    DecimalCmp {
        /// Filtered column
        column: ColumnRef,
        /// Comparison operator
        op: CompareOp,
        /// Unscaled comparand
        value: i128,
    },
    /// UTF-8 (or dictionary-encoded UTF-8) comparison
    Utf8Cmp {
        /// Filtered column
        column: ColumnRef,
        /// Comparison operator
        op: StrOp,
        /// Comparand
        value: String,
        /// Ordinal or case-insensitive
        comparison: StringComparison,
    },
    /// Both sides must pass
    And(Box<Predicate>, Box<Predicate>),
    /// Either side must pass
    Or(Box<Predicate>, Box<Predicate>),
    /// The inner predicate must fail
    Not(Box<Predicate>),
}

impl Predicate {
    /// Clear the selection bits in `view` for every row of the view's range
    /// that does not satisfy this predicate
    pub fn evaluate_range(&self, table: &Table, view: &mut BitmapChunkMut<'_>) -> Result<()> {
        match self {
            Predicate::Int32Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Int32 { values, nulls } => {
                        i32::eval_range(values, nulls, *op, *value, view);
                        Ok(())
                    }
                    _ => type_mismatch(column, "Int32"),
                }
            }
            Predicate::Int64Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Int64 { values, nulls } => {
                        i64::eval_range(values, nulls, *op, *value, view);
                        Ok(())
                    }
                    _ => type_mismatch(column, "Int64"),
                }
            }
            Predicate::Float32Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Float32 { values, nulls } => {
                        f32::eval_range(values, nulls, *op, *value, view);
                        Ok(())
                    }
                    _ => type_mismatch(column, "Float32"),
                }
            }
            Predicate::Float64Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Float64 { values, nulls } => {
                        f64::eval_range(values, nulls, *op, *value, view);
                        Ok(())
                    }
                    _ => type_mismatch(column, "Float64"),
                }
            }
            Predicate::DecimalCmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Decimal128 { values, nulls, .. } => {
                        i128::eval_range(values, nulls, *op, *value, view);
                        Ok(())
                    }
                    _ => type_mismatch(column, "Decimal128"),
                }
            }
            Predicate::Utf8Cmp {
                column,
                op,
                value,
                comparison,
            } => {
                let data = table.column_data(column.index)?;
                match data {
                    ColumnData::Utf8(_) | ColumnData::DictUtf8 { .. } => {
                        string::eval_range(&data, value, *op, *comparison, view);
                        Ok(())
                    }
                    _ => type_mismatch(column, "Utf8"),
                }
            }
            Predicate::Bool { column, expected } => {
                match table.column_data(column.index)? {
                    ColumnData::Boolean { values, nulls } => {
                        let (start, len) = (view.start_row(), view.len());
                        let offset = values.offset() + start;
                        if *expected {
                            and_bit_chunks(view.blocks_mut(), values.inner(), offset, len);
                        } else {
                            and_not_bit_chunks(view.blocks_mut(), values.inner(), offset, len);
                        }
                        if let Some(nulls) = nulls {
                            let inner = nulls.inner();
                            and_bit_chunks(
                                view.blocks_mut(),
                                inner.inner(),
                                inner.offset() + start,
                                len,
                            );
                        }
                        Ok(())
                    }
                    _ => type_mismatch(column, "Boolean"),
                }
            }
            Predicate::IsNull { column, negated } => {
                let data = table.column_data(column.index)?;
                let (start, len) = (view.start_row(), view.len());
                match (data.nulls(), negated) {
                    (Some(nulls), false) => {
                        let inner = nulls.inner();
                        and_not_bit_chunks(
                            view.blocks_mut(),
                            inner.inner(),
                            inner.offset() + start,
                            len,
                        );
                    }
                    (Some(nulls), true) => {
                        let inner = nulls.inner();
                        and_bit_chunks(
                            view.blocks_mut(),
                            inner.inner(),
                            inner.offset() + start,
                            len,
                        );
                    }
                    // No validity buffer: every row is valid
                    (None, false) => view.clear_all(),
                    (None, true) => {}
                }
                Ok(())
            }
            Predicate::And(lhs, rhs) => {
                lhs.evaluate_range(table, view)?;
                rhs.evaluate_range(table, view)
            }
            Predicate::Or(lhs, rhs) => {
                // Evaluate each side into a scratch copy of the current
                // selection, then AND the union back in
                let mut left = view.blocks().to_vec();
                let mut right = view.blocks().to_vec();
                lhs.evaluate_range(table, &mut view.scratch_view(&mut left))?;
                rhs.evaluate_range(table, &mut view.scratch_view(&mut right))?;
                for (idx, (l, r)) in left.iter().zip(&right).enumerate() {
                    view.and_block(idx, l | r);
                }
                Ok(())
            }
            Predicate::Not(inner) => {
                let mut scratch = view.blocks().to_vec();
                inner.evaluate_range(table, &mut view.scratch_view(&mut scratch))?;
                for (idx, word) in scratch.iter().enumerate() {
                    view.and_block(idx, !word);
                }
                Ok(())
            }
        }
    }

    /// Scalar path: whether `row` satisfies this predicate
    pub fn evaluate_row(&self, table: &Table, row: usize) -> Result<bool> {
        match self {
            Predicate::Int32Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Int32 { values, nulls } => Ok(nulls
                        .map_or(true, |nulls| nulls.is_valid(row))
                        && op.compare(values[row], *value)),
                    _ => type_mismatch(column, "Int32"),
                }
            }
            Predicate::Int64Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Int64 { values, nulls } => Ok(nulls
                        .map_or(true, |nulls| nulls.is_valid(row))
                        && op.compare(values[row], *value)),
                    _ => type_mismatch(column, "Int64"),
                }
            }
            Predicate::Float32Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Float32 { values, nulls } => Ok(nulls
                        .map_or(true, |nulls| nulls.is_valid(row))
                        && op.compare(values[row], *value)),
                    _ => type_mismatch(column, "Float32"),
                }
            }
            Predicate::Float64Cmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Float64 { values, nulls } => Ok(nulls
                        .map_or(true, |nulls| nulls.is_valid(row))
                        && op.compare(values[row], *value)),
                    _ => type_mismatch(column, "Float64"),
                }
            }
            Predicate::DecimalCmp { column, op, value } => {
                match table.column_data(column.index)? {
                    ColumnData::Decimal128 { values, nulls, .. } => Ok(nulls
                        .map_or(true, |nulls| nulls.is_valid(row))
                        && op.compare(values[row], *value)),
                    _ => type_mismatch(column, "Decimal128"),
                }
            }
            Predicate::Utf8Cmp {
                column,
                op,
                value,
                comparison,
            } => {
                let data = table.column_data(column.index)?;
                match data {
                    ColumnData::Utf8(_) | ColumnData::DictUtf8 { .. } => {
                        Ok(string::eval_row(&data, value, *op, *comparison, row))
                    }
                    _ => type_mismatch(column, "Utf8"),
                }
            }
            Predicate::Bool { column, expected } => {
                match table.column_data(column.index)? {
                    ColumnData::Boolean { values, nulls } => Ok(nulls
                        .map_or(true, |nulls| nulls.is_valid(row))
                        && values.value(row) == *expected),
                    _ => type_mismatch(column, "Boolean"),
                }
            }
            Predicate::IsNull { column, negated } => {
                let data = table.column_data(column.index)?;
                Ok(data.is_valid(row) == *negated)
            }
            Predicate::And(lhs, rhs) => {
                Ok(lhs.evaluate_row(table, row)? && rhs.evaluate_row(table, row)?)
            }
            Predicate::Or(lhs, rhs) => {
                Ok(lhs.evaluate_row(table, row)? || rhs.evaluate_row(table, row)?)
            }
            Predicate::Not(inner) => Ok(!inner.evaluate_row(table, row)?),
        }
    }

    /// Check that each leaf's column exists with the physical type the
    /// variant expects. Run once at analysis time so evaluation can treat a
    /// mismatch as an internal error.
    pub fn validate(&self, table: &Table) -> Result<()> {
        match self {
            Predicate::Int32Cmp { column, .. } => {
                expect_kind(table, column, ColumnKind::Int32)
            }
            Predicate::Int64Cmp { column, .. } => {
                expect_kind(table, column, ColumnKind::Int64)
            }
            Predicate::Float32Cmp { column, .. } => {
                expect_kind(table, column, ColumnKind::Float32)
            }
            Predicate::Float64Cmp { column, .. } => {
                expect_kind(table, column, ColumnKind::Float64)
            }
            Predicate::DecimalCmp { column, .. } => {
                expect_kind(table, column, ColumnKind::Decimal128)
            }
            Predicate::Bool { column, .. } => {
                expect_kind(table, column, ColumnKind::Boolean)
            }
            Predicate::Utf8Cmp { column, .. } => {
                let kind = check_bounds(table, column)?;
                if kind == ColumnKind::Utf8 || kind == ColumnKind::DictUtf8 {
                    Ok(())
                } else {
                    invalid_argument_err!(
                        "string predicate on non-string column '{}'",
                        column.name
                    )
                }
            }
            Predicate::IsNull { column, .. } => check_bounds(table, column).map(|_| ()),
            Predicate::And(lhs, rhs) | Predicate::Or(lhs, rhs) => {
                lhs.validate(table)?;
                rhs.validate(table)
            }
            Predicate::Not(inner) => inner.validate(table),
        }
    }

    /// Append every column this predicate touches to `columns`
    pub fn collect_columns(&self, columns: &mut Vec<ColumnRef>) {
        match self {
            Predicate::Bool { column, .. }
            | Predicate::IsNull { column, .. }
            | Predicate::Int32Cmp { column, .. }
            | Predicate::Int64Cmp { column, .. }
            | Predicate::Float32Cmp { column, .. }
            | Predicate::Float64Cmp { column, .. }
            | Predicate::DecimalCmp { column, .. }
            | Predicate::Utf8Cmp { column, .. } => columns.push(column.clone()),
            Predicate::And(lhs, rhs) | Predicate::Or(lhs, rhs) => {
                lhs.collect_columns(columns);
                rhs.collect_columns(columns);
            }
            Predicate::Not(inner) => inner.collect_columns(columns),
        }
    }
}

fn check_bounds(table: &Table, column: &ColumnRef) -> Result<ColumnKind> {
    if column.index >= table.num_columns() {
        return invalid_argument_err!(
            "column '{}' index {} out of bounds",
            column.name,
            column.index
        );
    }
    Ok(table.column_kind(column.index))
}

fn expect_kind(table: &Table, column: &ColumnRef, expected: ColumnKind) -> Result<()> {
    let kind = check_bounds(table, column)?;
    if kind == expected {
        Ok(())
    } else {
        invalid_argument_err!(
            "predicate expects {expected:?} but column '{}' is {kind:?}",
            column.name
        )
    }
}

fn type_mismatch<T>(column: &ColumnRef, expected: &str) -> Result<T> {
    internal_err!(
        "predicate/column type mismatch for column '{}' (expected {expected})",
        column.name
    )
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Predicate::Bool { column, expected } => {
                write!(f, "{column} = Boolean({expected})")
            }
            Predicate::IsNull { column, negated } => {
                if *negated {
                    write!(f, "{column} IS NOT NULL")
                } else {
                    write!(f, "{column} IS NULL")
                }
            }
            Predicate::Int32Cmp { column, op, value } => {
                write!(f, "{column} {op} Int32({value})")
            }
            Predicate::Int64Cmp { column, op, value } => {
                write!(f, "{column} {op} Int64({value})")
            }
            Predicate::Float32Cmp { column, op, value } => {
                write!(f, "{column} {op} Float32({value})")
            }
            Predicate::Float64Cmp { column, op, value } => {
                write!(f, "{column} {op} Float64({value})")
            }
            Predicate::DecimalCmp { column, op, value } => {
                write!(f, "{column} {op} Decimal128({value})")
            }
            Predicate::Utf8Cmp {
                column,
                op,
                value,
                comparison,
            } => {
                write!(f, "{column} {op} Utf8(\"{value}\")")?;
                if *comparison == StringComparison::CaseInsensitive {
                    write!(f, " (ci)")?;
                }
                Ok(())
            }
            Predicate::And(lhs, rhs) => write!(f, "({lhs} AND {rhs})"),
            Predicate::Or(lhs, rhs) => write!(f, "({lhs} OR {rhs})"),
            Predicate::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}
