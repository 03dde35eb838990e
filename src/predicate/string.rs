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

//! Scalar string comparison kernels
//!
//! String evaluation is always a scalar loop over the still-selected rows.
//! Ordinal comparisons are UTF-8 byte-wise; substring operators use the
//! standard library's byte search. Case-insensitive mode lowers the
//! comparand once up front and each row value on access.

use crate::bitmap::BitmapChunkMut;
use crate::predicate::{StrOp, StringComparison};
use crate::table::ColumnData;

/// A comparand prepared once per evaluation
pub(crate) struct PreparedNeedle<'a> {
    needle: std::borrow::Cow<'a, str>,
    op: StrOp,
    case_insensitive: bool,
}

impl<'a> PreparedNeedle<'a> {
    pub(crate) fn new(value: &'a str, op: StrOp, comparison: StringComparison) -> Self {
        let case_insensitive = comparison == StringComparison::CaseInsensitive;
        let needle = if case_insensitive {
            std::borrow::Cow::Owned(value.to_lowercase())
        } else {
            std::borrow::Cow::Borrowed(value)
        };
        Self {
            needle,
            op,
            case_insensitive,
        }
    }

    /// Whether a non-null row value matches
    pub(crate) fn matches(&self, value: &str) -> bool {
        if self.case_insensitive {
            str_matches(self.op, &value.to_lowercase(), &self.needle)
        } else {
            str_matches(self.op, value, &self.needle)
        }
    }
}

fn str_matches(op: StrOp, value: &str, needle: &str) -> bool {
    match op {
        StrOp::Eq => value == needle,
        StrOp::NotEq => value != needle,
        StrOp::Lt => value < needle,
        StrOp::LtEq => value <= needle,
        StrOp::Gt => value > needle,
        StrOp::GtEq => value >= needle,
        StrOp::Contains => value.contains(needle),
        StrOp::StartsWith => value.starts_with(needle),
        StrOp::EndsWith => value.ends_with(needle),
    }
}

/// Clear the selection bits of rows whose string value fails the predicate.
/// Null rows never match.
pub(crate) fn eval_range(
    column: &ColumnData<'_>,
    value: &str,
    op: StrOp,
    comparison: StringComparison,
    view: &mut BitmapChunkMut<'_>,
) {
    let needle = PreparedNeedle::new(value, op, comparison);
    view.retain(|row| {
        column
            .str_value(row)
            .is_some_and(|value| needle.matches(value))
    });
}

/// Single-row path for the streaming collectors
pub(crate) fn eval_row(
    column: &ColumnData<'_>,
    value: &str,
    op: StrOp,
    comparison: StringComparison,
    row: usize,
) -> bool {
    let needle = PreparedNeedle::new(value, op, comparison);
    column
        .str_value(row)
        .is_some_and(|value| needle.matches(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::SelectionBitmap;
    use arrow::array::{Array, StringArray};

    fn eval(array: &StringArray, value: &str, op: StrOp) -> Vec<usize> {
        let column = ColumnData::Utf8(array);
        let mut bitmap = SelectionBitmap::new(array.len(), true);
        {
            let mut views = bitmap.chunk_views_mut(64);
            eval_range(&column, value, op, StringComparison::Ordinal, &mut views[0]);
        }
        bitmap.selected_indices().collect()
    }

    #[test]
    fn substring_operators() {
        let array = StringArray::from(vec!["alpha", "beta", "gamma", "delta", "epsilon"]);
        assert_eq!(eval(&array, "et", StrOp::Contains), vec![1]);
        assert_eq!(eval(&array, "a", StrOp::EndsWith), vec![0, 1, 2, 3]);
        assert_eq!(eval(&array, "de", StrOp::StartsWith), vec![3]);
    }

    #[test]
    fn ordinal_ordering_is_byte_wise() {
        let array = StringArray::from(vec!["a", "b", "c", "ba"]);
        assert_eq!(eval(&array, "b", StrOp::Lt), vec![0]);
        assert_eq!(eval(&array, "b", StrOp::GtEq), vec![1, 2, 3]);
    }

    #[test]
    fn nulls_never_match() {
        let array = StringArray::from(vec![Some("x"), None, Some("y")]);
        assert_eq!(eval(&array, "x", StrOp::NotEq), vec![2]);
        assert_eq!(eval(&array, "x", StrOp::Eq), vec![0]);
    }

    #[test]
    fn case_insensitive_lowers_both_sides() {
        let array = StringArray::from(vec!["Alpha", "BETA", "beta"]);
        let column = ColumnData::Utf8(&array);
        let mut bitmap = SelectionBitmap::new(3, true);
        {
            let mut views = bitmap.chunk_views_mut(64);
            eval_range(
                &column,
                "Beta",
                StrOp::Eq,
                StringComparison::CaseInsensitive,
                &mut views[0],
            );
        }
        let selected: Vec<usize> = bitmap.selected_indices().collect();
        assert_eq!(selected, vec![1, 2]);
    }
}
