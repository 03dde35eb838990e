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

//! Vectorized comparison kernels for numeric columns
//!
//! The kernels process 8 lanes per step for 32-bit types and 4 lanes for
//! 64-bit types, building a movemask-style byte from the lane comparisons,
//! merging it with the corresponding validity bits, and ANDing the result
//! into the selection view. Lane loops are written over slice offsets so the
//! compiler can vectorize them; a scalar loop covers the tail and any
//! hardware the autovectorizer leaves behind.

use arrow::buffer::NullBuffer;

use crate::bitmap::BitmapChunkMut;
use crate::predicate::CompareOp;

/// Column-native types with a vectorized range kernel
pub(crate) trait VectorCompare: Copy + PartialOrd {
    /// Evaluate `value <op> comparand` over the view's row range, clearing
    /// selection bits for rows that fail (or are null)
    fn eval_range(
        values: &[Self],
        nulls: Option<&NullBuffer>,
        op: CompareOp,
        comparand: Self,
        view: &mut BitmapChunkMut<'_>,
    );
}

macro_rules! impl_vector_compare {
    ($NATIVE:ty, $LANES:literal) => {
        impl VectorCompare for $NATIVE {
            fn eval_range(
                values: &[Self],
                nulls: Option<&NullBuffer>,
                op: CompareOp,
                comparand: Self,
                view: &mut BitmapChunkMut<'_>,
            ) {
                dispatch_op::<Self, $LANES>(values, nulls, op, comparand, view)
            }
        }
    };
}

impl_vector_compare!(i32, 8);
impl_vector_compare!(f32, 8);
impl_vector_compare!(i64, 4);
impl_vector_compare!(f64, 4);
// 128-bit lanes gain nothing from masking; decimals take the scalar loop
impl_vector_compare!(i128, 1);

/// Monomorphize the comparison operator out of the hot loop
fn dispatch_op<T: Copy + PartialOrd, const LANES: usize>(
    values: &[T],
    nulls: Option<&NullBuffer>,
    op: CompareOp,
    comparand: T,
    view: &mut BitmapChunkMut<'_>,
) {
    match op {
        CompareOp::Eq => eval_lanes::<T, LANES, _>(values, nulls, comparand, view, |a, b| a == b),
        CompareOp::NotEq => eval_lanes::<T, LANES, _>(values, nulls, comparand, view, |a, b| a != b),
        CompareOp::Lt => eval_lanes::<T, LANES, _>(values, nulls, comparand, view, |a, b| a < b),
        CompareOp::LtEq => eval_lanes::<T, LANES, _>(values, nulls, comparand, view, |a, b| a <= b),
        CompareOp::Gt => eval_lanes::<T, LANES, _>(values, nulls, comparand, view, |a, b| a > b),
        CompareOp::GtEq => eval_lanes::<T, LANES, _>(values, nulls, comparand, view, |a, b| a >= b),
    }
}

fn eval_lanes<T: Copy, const LANES: usize, F: Fn(T, T) -> bool>(
    values: &[T],
    nulls: Option<&NullBuffer>,
    comparand: T,
    view: &mut BitmapChunkMut<'_>,
    cmp: F,
) {
    let start = view.start_row();
    let len = view.len();
    debug_assert!(start + len <= values.len());

    if LANES < 4 {
        scalar_loop(values, nulls, comparand, view, cmp, 0, len);
        return;
    }

    // Views start 64-aligned, so lane groups never straddle a validity word
    let validity = nulls.map(|nulls| validity_words(nulls, start, len));
    let lane_mask: u8 = if LANES == 4 { 0xF } else { 0xFF };
    let vector_rows = len - (len % LANES);

    let mut rel = 0;
    while rel < vector_rows {
        let lanes = &values[start + rel..start + rel + LANES];
        let mut mask: u8 = 0;
        for (lane, value) in lanes.iter().enumerate() {
            mask |= u8::from(cmp(*value, comparand)) << lane;
        }
        if let Some(words) = &validity {
            mask &= lane_bits(words, rel) & lane_mask;
        }
        if LANES == 4 {
            view.apply_mask4(start + rel, mask);
        } else {
            view.apply_mask8(start + rel, mask);
        }
        rel += LANES;
    }

    scalar_loop(values, nulls, comparand, view, cmp, vector_rows, len);
}

fn scalar_loop<T: Copy, F: Fn(T, T) -> bool>(
    values: &[T],
    nulls: Option<&NullBuffer>,
    comparand: T,
    view: &mut BitmapChunkMut<'_>,
    cmp: F,
    from_rel: usize,
    to_rel: usize,
) {
    let start = view.start_row();
    for rel in from_rel..to_rel {
        let row = start + rel;
        let keep = nulls.map_or(true, |nulls| nulls.is_valid(row))
            && cmp(values[row], comparand);
        if !keep {
            view.clear(row);
        }
    }
}

/// Extract the validity bits for rows `[start, start + len)` into 64-bit
/// words. The chunked bit reader shift-merges across byte boundaries, so a
/// non-zero buffer offset costs nothing extra here.
pub(crate) fn validity_words(nulls: &NullBuffer, start: usize, len: usize) -> Vec<u64> {
    let inner = nulls.inner();
    let chunks = inner.inner().bit_chunks(inner.offset() + start, len);
    let mut words = Vec::with_capacity(len.div_ceil(64));
    words.extend(chunks.iter());
    if chunks.remainder_len() > 0 {
        words.push(chunks.remainder_bits());
    }
    words
}

#[inline]
fn lane_bits(words: &[u64], rel: usize) -> u8 {
    (words[rel >> 6] >> (rel & 63)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::SelectionBitmap;
    use arrow::array::{Array, Float64Array, Int32Array};

    fn eval_i32(
        array: &Int32Array,
        op: CompareOp,
        comparand: i32,
    ) -> Vec<usize> {
        let mut bitmap = SelectionBitmap::new(array.len(), true);
        {
            let mut views = bitmap.chunk_views_mut(64);
            for view in &mut views {
                i32::eval_range(array.values(), array.nulls(), op, comparand, view);
            }
        }
        bitmap.selected_indices().collect()
    }

    #[test]
    fn int32_comparisons() {
        let array = Int32Array::from_iter_values(0..20);
        assert_eq!(eval_i32(&array, CompareOp::Gt, 16), vec![17, 18, 19]);
        assert_eq!(eval_i32(&array, CompareOp::Eq, 5), vec![5]);
        assert_eq!(eval_i32(&array, CompareOp::Lt, 2), vec![0, 1]);
        assert_eq!(eval_i32(&array, CompareOp::GtEq, 18), vec![18, 19]);
        assert_eq!(eval_i32(&array, CompareOp::LtEq, 1), vec![0, 1]);
        assert_eq!(eval_i32(&array, CompareOp::NotEq, 0).len(), 19);
    }

    #[test]
    fn nulls_never_match() {
        let array = Int32Array::from(vec![Some(1), None, Some(3), None, Some(5), Some(6)]);
        assert_eq!(eval_i32(&array, CompareOp::Gt, 0), vec![0, 2, 4, 5]);
        assert_eq!(eval_i32(&array, CompareOp::NotEq, 1), vec![2, 4, 5]);
    }

    #[test]
    fn vector_body_and_scalar_tail_agree() {
        // 131 rows: 16 full 8-lane groups plus a 3-row tail
        let values: Vec<Option<i32>> =
            (0..131).map(|i| (i % 7 != 0).then_some(i % 50)).collect();
        let array = Int32Array::from(values.clone());
        let result = eval_i32(&array, CompareOp::LtEq, 25);
        let expected: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_some_and(|v| v <= 25))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn four_lane_float_path() {
        let array = Float64Array::from(vec![0.5, 1.5, f64::NAN, 3.5, 4.5, 5.5]);
        let mut bitmap = SelectionBitmap::new(array.len(), true);
        {
            let mut views = bitmap.chunk_views_mut(64);
            f64::eval_range(
                array.values(),
                array.nulls(),
                CompareOp::Gt,
                1.0,
                &mut views[0],
            );
        }
        // NaN compares false against everything
        let selected: Vec<usize> = bitmap.selected_indices().collect();
        assert_eq!(selected, vec![1, 3, 4, 5]);
    }

    #[test]
    fn offset_validity_buffer() {
        let values: Vec<Option<i32>> =
            (0..100).map(|i| (i % 3 != 0).then_some(i)).collect();
        let array = Int32Array::from(values);
        let sliced = array.slice(5, 80);
        let result = eval_i32(&sliced, CompareOp::GtEq, 0);
        let expected: Vec<usize> = (0..80).filter(|rel| (rel + 5) % 3 != 0).collect();
        assert_eq!(result, expected);
    }
}
