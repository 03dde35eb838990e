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

//! The selection bitmap: the row-mask exchanged between pipeline stages
//!
//! A [`SelectionBitmap`] is an ordered packed bit sequence of the table's
//! row count. Bit `i` set means row `i` is still a candidate. Storage is an
//! array of 64-bit blocks; unused trailing bits of the final block are kept
//! zero after every mutation. Predicate kernels write through 64-aligned
//! [`BitmapChunkMut`] views, which is what makes lock-free parallel chunk
//! evaluation sound.

mod pool;

use std::sync::Arc;

use arrow::buffer::{BooleanBuffer, Buffer, NullBuffer};

use crate::error::Result;

pub use pool::BitmapPool;

/// A compact row mask of fixed length.
///
/// The length is immutable after creation. Binary operators require equal
/// lengths and fail with `InvalidArgument` otherwise. Blocks are returned to
/// the owning [`BitmapPool`] on drop.
#[derive(Debug)]
pub struct SelectionBitmap {
    blocks: Vec<u64>,
    num_rows: usize,
    pool: Option<Arc<BitmapPool>>,
}

impl SelectionBitmap {
    /// Number of 64-bit blocks needed for `num_rows` bits
    pub fn blocks_for(num_rows: usize) -> usize {
        num_rows.div_ceil(64)
    }

    /// Create an unpooled bitmap of `num_rows` bits filled with `initial`
    pub fn new(num_rows: usize, initial: bool) -> Self {
        let fill = if initial { u64::MAX } else { 0 };
        let mut bitmap = Self {
            blocks: vec![fill; Self::blocks_for(num_rows)],
            num_rows,
            pool: None,
        };
        bitmap.mask_trailing();
        bitmap
    }

    pub(crate) fn from_pooled(
        mut blocks: Vec<u64>,
        num_rows: usize,
        initial: bool,
        pool: Arc<BitmapPool>,
    ) -> Self {
        let fill = if initial { u64::MAX } else { 0 };
        blocks.iter_mut().for_each(|block| *block = fill);
        let mut bitmap = Self {
            blocks,
            num_rows,
            pool: Some(pool),
        };
        bitmap.mask_trailing();
        bitmap
    }

    /// Length in rows
    pub fn len(&self) -> usize {
        self.num_rows
    }

    /// Whether the bitmap covers zero rows
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Value of bit `row`
    pub fn get(&self, row: usize) -> bool {
        debug_assert!(row < self.num_rows);
        self.blocks[row >> 6] & (1u64 << (row & 63)) != 0
    }

    /// Set bit `row`
    pub fn set(&mut self, row: usize) {
        debug_assert!(row < self.num_rows);
        self.blocks[row >> 6] |= 1u64 << (row & 63);
    }

    /// Clear bit `row`
    pub fn clear(&mut self, row: usize) {
        debug_assert!(row < self.num_rows);
        self.blocks[row >> 6] &= !(1u64 << (row & 63));
    }

    /// `self &= other`
    pub fn and(&mut self, other: &SelectionBitmap) -> Result<()> {
        self.check_len(other)?;
        for (block, other) in self.blocks.iter_mut().zip(&other.blocks) {
            *block &= other;
        }
        Ok(())
    }

    /// `self |= other`
    pub fn or(&mut self, other: &SelectionBitmap) -> Result<()> {
        self.check_len(other)?;
        for (block, other) in self.blocks.iter_mut().zip(&other.blocks) {
            *block |= other;
        }
        Ok(())
    }

    /// `self &= !other`
    pub fn and_not(&mut self, other: &SelectionBitmap) -> Result<()> {
        self.check_len(other)?;
        for (block, other) in self.blocks.iter_mut().zip(&other.blocks) {
            *block &= !other;
        }
        Ok(())
    }

    /// `self = !self`, restoring the trailing-bit invariant
    pub fn not(&mut self) {
        for block in &mut self.blocks {
            *block = !*block;
        }
        self.mask_trailing();
    }

    fn check_len(&self, other: &SelectionBitmap) -> Result<()> {
        if self.num_rows != other.num_rows {
            return invalid_argument_err!(
                "bitmap lengths differ: {} vs {}",
                self.num_rows,
                other.num_rows
            );
        }
        Ok(())
    }

    /// Number of set bits. Hardware popcount per block, unrolled 4-wide.
    pub fn count_set(&self) -> usize {
        let mut chunks = self.blocks.chunks_exact(4);
        let mut count = 0usize;
        for chunk in &mut chunks {
            count += (chunk[0].count_ones()
                + chunk[1].count_ones()
                + chunk[2].count_ones()
                + chunk[3].count_ones()) as usize;
        }
        for block in chunks.remainder() {
            count += block.count_ones() as usize;
        }
        count
    }

    /// Whether any bit is set. Early-exit scan.
    pub fn any(&self) -> bool {
        self.blocks.iter().any(|block| *block != 0)
    }

    /// Whether every bit is set. Full blocks compare against `!0`, the final
    /// block against the trailing mask.
    pub fn all(&self) -> bool {
        if self.num_rows == 0 {
            return true;
        }
        let (last, full) = self.blocks.split_last().expect("non-empty blocks");
        full.iter().all(|block| *block == u64::MAX) && *last == self.trailing_mask()
    }

    /// Iterator over the indices of set bits, ascending
    pub fn selected_indices(&self) -> SelectedIndices<'_> {
        SelectedIndices {
            blocks: &self.blocks,
            block_idx: 0,
            current: self.blocks.first().copied().unwrap_or(0),
            num_rows: self.num_rows,
        }
    }

    /// AND an 8-bit comparison mask into the bits at `[row, row + 8)`.
    /// `row` must be a multiple of 8; bits outside the byte are preserved.
    #[inline]
    pub fn apply_mask8(&mut self, row: usize, mask: u8) {
        debug_assert_eq!(row % 8, 0);
        let shift = row & 63;
        self.blocks[row >> 6] &= (u64::from(mask) << shift) | !(0xFFu64 << shift);
    }

    /// AND a 4-bit comparison mask into the bits at `[row, row + 4)`.
    /// `row` must be a multiple of 4.
    #[inline]
    pub fn apply_mask4(&mut self, row: usize, mask: u8) {
        debug_assert_eq!(row % 4, 0);
        debug_assert!(mask <= 0xF);
        let shift = row & 63;
        self.blocks[row >> 6] &= (u64::from(mask) << shift) | !(0xFu64 << shift);
    }

    /// Bulk AND with an Arrow validity buffer, handling its bit offset
    pub fn and_with_null_bitmap(&mut self, nulls: &NullBuffer) -> Result<()> {
        if nulls.len() != self.num_rows {
            return invalid_argument_err!(
                "validity length {} does not match bitmap length {}",
                nulls.len(),
                self.num_rows
            );
        }
        let inner = nulls.inner();
        and_bit_chunks(
            &mut self.blocks,
            inner.inner(),
            inner.offset(),
            inner.len(),
        );
        Ok(())
    }

    /// Clear all bits in `[lo, hi)`
    pub fn clear_range(&mut self, lo: usize, hi: usize) {
        let hi = hi.min(self.num_rows);
        if lo >= hi {
            return;
        }
        let (first, last) = (lo >> 6, (hi - 1) >> 6);
        if first == last {
            let mask = bit_span_mask(lo & 63, hi - (first << 6));
            self.blocks[first] &= !mask;
            return;
        }
        self.blocks[first] &= (1u64 << (lo & 63)) - 1;
        for block in &mut self.blocks[first + 1..last] {
            *block = 0;
        }
        let tail_bits = hi - (last << 6);
        self.blocks[last] &= !bit_span_mask(0, tail_bits);
    }

    /// Keep only the set bits whose rank (0-based position among set bits)
    /// falls in `[skip, skip + take)`. Used to apply pagination to an
    /// already-evaluated selection.
    pub fn retain_window(&mut self, skip: usize, take: Option<usize>) {
        let end = take.map(|take| skip.saturating_add(take));
        let mut rank = 0usize;
        for block in &mut self.blocks {
            let word = *block;
            if word == 0 {
                continue;
            }
            let ones = word.count_ones() as usize;
            let all_before = rank + ones <= skip;
            let all_after = end.is_some_and(|end| rank >= end);
            let all_inside =
                rank >= skip && end.map_or(true, |end| rank + ones <= end);
            if all_before || all_after {
                *block = 0;
            } else if !all_inside {
                let mut keep = word;
                let mut scan = word;
                let mut bit_rank = rank;
                while scan != 0 {
                    let bit = scan.trailing_zeros();
                    let inside =
                        bit_rank >= skip && end.map_or(true, |end| bit_rank < end);
                    if !inside {
                        keep &= !(1u64 << bit);
                    }
                    bit_rank += 1;
                    scan &= scan - 1;
                }
                *block = keep;
            }
            rank += ones;
        }
    }

    /// The raw blocks
    pub fn blocks(&self) -> &[u64] {
        &self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [u64] {
        &mut self.blocks
    }

    /// Split into non-overlapping mutable chunk views of `rows_per_chunk`
    /// rows each (the last view may be shorter). `rows_per_chunk` must be a
    /// multiple of 64 so views never share a block.
    pub fn chunk_views_mut(&mut self, rows_per_chunk: usize) -> Vec<BitmapChunkMut<'_>> {
        assert_eq!(rows_per_chunk % 64, 0, "chunk size must be 64-aligned");
        let words = rows_per_chunk / 64;
        let num_rows = self.num_rows;
        let mut views = Vec::with_capacity(self.blocks.len().div_ceil(words.max(1)));
        let mut remaining: &mut [u64] = &mut self.blocks;
        let mut start_row = 0usize;
        while !remaining.is_empty() {
            let take_words = words.min(remaining.len());
            let (head, tail) = std::mem::take(&mut remaining).split_at_mut(take_words);
            let len = rows_per_chunk.min(num_rows - start_row);
            views.push(BitmapChunkMut::new(head, start_row, len));
            remaining = tail;
            start_row += rows_per_chunk;
        }
        views
    }

    /// Copy out as an Arrow boolean buffer for zero-copy column filtering
    pub fn to_boolean_buffer(&self) -> BooleanBuffer {
        let buffer = Buffer::from_slice_ref(self.blocks.as_slice());
        BooleanBuffer::new(buffer, 0, self.num_rows)
    }

    fn trailing_mask(&self) -> u64 {
        let bits = self.num_rows & 63;
        if bits == 0 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    fn mask_trailing(&mut self) {
        if let Some(last) = self.blocks.last_mut() {
            let bits = self.num_rows & 63;
            if bits != 0 {
                *last &= (1u64 << bits) - 1;
            }
        }
    }
}

impl Drop for SelectionBitmap {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.release_blocks(std::mem::take(&mut self.blocks));
        }
    }
}

/// Iterator yielding the indices of set bits by scanning each non-zero block
/// with trailing-zero count
pub struct SelectedIndices<'a> {
    blocks: &'a [u64],
    block_idx: usize,
    current: u64,
    num_rows: usize,
}

impl Iterator for SelectedIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.current == 0 {
            self.block_idx += 1;
            if self.block_idx >= self.blocks.len() {
                return None;
            }
            self.current = self.blocks[self.block_idx];
        }
        let bit = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1;
        let row = (self.block_idx << 6) + bit;
        debug_assert!(row < self.num_rows);
        Some(row)
    }
}

/// A mutable window over a 64-aligned run of selection-bitmap blocks.
///
/// Parallel predicate evaluation hands each worker one of these; since chunk
/// boundaries are multiples of 64 rows, workers never touch the same block.
#[derive(Debug)]
pub struct BitmapChunkMut<'a> {
    blocks: &'a mut [u64],
    start_row: usize,
    len: usize,
}

impl<'a> BitmapChunkMut<'a> {
    pub(crate) fn new(blocks: &'a mut [u64], start_row: usize, len: usize) -> Self {
        debug_assert_eq!(start_row % 64, 0);
        debug_assert_eq!(blocks.len(), len.div_ceil(64));
        Self {
            blocks,
            start_row,
            len,
        }
    }

    /// First row covered by this view
    pub fn start_row(&self) -> usize {
        self.start_row
    }

    /// Number of rows covered by this view
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this view covers zero rows
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One-past-the-last row covered by this view
    pub fn end_row(&self) -> usize {
        self.start_row + self.len
    }

    /// Value of the bit for absolute row `row`
    pub fn get(&self, row: usize) -> bool {
        let bit = self.relative(row);
        self.blocks[bit >> 6] & (1u64 << (bit & 63)) != 0
    }

    /// Clear the bit for absolute row `row`
    pub fn clear(&mut self, row: usize) {
        let bit = self.relative(row);
        self.blocks[bit >> 6] &= !(1u64 << (bit & 63));
    }

    /// Zero every bit in the view (zone-map chunk skip)
    pub fn clear_all(&mut self) {
        self.blocks.iter_mut().for_each(|block| *block = 0);
    }

    /// Whether any bit in the view is set
    pub fn any(&self) -> bool {
        self.blocks.iter().any(|block| *block != 0)
    }

    /// Number of set bits in the view
    pub fn count_set(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.count_ones() as usize)
            .sum()
    }

    /// AND an 8-bit comparison mask into `[row, row + 8)`; `row` is absolute
    /// and must be a multiple of 8
    #[inline]
    pub fn apply_mask8(&mut self, row: usize, mask: u8) {
        let bit = self.relative(row);
        debug_assert_eq!(bit % 8, 0);
        let shift = bit & 63;
        self.blocks[bit >> 6] &= (u64::from(mask) << shift) | !(0xFFu64 << shift);
    }

    /// AND a 4-bit comparison mask into `[row, row + 4)`; `row` is absolute
    /// and must be a multiple of 4
    #[inline]
    pub fn apply_mask4(&mut self, row: usize, mask: u8) {
        let bit = self.relative(row);
        debug_assert_eq!(bit % 4, 0);
        debug_assert!(mask <= 0xF);
        let shift = bit & 63;
        self.blocks[bit >> 6] &= (u64::from(mask) << shift) | !(0xFu64 << shift);
    }

    /// AND block `idx` (relative to the view) with `word`
    #[inline]
    pub fn and_block(&mut self, idx: usize, word: u64) {
        self.blocks[idx] &= word;
    }

    /// Keep only the set bits whose absolute row satisfies `keep`.
    /// Scans set bits with trailing-zero count, so sparse views are cheap.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        for (idx, block) in self.blocks.iter_mut().enumerate() {
            let mut scan = *block;
            let mut kept = scan;
            while scan != 0 {
                let bit = scan.trailing_zeros() as usize;
                let row = self.start_row + (idx << 6) + bit;
                if !keep(row) {
                    kept &= !(1u64 << bit);
                }
                scan &= scan - 1;
            }
            *block = kept;
        }
    }

    /// Fallible variant of [`Self::retain`]
    pub fn try_retain(
        &mut self,
        mut keep: impl FnMut(usize) -> Result<bool>,
    ) -> Result<()> {
        for (idx, block) in self.blocks.iter_mut().enumerate() {
            let mut scan = *block;
            let mut kept = scan;
            while scan != 0 {
                let bit = scan.trailing_zeros() as usize;
                let row = self.start_row + (idx << 6) + bit;
                if !keep(row)? {
                    kept &= !(1u64 << bit);
                }
                scan &= scan - 1;
            }
            *block = kept;
        }
        Ok(())
    }

    /// The raw blocks of the view
    pub fn blocks(&self) -> &[u64] {
        self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [u64] {
        self.blocks
    }

    /// Re-borrow a view over a scratch buffer with this view's geometry
    pub(crate) fn scratch_view<'s>(&self, scratch: &'s mut [u64]) -> BitmapChunkMut<'s> {
        BitmapChunkMut::new(scratch, self.start_row, self.len)
    }

    #[inline]
    fn relative(&self, row: usize) -> usize {
        debug_assert!(row >= self.start_row && row < self.start_row + self.len);
        row - self.start_row
    }
}

/// AND `len` bits of an Arrow bit buffer starting at bit `offset` into
/// `blocks`. The chunked reader merges across byte boundaries, which handles
/// non-zero bit offsets from sliced arrays.
pub(crate) fn and_bit_chunks(blocks: &mut [u64], buffer: &Buffer, offset: usize, len: usize) {
    let chunks = buffer.bit_chunks(offset, len);
    let mut idx = 0;
    for word in chunks.iter() {
        blocks[idx] &= word;
        idx += 1;
    }
    if chunks.remainder_len() > 0 {
        blocks[idx] &= chunks.remainder_bits();
    }
}

/// AND `len` complement bits of an Arrow bit buffer into `blocks`,
/// clearing trailing garbage introduced by the complement
pub(crate) fn and_not_bit_chunks(
    blocks: &mut [u64],
    buffer: &Buffer,
    offset: usize,
    len: usize,
) {
    let chunks = buffer.bit_chunks(offset, len);
    let mut idx = 0;
    for word in chunks.iter() {
        blocks[idx] &= !word;
        idx += 1;
    }
    let remainder_len = chunks.remainder_len();
    if remainder_len > 0 {
        let mask = (1u64 << remainder_len) - 1;
        blocks[idx] &= !chunks.remainder_bits() & mask;
    }
}

fn bit_span_mask(start: usize, end: usize) -> u64 {
    debug_assert!(start < end && end <= 64);
    let high = if end == 64 {
        u64::MAX
    } else {
        (1u64 << end) - 1
    };
    high & !((1u64 << start) - 1)
}
