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

//! A free-list of selection-bitmap block buffers

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bitmap::SelectionBitmap;

/// Maximum number of buffers retained on the free-list. Buffers released
/// beyond this bound are dropped.
const MAX_POOLED_BUFFERS: usize = 16;

/// A free-list of `u64` block buffers backing [`SelectionBitmap`]s.
///
/// Bitmaps are acquired per executor stage and their blocks return here when
/// the bitmap drops, so repeated queries against the same table reuse the
/// same allocations.
#[derive(Debug, Default)]
pub struct BitmapPool {
    free: Mutex<Vec<Vec<u64>>>,
}

impl BitmapPool {
    /// Create an empty pool
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire a bitmap of `num_rows` bits filled with `initial`
    pub fn acquire(self: &Arc<Self>, num_rows: usize, initial: bool) -> SelectionBitmap {
        let blocks = self.acquire_blocks(SelectionBitmap::blocks_for(num_rows));
        SelectionBitmap::from_pooled(blocks, num_rows, initial, Arc::clone(self))
    }

    /// Take a block buffer of at least `num_blocks` capacity off the
    /// free-list, or allocate a fresh one. The returned buffer has
    /// `len == num_blocks` and unspecified contents.
    pub(crate) fn acquire_blocks(&self, num_blocks: usize) -> Vec<u64> {
        let mut free = self.free.lock();
        let slot = free
            .iter()
            .position(|buffer| buffer.capacity() >= num_blocks);
        match slot {
            Some(slot) => {
                let mut blocks = free.swap_remove(slot);
                blocks.resize(num_blocks, 0);
                blocks
            }
            None => vec![0; num_blocks],
        }
    }

    /// Return a block buffer to the free-list
    pub(crate) fn release_blocks(&self, mut blocks: Vec<u64>) {
        blocks.clear();
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(blocks);
        }
    }

    /// Number of buffers currently on the free-list
    pub fn free_buffers(&self) -> usize {
        self.free.lock().len()
    }
}
