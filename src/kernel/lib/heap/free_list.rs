// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Free-List Index.
//!
//! A fixed array of eight head pointers, one per size-class bucket. Each
//! list is intrusive and doubly-linked, threaded through the free blocks'
//! own payload bytes (see `block::Block::free_next`/`free_prev`).

use super::block::{bucket_index, Block, NUM_BUCKETS};

#[derive(Clone, Copy)]
pub struct FreeListIndex {
    heads: [Option<Block>; NUM_BUCKETS],
}

impl FreeListIndex {
    pub const fn new() -> Self {
        Self { heads: [None; NUM_BUCKETS] }
    }

    /// Push `block` at the head of the bucket its *current* payload size
    /// maps to. O(1). Insertion order within a bucket is unspecified.
    ///
    /// # Safety
    /// `block` must be a free block with a valid header word, not already
    /// linked into any bucket.
    pub unsafe fn insert(&mut self, block: Block) {
        let idx = bucket_index(block.payload_size());
        let old_head = self.heads[idx];
        block.set_free_prev(None);
        block.set_free_next(old_head);
        if let Some(head) = old_head {
            head.set_free_prev(Some(block));
        }
        self.heads[idx] = Some(block);
    }

    /// Unlink `block` from bucket `idx`, restoring the head pointer if it
    /// was the head. O(1).
    ///
    /// # Safety
    /// `block` must currently be linked into bucket `idx`.
    pub unsafe fn remove_from_bucket(&mut self, block: Block, idx: usize) {
        let prev = block.free_prev();
        let next = block.free_next();
        match prev {
            Some(p) => p.set_free_next(next),
            None => self.heads[idx] = next,
        }
        if let Some(n) = next {
            n.set_free_prev(prev);
        }
    }

    /// Unlink `block`, recomputing its bucket from its own payload size.
    ///
    /// # Safety
    /// `block` must currently be linked into the bucket its payload size
    /// maps to.
    pub unsafe fn remove(&mut self, block: Block) {
        let idx = bucket_index(block.payload_size());
        self.remove_from_bucket(block, idx);
    }

    /// Scan bucket `idx` and return the first block whose payload size is
    /// `>= req`. No reordering on a miss.
    ///
    /// # Safety
    /// Every block linked into bucket `idx` must have a valid header word.
    unsafe fn first_fit_in_bucket(&self, idx: usize, req: usize) -> Option<Block> {
        let mut cur = self.heads[idx];
        while let Some(block) = cur {
            if block.payload_size() >= req {
                return Some(block);
            }
            cur = block.free_next();
        }
        None
    }

    /// Scan buckets `start..NUM_BUCKETS` ascending, first-fit within each,
    /// returning the first hit and the bucket it was found in.
    ///
    /// # Safety
    /// See [`FreeListIndex::first_fit_in_bucket`].
    pub unsafe fn first_fit(&self, start: usize, req: usize) -> Option<(Block, usize)> {
        for idx in start..NUM_BUCKETS {
            if let Some(block) = self.first_fit_in_bucket(idx, req) {
                return Some((block, idx));
            }
        }
        None
    }

    /// Head of bucket `idx`, for diagnostics (`Heap::stats`).
    pub fn bucket_head(&self, idx: usize) -> Option<Block> {
        self.heads[idx]
    }
}
