// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Placement.
//!
//! Finds a free block big enough for a request, extending the heap or
//! mapping a fresh region on miss. Small/large regime selection happens
//! here: everything `<= LARGE_THRESHOLD` stays in the segregated free
//! list; everything above goes straight to the page mapper.

use core::ptr::NonNull;

use crate::rustux::errors::{AllocError, AllocResult};

use super::block::{self, Block, A, LARGE_THRESHOLD};
use super::split_coalesce;
use super::Heap;
use super::collab::Collaborator;

/// Return a free block with payload size `>= req`, already split down to
/// `req` if it came from the small/heap regime.
///
/// # Safety
/// `heap`'s free-list index and heap bounds must be internally consistent.
pub unsafe fn get_free<C: Collaborator>(heap: &mut Heap<C>, req: usize) -> AllocResult<Block> {
    if req > LARGE_THRESHOLD {
        return map_large(heap, req);
    }

    let start = block::bucket_index(req);
    if let Some((hit, _idx)) = heap.free_list.first_fit(start, req) {
        return Ok(split_coalesce::split_if_profitable(&mut heap.free_list, hit, req));
    }

    grow_heap(heap, req)?;

    let (hit, _idx) = heap
        .free_list
        .first_fit(start, req)
        .expect("heap extension always inserts a block satisfying req");
    Ok(split_coalesce::split_if_profitable(&mut heap.free_list, hit, req))
}

/// If the current heap tail is a free block, return it: the footer at
/// `heap_end - A` mirrors `split_coalesce::coalesce`'s "prev" lookup.
///
/// # Safety
/// `heap_end` must be the engine's current heap end, with a valid footer
/// immediately preceding it.
unsafe fn free_tail_block(heap_end: NonNull<u8>) -> Option<Block> {
    let footer_ptr = (heap_end.as_ptr() as *mut u64).sub(1);
    let word = core::ptr::read(footer_ptr);
    if block::unpack_allocated(word) {
        return None;
    }
    let size = block::unpack_size(word);
    let header_addr = (footer_ptr as *mut u8).sub(size + A);
    Some(Block::from_header(NonNull::new_unchecked(header_addr)))
}

/// Invoke the heap extender for `req + 2*A` bytes and install the new
/// extent as a single free block — or, if the heap's current tail block is
/// already free, absorb the new bytes into it instead of leaving two
/// adjacent free blocks (invariant 2, §3).
///
/// # Safety
/// Same as [`get_free`].
unsafe fn grow_heap<C: Collaborator>(heap: &mut Heap<C>, req: usize) -> AllocResult<()> {
    let bytes = req.checked_add(2 * A).ok_or(AllocError::SizeOverflow)?;
    let start = heap
        .collaborator
        .extend_heap(bytes)
        .ok_or(AllocError::OutOfMemory)?;

    if heap.heap_start.is_none() {
        heap.heap_start = Some(start);
    }
    let new_end_addr = start.as_ptr() as usize + bytes;

    let tail = match heap.heap_end {
        Some(end) => free_tail_block(end),
        None => None,
    };

    match tail {
        Some(tail) => {
            heap.free_list.remove(tail);
            let merged_payload = tail.payload_size() + bytes;
            tail.write_heap_tags(merged_payload, false);
            heap.free_list.insert(tail);
        }
        None => {
            let block = Block::from_header(start);
            block.write_heap_tags(req, false);
            heap.free_list.insert(block);
        }
    }

    heap.heap_end = Some(NonNull::new_unchecked(new_end_addr as *mut u8));
    Ok(())
}

/// Number of whole pages needed to host a mapping block of payload size
/// `req` (header only, no footer), for a given page size.
pub fn mapping_region_pages(req: usize, page_size: usize) -> AllocResult<usize> {
    let bytes = req.checked_add(A).ok_or(AllocError::SizeOverflow)?;
    Ok((bytes + page_size - 1) / page_size)
}

/// Invoke the page mapper for a large request and initialize its header.
/// Never inserted into a free list; `heap_start`/`heap_end` are untouched.
///
/// # Safety
/// Same as [`get_free`].
unsafe fn map_large<C: Collaborator>(heap: &mut Heap<C>, req: usize) -> AllocResult<Block> {
    let page = heap.collaborator.page_size();
    let pages = mapping_region_pages(req, page)?;
    let mapped_bytes = pages * page;
    let start = heap
        .collaborator
        .map_pages(mapped_bytes)
        .ok_or(AllocError::OutOfMemory)?;

    let block = Block::from_header(start);
    block.write_mapping_header(req, false);
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::lib::heap::collab::test_support::TestCollaborator;

    #[test]
    fn get_free_grows_heap_on_first_call() {
        let mut heap = Heap::new(TestCollaborator::new());
        let block = unsafe { get_free(&mut heap, 24).unwrap() };
        unsafe {
            assert_eq!(block.payload_size(), 24);
            assert!(!block.is_allocated());
            assert!(!block.is_mapping());
        }
        assert_eq!(heap.collaborator.extend_calls, 1);
    }

    #[test]
    fn get_free_large_request_maps_instead_of_growing_heap() {
        let mut heap = Heap::new(TestCollaborator::new());
        let block = unsafe { get_free(&mut heap, 2048).unwrap() };
        unsafe {
            assert!(block.is_mapping());
            assert_eq!(block.payload_size(), 2048);
        }
        assert_eq!(heap.collaborator.extend_calls, 0);
        assert_eq!(heap.collaborator.map_calls, 1);
        assert!(heap.heap_start.is_none());
    }

    #[test]
    fn get_free_reuses_freed_block_before_growing_again() {
        let mut heap = Heap::new(TestCollaborator::new());
        let a = unsafe { get_free(&mut heap, 16).unwrap() };
        unsafe {
            a.write_heap_tags(16, false);
            heap.free_list.insert(a);
        }

        let calls_before = heap.collaborator.extend_calls;
        let b = unsafe { get_free(&mut heap, 16).unwrap() };
        assert_eq!(b, a);
        assert_eq!(heap.collaborator.extend_calls, calls_before);
    }

    // Repro: two heap-growing allocations, release the second (leaving a
    // standalone free tail too small for the next request), then a request
    // big enough to force another heap extension right after that free
    // tail. Without merging into the tail, this produced two adjacent free
    // heap blocks (invariant 2 violation).
    #[test]
    fn grow_heap_absorbs_an_existing_free_tail_block() {
        let mut heap = Heap::new(TestCollaborator::new());
        unsafe {
            let a = get_free(&mut heap, 16).unwrap();
            a.write_heap_tags(16, true);

            let b = get_free(&mut heap, 16).unwrap();
            b.write_heap_tags(16, false);
            heap.free_list.insert(b);

            let extend_calls_before = heap.collaborator.extend_calls;
            let c = get_free(&mut heap, 64).unwrap();
            assert_eq!(heap.collaborator.extend_calls, extend_calls_before + 1);
            c.write_heap_tags(c.payload_size(), true);

            // Walk the whole heap and confirm no two adjacent free blocks
            // exist, and that the absorbed tail shows up as a single merged
            // block rather than a second, disjoint one.
            let mut cur = Block::from_header(heap.heap_start.unwrap());
            let end = heap.heap_end.unwrap();
            let mut prev_was_free = false;
            let mut free_blocks = 0usize;
            loop {
                let free = !cur.is_allocated();
                if free {
                    free_blocks += 1;
                    assert!(!prev_was_free, "two adjacent free heap blocks found");
                }
                prev_was_free = free;
                let next = cur.next_heap_block();
                if next.header_addr() == end {
                    break;
                }
                cur = next;
            }
            assert_eq!(free_blocks, 1);
        }
    }
}
