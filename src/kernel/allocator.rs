// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Heap Allocator
//!
//! `LockedHeap` wraps the engine's `Heap<C>` behind a `spin::Mutex` so it
//! can serve as `#[global_allocator]` — the "thin locking wrapper" the
//! engine's design leaves to its caller. The lock is the only addition;
//! all allocator logic lives in `kernel::lib::heap`.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use spin::Mutex;

use crate::kernel::lib::heap::{Collaborator, Heap, HeapStats};

pub struct LockedHeap<C: Collaborator> {
    inner: Mutex<Heap<C>>,
}

impl<C: Collaborator> LockedHeap<C> {
    pub const fn new(collaborator: C) -> Self {
        Self { inner: Mutex::new(Heap::new(collaborator)) }
    }

    /// Snapshot of current heap occupancy; see `Heap::stats`.
    pub fn stats(&self) -> HeapStats {
        self.inner.lock().stats()
    }
}

// SAFETY: layout.align() beyond the engine's fixed 8-byte word alignment is
// not honored (see spec Non-goals); callers requesting over-aligned types
// through this allocator would need a dedicated arena, which is out of
// scope here.
unsafe impl<C: Collaborator + Send> GlobalAlloc for LockedHeap<C> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner
            .lock()
            .allocate(layout.size())
            .map(|p| p.as_ptr())
            .unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(p) = NonNull::new(ptr) {
            let _ = self.inner.lock().release(p);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
        let p = NonNull::new(ptr);
        self.inner
            .lock()
            .reallocate(p, new_size)
            .ok()
            .flatten()
            .map(|p| p.as_ptr())
            .unwrap_or(core::ptr::null_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::lib::heap::collab::test_support::TestCollaborator;
    use core::alloc::Layout;

    #[test]
    fn global_alloc_roundtrip() {
        let heap: LockedHeap<TestCollaborator> = LockedHeap::new(TestCollaborator::new());
        let layout = Layout::from_size_align(64, 8).unwrap();
        unsafe {
            let ptr = heap.alloc(layout);
            assert!(!ptr.is_null());
            core::ptr::write_bytes(ptr, 0x11, 64);
            heap.dealloc(ptr, layout);
        }
    }

    #[test]
    fn stats_reflects_allocation_and_release() {
        let heap: LockedHeap<TestCollaborator> = LockedHeap::new(TestCollaborator::new());
        let layout = Layout::from_size_align(128, 8).unwrap();
        unsafe {
            let ptr = heap.alloc(layout);
            assert!(!ptr.is_null());
            heap.dealloc(ptr, layout);
        }
        let stats = heap.stats();
        assert!(stats.free_bytes > 0);
    }
}
