// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Collaborator traits: raw address-space acquisition.
//!
//! The engine never talks to the OS directly. Everything it needs from the
//! outside world — growing the heap, mapping a standalone region — is
//! expressed through `Collaborator`, so `Heap<C>` stays fully unit-testable
//! and the platform-specific half lives entirely outside this crate.

use core::ptr::NonNull;

pub trait Collaborator {
    /// Reserve `bytes` more, contiguous with the previous extension.
    /// Returns the start of the new extent, or `None` on failure.
    fn extend_heap(&mut self, bytes: usize) -> Option<NonNull<u8>>;

    /// Reserve a standalone region of at least `bytes`, rounded up to a
    /// multiple of `page_size()`. Returns its start, or `None` on failure.
    fn map_pages(&mut self, bytes: usize) -> Option<NonNull<u8>>;

    /// Release exactly what a prior `map_pages` call returned.
    ///
    /// # Safety
    /// `ptr` and `bytes` must match a previous `map_pages` return value
    /// exactly.
    unsafe fn unmap_pages(&mut self, ptr: NonNull<u8>, bytes: usize);

    /// System page size. Constant over the engine's lifetime.
    fn page_size(&self) -> usize;
}
