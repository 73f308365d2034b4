// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Block Primitives.
//!
//! Pure offset arithmetic and bit-packing over a block's header/footer
//! word. Nothing here touches the free-list index or the heap extent —
//! see `free_list` and the parent `heap` module for that.

use core::ptr::NonNull;

use crate::rustux::errors::{AllocError, AllocResult};

/// Word / alignment unit. All offsets and sizes are multiples of `A`.
pub const A: usize = 8;

/// Floor for a block's payload: the smallest region that can also hold the
/// two free-list link words.
pub const MIN_PAYLOAD: usize = 16;

/// Smallest standalone block split is willing to carve off: header +
/// minimum payload + footer.
pub const MIN_BLOCK: usize = MIN_PAYLOAD + 2 * A;

/// Payload sizes above this fall into the large/mapping regime (bucket 7).
pub const LARGE_THRESHOLD: usize = 1024;

/// Number of size-class buckets.
pub const NUM_BUCKETS: usize = 8;

/// Upper bound of each of the seven heap buckets; bucket 7 catches anything
/// larger than the last entry.
const BUCKET_BOUNDS: [usize; NUM_BUCKETS - 1] = [16, 32, 64, 128, 256, 512, 1024];

/// Payload sizes at or above this cannot be packed into the header word's
/// size field alongside the A/M bits.
const SIZE_OVERFLOW_LIMIT: u64 = 1 << 62;

bitflags::bitflags! {
    /// The header/footer word's two flag bits. The remaining bits (the
    /// size field) aren't flags at all, so they're handled separately by
    /// `pack`/`unpack_size` rather than folded into this type.
    struct HeaderFlags: u64 {
        const ALLOCATED = 1 << 0;
        const MAPPING   = 1 << 1;
    }
}

const SIZE_MASK: u64 = !(HeaderFlags::ALLOCATED.bits() | HeaderFlags::MAPPING.bits());

/// Round a caller-requested size to the engine's internal payload size: the
/// next multiple of `A`, floored at `MIN_PAYLOAD`.
pub fn round_payload(size: usize) -> AllocResult<usize> {
    if size == 0 {
        return Err(AllocError::InvalidArgument);
    }
    let aligned = size.checked_add(A - 1).ok_or(AllocError::SizeOverflow)? & !(A - 1);
    let rounded = aligned.max(MIN_PAYLOAD);
    if rounded as u64 >= SIZE_OVERFLOW_LIMIT {
        return Err(AllocError::SizeOverflow);
    }
    Ok(rounded)
}

/// Bucket index for an already-rounded payload size: the smallest class
/// whose bound is `>=` the size, or 7 if none is.
pub fn bucket_index(payload_size: usize) -> usize {
    for (i, &bound) in BUCKET_BOUNDS.iter().enumerate() {
        if payload_size <= bound {
            return i;
        }
    }
    NUM_BUCKETS - 1
}

/// Pack a header/footer word from a payload size and its two flag bits.
pub fn pack(payload_size: usize, allocated: bool, mapping: bool) -> u64 {
    debug_assert_eq!(payload_size as u64 & !SIZE_MASK, 0, "payload size must be A-aligned");
    let mut flags = HeaderFlags::empty();
    flags.set(HeaderFlags::ALLOCATED, allocated);
    flags.set(HeaderFlags::MAPPING, mapping);
    payload_size as u64 | flags.bits()
}

pub fn unpack_size(word: u64) -> usize {
    (word & SIZE_MASK) as usize
}

pub fn unpack_allocated(word: u64) -> bool {
    HeaderFlags::from_bits_truncate(word).contains(HeaderFlags::ALLOCATED)
}

pub fn unpack_mapping(word: u64) -> bool {
    HeaderFlags::from_bits_truncate(word).contains(HeaderFlags::MAPPING)
}

/// Total bytes a heap-resident block of this payload size occupies,
/// header and footer included.
pub fn total_heap_bytes(payload_size: usize) -> usize {
    payload_size + 2 * A
}

/// Layout of the intrusive free-list links overlaid on a free block's
/// payload. Never instantiated directly — it exists to pin down
/// `next`/`prev`'s byte offsets, which `Block::free_next`/`free_prev` read
/// with raw pointer arithmetic since the payload may equally hold caller
/// data.
#[repr(C)]
struct FreeLinks {
    next: usize,
    prev: usize,
}

const FREE_LINKS_NEXT_OFFSET: usize = memoffset::offset_of!(FreeLinks, next);
const FREE_LINKS_PREV_OFFSET: usize = memoffset::offset_of!(FreeLinks, prev);

const _: () = assert!(FREE_LINKS_NEXT_OFFSET == 0);
const _: () = assert!(FREE_LINKS_PREV_OFFSET == A);

/// A view over a block's raw storage, addressed by its header.
///
/// Every accessor is `unsafe`: the validity of the memory behind the
/// pointer is an invariant the rest of the engine is responsible for
/// upholding, not something `Block` can check on its own. This is the
/// "tagged view over raw bytes" the block layout calls for — whether the
/// payload holds caller data or free-list links is read out of the A-bit,
/// not encoded in the type.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Block {
    header: NonNull<u8>,
}

impl Block {
    /// Wrap a raw header address.
    ///
    /// # Safety
    /// `header` must point at a live block header, heap-resident or
    /// mapping-resident.
    pub unsafe fn from_header(header: NonNull<u8>) -> Self {
        Self { header }
    }

    pub fn header_addr(self) -> NonNull<u8> {
        self.header
    }

    fn header_word_ptr(self) -> *mut u64 {
        self.header.as_ptr() as *mut u64
    }

    /// # Safety
    /// The header word must be initialized.
    pub unsafe fn header_word(self) -> u64 {
        core::ptr::read(self.header_word_ptr())
    }

    /// # Safety
    /// See [`Block::header_word`].
    pub unsafe fn set_header_word(self, word: u64) {
        core::ptr::write(self.header_word_ptr(), word);
    }

    /// # Safety
    /// The header word must be initialized.
    pub unsafe fn payload_size(self) -> usize {
        unpack_size(self.header_word())
    }

    /// # Safety
    /// The header word must be initialized.
    pub unsafe fn is_allocated(self) -> bool {
        unpack_allocated(self.header_word())
    }

    /// # Safety
    /// The header word must be initialized.
    pub unsafe fn is_mapping(self) -> bool {
        unpack_mapping(self.header_word())
    }

    /// # Safety
    /// The header word must be initialized.
    pub unsafe fn payload_ptr(self) -> *mut u8 {
        self.header.as_ptr().add(A)
    }

    /// Heap-resident blocks only — mapping blocks carry no footer.
    ///
    /// # Safety
    /// The header word must be initialized and describe a heap-resident
    /// block.
    unsafe fn footer_word_ptr(self) -> *mut u64 {
        self.payload_ptr().add(self.payload_size()) as *mut u64
    }

    /// # Safety
    /// See [`Block::footer_word_ptr`].
    pub unsafe fn footer_word(self) -> u64 {
        core::ptr::read(self.footer_word_ptr())
    }

    /// # Safety
    /// See [`Block::footer_word_ptr`].
    pub unsafe fn set_footer_word(self, word: u64) {
        core::ptr::write(self.footer_word_ptr(), word);
    }

    /// Write matching header and footer words for a heap-resident block.
    ///
    /// # Safety
    /// `self` must be heap-resident storage large enough for `payload_size`.
    pub unsafe fn write_heap_tags(self, payload_size: usize, allocated: bool) {
        let word = pack(payload_size, allocated, false);
        self.set_header_word(word);
        self.footer_word_ptr_for(payload_size).write(word);
    }

    /// Like [`Block::footer_word_ptr`] but computed from an explicit size,
    /// for use while writing a header whose size hasn't landed yet.
    unsafe fn footer_word_ptr_for(self, payload_size: usize) -> *mut u64 {
        self.payload_ptr().add(payload_size) as *mut u64
    }

    /// Write a mapping-resident header. No footer exists for these blocks.
    ///
    /// # Safety
    /// `self` must be mapping-resident storage large enough for
    /// `payload_size`.
    pub unsafe fn write_mapping_header(self, payload_size: usize, allocated: bool) {
        self.set_header_word(pack(payload_size, allocated, true));
    }

    /// The physically-next heap block: footer address + `A`.
    ///
    /// # Safety
    /// `self` must be heap-resident and not the last block in the heap.
    pub unsafe fn next_heap_block(self) -> Block {
        let next = self.footer_word_ptr().add(1) as *mut u8;
        Block::from_header(NonNull::new_unchecked(next))
    }

    /// # Safety
    /// The header word must be initialized and describe a heap-resident
    /// block.
    pub unsafe fn total_heap_bytes(self) -> usize {
        total_heap_bytes(self.payload_size())
    }

    /// # Safety
    /// The header word must be initialized (`payload_ptr` requires it).
    unsafe fn free_links_ptr(self) -> *mut FreeLinks {
        self.payload_ptr() as *mut FreeLinks
    }

    /// Forward free-list link, overlaid on the payload's first word.
    ///
    /// # Safety
    /// `self` must be a free block (the payload isn't caller data).
    pub unsafe fn free_next(self) -> Option<Block> {
        let ptr = (self.free_links_ptr() as *const u8).add(FREE_LINKS_NEXT_OFFSET) as *const usize;
        let raw = core::ptr::read(ptr);
        NonNull::new(raw as *mut u8).map(Block::from_header_unchecked)
    }

    /// # Safety
    /// See [`Block::free_next`].
    pub unsafe fn set_free_next(self, next: Option<Block>) {
        let raw = next.map(|b| b.header_addr().as_ptr() as usize).unwrap_or(0);
        let ptr = (self.free_links_ptr() as *mut u8).add(FREE_LINKS_NEXT_OFFSET) as *mut usize;
        core::ptr::write(ptr, raw);
    }

    /// Backward free-list link, overlaid on the payload's second word.
    ///
    /// # Safety
    /// `self` must be a free block (the payload isn't caller data).
    pub unsafe fn free_prev(self) -> Option<Block> {
        let ptr = (self.free_links_ptr() as *const u8).add(FREE_LINKS_PREV_OFFSET) as *const usize;
        let raw = core::ptr::read(ptr);
        NonNull::new(raw as *mut u8).map(Block::from_header_unchecked)
    }

    /// # Safety
    /// See [`Block::free_prev`].
    pub unsafe fn set_free_prev(self, prev: Option<Block>) {
        let raw = prev.map(|b| b.header_addr().as_ptr() as usize).unwrap_or(0);
        let ptr = (self.free_links_ptr() as *mut u8).add(FREE_LINKS_PREV_OFFSET) as *mut usize;
        core::ptr::write(ptr, raw);
    }

    /// Infallible convenience used only where the pointer is already known
    /// non-null (read back out of a link word we wrote ourselves).
    fn from_header_unchecked(header: NonNull<u8>) -> Block {
        Block { header }
    }
}
