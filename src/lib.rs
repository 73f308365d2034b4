// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux segregated free-list heap allocator engine.
//!
//! `kernel::lib::heap` is the engine itself (`Heap<C>` and its five
//! cooperating components); `kernel::allocator` wraps it behind a lock for
//! use as a `#[global_allocator]`.

#![no_std]
#![cfg_attr(not(test), allow(dead_code))]

pub mod bits;
pub mod kernel;
pub mod rustux;
