/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The kernel heap: everything above the page-frame allocator (`Vec`,
//! `BTreeMap`, `Arc`, ...) that the inode cache, process table and VM clone
//! paths need goes through here.
//!
//! `linked_list_allocator` supplies the free-list bookkeeping; the backing
//! memory is a run of frames carved out of the buddy allocator at boot.

use crate::memory::buddy::{self, AllocFlags};
use linked_list_allocator::LockedHeap;

/// Number of `2^HEAP_ORDER` contiguous frames reserved for the kernel heap.
const HEAP_ORDER: u8 = 8;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Reserves a block of physical frames and hands it to the global allocator. Must be called once,
/// after `buddy::init`, before any `alloc`-crate container is used.
pub fn init() {
	let block = buddy::alloc_block(HEAP_ORDER, AllocFlags::ZERO)
		.expect("not enough memory to reserve the kernel heap");
	let base = buddy::page2kva(block);
	let size = (1usize << HEAP_ORDER) * crate::config::PAGE_SIZE;
	unsafe {
		ALLOCATOR.lock().init(base, size);
	}
}
