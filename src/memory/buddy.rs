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

//! Buddy-style physical page frame allocator.
//!
//! Physical RAM is managed as blocks of `2^order` contiguous frames. Free
//! blocks of each order are threaded through an intrusive free list, but
//! unlike the pointer-chasing original, the list is threaded by [`FrameId`]
//! indices into a single static `FRAMES` arena: no raw pointer ever aliases
//! the frame metadata, so the ref-count invariants in spec.md §3 ("a page is
//! either on a free list or has ref_count ≥ 1") are checkable by inspection.

use crate::{
	config,
	errno,
	errno::KResult,
	memory::PhysAddr,
	sync::spin::IntSpin,
};
use core::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
	/// Allocation flags for [`alloc_block`].
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct AllocFlags: u32 {
		/// Zero the returned frames.
		const ZERO = 0b01;
		/// Never fail (reserved for kernel-critical allocations that must panic rather than
		/// propagate ENOMEM); unused by the core but kept for parity with the source.
		const NOFAIL = 0b10;
	}
}

/// Highest supported block order (`2^MAX_ORDER` contiguous pages).
pub const MAX_ORDER: u8 = 10;

/// Number of frames physical RAM is carved into.
const NUM_FRAMES: usize = config::PHYS_TOP / config::PAGE_SIZE;

/// Sentinel meaning "no frame" in a free-list link.
const NONE: u32 = u32::MAX;

/// Opaque index into the frame arena. Two `FrameId`s are equal iff they name the same frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameId(u32);

impl FrameId {
	fn idx(self) -> usize {
		self.0 as usize
	}
}

/// Per-frame bookkeeping.
struct Frame {
	/// Reference count. `0` means the frame is on a free list.
	refcount: AtomicU32,
	/// Order of the free block this frame is the head of, if any (only meaningful while free).
	order: u8,
	/// Free-list links, valid only while `refcount == 0`.
	prev: u32,
	next: u32,
}

struct Zone {
	free_list: [u32; MAX_ORDER as usize + 1],
}

impl Zone {
	const fn new() -> Self {
		Self {
			free_list: [NONE; MAX_ORDER as usize + 1],
		}
	}
}

static ZONE: IntSpin<Zone> = IntSpin::new(Zone::new());

impl Frame {
	const fn new() -> Self {
		Self {
			refcount: AtomicU32::new(0),
			order: 0,
			prev: NONE,
			next: NONE,
		}
	}
}

// The frame arena itself lives outside the zone lock: list manipulation always happens with the
// zone lock held, but refcount increments from the VM layer (on `insert`) do not need it.
static FRAMES: [Frame; NUM_FRAMES] = [const { Frame::new() }; NUM_FRAMES];

fn frames() -> &'static [Frame] {
	&FRAMES
}

fn push_free(zone: &mut Zone, id: FrameId, order: u8) {
	let frames = frames();
	let head = zone.free_list[order as usize];
	frames[id.idx()].next = head;
	frames[id.idx()].prev = NONE;
	if head != NONE {
		// SAFETY: free-list links are only ever mutated under the zone lock.
		unsafe {
			let head_frame = &frames[head as usize] as *const Frame as *mut Frame;
			(*head_frame).prev = id.0;
		}
	}
	zone.free_list[order as usize] = id.0;
	unsafe {
		let f = &frames[id.idx()] as *const Frame as *mut Frame;
		(*f).order = order;
	}
}

fn remove_free(zone: &mut Zone, id: FrameId, order: u8) {
	let frames = frames();
	let (prev, next) = (frames[id.idx()].prev, frames[id.idx()].next);
	unsafe {
		if prev != NONE {
			(&frames[prev as usize] as *const Frame as *mut Frame).as_mut().unwrap().next = next;
		} else {
			zone.free_list[order as usize] = next;
		}
		if next != NONE {
			(&frames[next as usize] as *const Frame as *mut Frame).as_mut().unwrap().prev = prev;
		}
	}
}

fn buddy_of(id: u32, order: u8) -> u32 {
	id ^ (1 << order)
}

/// Initializes the allocator: the whole RAM range is one free block list seeded at the highest
/// order that evenly divides it, split down as needed by future allocations.
pub fn init() {
	let _ = frames();
	let mut zone = ZONE.lock();
	let mut base = 0u32;
	let mut remaining = NUM_FRAMES as u32;
	while remaining > 0 {
		let mut order = remaining.trailing_zeros().min(MAX_ORDER as u32) as u8;
		while (1u32 << order) > remaining {
			order -= 1;
		}
		push_free(&mut zone, FrameId(base), order);
		base += 1 << order;
		remaining -= 1 << order;
	}
}

/// Allocates a block of `2^order` contiguous frames.
pub fn alloc_block(order: u8, flags: AllocFlags) -> KResult<FrameId> {
	let mut zone = ZONE.lock();
	let mut cur = order;
	while cur <= MAX_ORDER && zone.free_list[cur as usize] == NONE {
		cur += 1;
	}
	if cur > MAX_ORDER {
		return Err(errno!(ENOMEM));
	}
	let id = FrameId(zone.free_list[cur as usize]);
	remove_free(&mut zone, id, cur);
	// Split down to the requested order, pushing the unused buddy halves back onto their lists.
	while cur > order {
		cur -= 1;
		let buddy = FrameId(buddy_of(id.0, cur));
		push_free(&mut zone, buddy, cur);
	}
	frames()[id.idx()].refcount.store(1, Ordering::Relaxed);
	drop(zone);
	if flags.contains(AllocFlags::ZERO) {
		unsafe {
			let kva = page2pa(id).to_virt().as_ptr::<u8>();
			core::ptr::write_bytes(kva, 0, (1usize << order) * config::PAGE_SIZE);
		}
	}
	Ok(id)
}

/// Allocates a single frame. Equivalent to `alloc_block(0, flags)`.
pub fn alloc_one(flags: AllocFlags) -> KResult<FrameId> {
	alloc_block(0, flags)
}

/// Increments a frame's reference count. The caller must already hold a reference (directly or
/// transitively through the block it belongs to).
pub fn inc_ref(id: FrameId) {
	frames()[id.idx()].refcount.fetch_add(1, Ordering::Relaxed);
}

/// Decrements a frame's reference count, returning the block back to its free list at zero.
/// The caller must hold no further references after calling this.
pub fn free_one(id: FrameId) {
	free_block(id, 0);
}

/// Decrements the reference count of a `2^order`-frame block, releasing it (and coalescing with
/// its buddy where possible) once the count reaches zero.
pub fn free_block(id: FrameId, order: u8) {
	let prev = frames()[id.idx()].refcount.fetch_sub(1, Ordering::AcqRel);
	debug_assert!(prev >= 1, "page refcount underflow");
	if prev != 1 {
		return;
	}
	let mut zone = ZONE.lock();
	let mut cur_id = id.0;
	let mut cur_order = order;
	while cur_order < MAX_ORDER {
		let buddy = buddy_of(cur_id, cur_order);
		if buddy as usize >= NUM_FRAMES {
			break;
		}
		let buddy_frame = &frames()[buddy as usize];
		if buddy_frame.refcount.load(Ordering::Relaxed) != 0 || buddy_frame.order != cur_order {
			break;
		}
		// Buddy is free at the same order: merge.
		remove_free(&mut zone, FrameId(buddy), cur_order);
		cur_id &= !(1u32 << cur_order);
		cur_order += 1;
	}
	push_free(&mut zone, FrameId(cur_id), cur_order);
}

/// Returns the current reference count of a frame.
pub fn refcount(id: FrameId) -> u32 {
	frames()[id.idx()].refcount.load(Ordering::Relaxed)
}

/// Returns the physical address of a frame's first byte.
pub fn page2pa(id: FrameId) -> PhysAddr {
	PhysAddr(id.idx() * config::PAGE_SIZE)
}

/// Returns the kernel virtual (direct-mapped) address of a frame's first byte.
pub fn page2kva(id: FrameId) -> *mut u8 {
	page2pa(id).to_virt().as_ptr()
}

/// Returns the frame containing a physical address.
pub fn pa2page(pa: PhysAddr) -> FrameId {
	FrameId((pa.0 / config::PAGE_SIZE) as u32)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn buddy_alloc_free() {
		init();
		let a = alloc_one(AllocFlags::empty()).unwrap();
		assert_eq!(refcount(a), 1);
		free_one(a);
		assert_eq!(refcount(a), 0);
	}

	#[test_case]
	fn buddy_block_order() {
		init();
		let b = alloc_block(3, AllocFlags::ZERO).unwrap();
		assert_eq!(refcount(b), 1);
		free_block(b, 3);
	}
}
