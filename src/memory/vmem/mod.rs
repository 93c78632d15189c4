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

//! Per-process virtual memory: the ARMv7-A two-level translation table and
//! the user-space mapping operations built on top of it (spec.md §4.2).
//!
//! Each [`VMem`] owns the *user* half of an address space: an 8 KiB L1 table
//! covering VAs `0..KERNEL_BASE` (2048 slots, one 1 MiB section each). The
//! kernel half is never represented here — it is the direct physical map and
//! is identical in every address space, so no address ≥ `KERNEL_BASE` is ever
//! looked up through a `VMem`.
//!
//! L2 tables are allocated lazily, two per physical frame: one frame backs
//! an adjacent pair of L1 slots, split into two units of `L2_TABLE_SIZE`
//! descriptors followed by `L2_TABLE_SIZE` software permission words each —
//! matching `vm_walk_trtab` in `original_source/kernel/mm/vm.c`, which packs
//! the same pair the same way to keep the per-process L2 footprint at one
//! page per 2 MiB of sparsely populated address space instead of one page
//! per 1 MiB.

mod arm;

use crate::{
	config,
	errno,
	errno::KResult,
	file::fs::Inode,
	memory::{buddy, buddy::{AllocFlags, FrameId}, PhysAddr, VirtAddr},
};
use alloc::vec::Vec;

bitflags::bitflags! {
	/// Software permission bits for a single mapped page. Only [`VmProt::READ`],
	/// [`VmProt::WRITE`] and [`VmProt::EXEC`] have ARM descriptor encodings (via
	/// `arm::encode_small_page`); [`VmProt::COW`] and [`VmProt::NOCACHE`] are pure software state
	/// consulted by [`VMem::check_buf`] and the descriptor encoder respectively.
	#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
	pub struct VmProt: u32 {
		const READ = 0b000001;
		const WRITE = 0b000010;
		const EXEC = 0b000100;
		/// Mapping is reachable from user mode (`EL0`/unprivileged ARM mode).
		const USER = 0b001000;
		/// Mapping is shared copy-on-write; a write fault against it must copy before proceeding.
		const COW = 0b010000;
		/// Mapping bypasses the cache (device/MMIO memory).
		const NOCACHE = 0b100000;
	}
}

/// One physical page holding a pair of L2 units (descriptors + permission bits) for two adjacent
/// L1 slots, as packed by `vm_walk_trtab`.
struct L2Pair {
	frame: FrameId,
}

impl L2Pair {
	/// Layout within the backing 4 KiB frame: each unit is `L2_TABLE_SIZE` descriptors followed
	/// by `L2_TABLE_SIZE` permission words, two units per frame.
	const UNIT_SIZE: usize = config::L2_TABLE_SIZE + config::L2_TABLE_SIZE;

	fn descriptors(&self, slot_parity: usize) -> *mut u32 {
		let base = buddy::page2kva(self.frame) as usize;
		(base + slot_parity * Self::UNIT_SIZE) as *mut u32
	}

	fn perms(&self, slot_parity: usize) -> *mut u32 {
		let base = buddy::page2kva(self.frame) as usize;
		(base + slot_parity * Self::UNIT_SIZE + config::L2_TABLE_SIZE) as *mut u32
	}
}

/// A process's user address space: the L1 table plus bookkeeping needed to free every L2 page
/// it owns on [`VMem::destroy`].
pub struct VMem {
	/// Frames backing the 8 KiB user-half L1 table (two 4 KiB frames, covering slots
	/// `0..2048` and `2048..4096` of the conceptual full 4096-slot table, sliced in half).
	l1_frames: [FrameId; 2],
}

fn l1_index(va: VirtAddr) -> usize {
	*va >> 20
}

fn l2_index(va: VirtAddr) -> usize {
	(*va >> 12) & (config::L2_NR_ENTRIES - 1)
}

impl VMem {
	/// Creates a fresh, empty address space.
	pub fn new() -> KResult<Self> {
		let a = buddy::alloc_block(0, AllocFlags::ZERO)?;
		let b = match buddy::alloc_block(0, AllocFlags::ZERO) {
			Ok(b) => b,
			Err(e) => {
				buddy::free_one(a);
				return Err(e);
			}
		};
		Ok(Self {
			l1_frames: [a, b],
		})
	}

	fn l1_entry_ptr(&self, l1: usize) -> *mut u32 {
		let half = config::L1_NR_ENTRIES / 2;
		let frame = self.l1_frames[l1 / half];
		let slot_in_frame = l1 % half;
		let base = buddy::page2kva(frame) as usize;
		(base + slot_in_frame * 4) as *mut u32
	}

	/// Reads the raw L1 descriptor at `l1`.
	fn l1_read(&self, l1: usize) -> u32 {
		unsafe { self.l1_entry_ptr(l1).read_volatile() }
	}

	fn l1_write(&self, l1: usize, desc: u32) {
		unsafe { self.l1_entry_ptr(l1).write_volatile(desc) }
	}

	/// Locates (allocating, if requested) the L2 unit covering `va`'s 1 MiB region and returns
	/// pointers to its descriptor and permission words for `va`'s page.
	fn walk(&self, va: VirtAddr, alloc: bool) -> KResult<Option<(*mut u32, *mut u32)>> {
		let l1 = l1_index(va);
		let pair_base = l1 & !1;
		let parity = l1 & 1;
		let desc = self.l1_read(pair_base);
		let pair = if desc & 0b11 == arm::L1_PAGE_TABLE {
			L2Pair {
				frame: buddy::pa2page(PhysAddr((desc & !0xFFF) as usize)),
			}
		} else if alloc {
			let frame = buddy::alloc_block(0, AllocFlags::ZERO)?;
			let base_desc = (*buddy::page2pa(frame) as u32 & !0xFFF) | arm::L1_PAGE_TABLE;
			self.l1_write(pair_base, base_desc);
			self.l1_write(pair_base + 1, base_desc);
			L2Pair { frame }
		} else {
			return Ok(None);
		};
		Ok(Some((pair.descriptors(parity), pair.perms(parity))))
	}

	fn l2_ptrs(&self, va: VirtAddr, alloc: bool) -> KResult<Option<(*mut u32, *mut u32)>> {
		let idx = l2_index(va);
		Ok(match self.walk(va, alloc)? {
			Some((desc, perm)) => Some((unsafe { desc.add(idx) }, unsafe { perm.add(idx) })),
			None => None,
		})
	}

	/// Maps `page` at `va` with permission `prot`, replacing any existing mapping.
	pub fn insert(&self, va: VirtAddr, page: FrameId, prot: VmProt) -> KResult<()> {
		let (desc_ptr, perm_ptr) = self.l2_ptrs(va, true)?.unwrap();
		unsafe {
			if desc_ptr.read_volatile() & 0b11 != arm::L2_FAULT {
				let old_pa = arm::decode_small_page_pa(desc_ptr.read_volatile()).unwrap();
				buddy::free_one(buddy::pa2page(PhysAddr(old_pa)));
			}
			desc_ptr.write_volatile(arm::encode_small_page(*buddy::page2pa(page), prot));
			perm_ptr.write_volatile(prot.bits());
		}
		buddy::inc_ref(page);
		arm::tlb_invalidate(*va);
		Ok(())
	}

	/// Removes the mapping at `va`, if any, dropping the underlying frame's reference.
	pub fn remove(&self, va: VirtAddr) {
		let Ok(Some((desc_ptr, perm_ptr))) = self.l2_ptrs(va, false) else {
			return;
		};
		unsafe {
			if let Some(pa) = arm::decode_small_page_pa(desc_ptr.read_volatile()) {
				buddy::free_one(buddy::pa2page(PhysAddr(pa)));
			}
			desc_ptr.write_volatile(0);
			perm_ptr.write_volatile(0);
		}
		arm::tlb_invalidate(*va);
	}

	/// Returns the frame and permission bits mapped at `va`, if any.
	pub fn lookup(&self, va: VirtAddr) -> Option<(FrameId, VmProt)> {
		let (desc_ptr, perm_ptr) = self.l2_ptrs(va, false).ok().flatten()?;
		unsafe {
			let pa = arm::decode_small_page_pa(desc_ptr.read_volatile())?;
			let prot = VmProt::from_bits_truncate(perm_ptr.read_volatile());
			Some((buddy::pa2page(PhysAddr(pa)), prot))
		}
	}

	/// Allocates and maps `n` bytes starting at `va` (rounded to page boundaries) with `prot`.
	/// Rolls back every page it mapped on failure, per spec.md's "no partial mapping survives a
	/// failed `sbrk`/`exec` allocation" invariant.
	pub fn user_alloc(&self, va: VirtAddr, n: usize, prot: VmProt) -> KResult<()> {
		if !va.is_user() || !(va + n).is_user() {
			return Err(errno!(EFAULT));
		}
		let mut mapped = Vec::new();
		let base = *va.down_align_to(config::PAGE_SIZE);
		let end = *(va + n).align_to(config::PAGE_SIZE);
		let mut addr = base;
		let result: KResult<()> = (|| {
			while addr < end {
				let frame = buddy::alloc_block(0, AllocFlags::ZERO)?;
				if let Err(e) = self.insert(VirtAddr(addr), frame, prot) {
					buddy::free_one(frame);
					return Err(e);
				}
				mapped.push(addr);
				addr += config::PAGE_SIZE;
			}
			Ok(())
		})();
		if result.is_err() {
			for addr in mapped {
				self.remove(VirtAddr(addr));
			}
		}
		result
	}

	/// Unmaps `n` bytes starting at `va`. Pages that are already absent are skipped, including
	/// whole unmapped 1 MiB ranges (no L2 unit is allocated just to find nothing in it).
	pub fn user_dealloc(&self, va: VirtAddr, n: usize) {
		let base = *va.down_align_to(config::PAGE_SIZE);
		let end = *(va + n).align_to(config::PAGE_SIZE);
		let mut addr = base;
		while addr < end {
			let l1 = l1_index(VirtAddr(addr));
			if self.l1_read(l1 & !1) & 0b11 != arm::L1_PAGE_TABLE {
				addr = (l1 + 1) << 20;
				continue;
			}
			self.remove(VirtAddr(addr));
			addr += config::PAGE_SIZE;
		}
	}

	/// Copies `src` into user memory starting at `va`.
	pub fn user_copy_out(&self, va: VirtAddr, src: &[u8]) -> KResult<()> {
		let mut addr = *va;
		let mut off = 0usize;
		while off < src.len() {
			let (frame, prot) = self.lookup(VirtAddr(addr)).ok_or_else(|| errno!(EFAULT))?;
			if !prot.contains(VmProt::WRITE) {
				return Err(errno!(EFAULT));
			}
			let page_off = addr & (config::PAGE_SIZE - 1);
			let chunk = (config::PAGE_SIZE - page_off).min(src.len() - off);
			unsafe {
				let dst = buddy::page2kva(frame).add(page_off);
				core::ptr::copy_nonoverlapping(src.as_ptr().add(off), dst, chunk);
			}
			addr += chunk;
			off += chunk;
		}
		Ok(())
	}

	/// Copies `dst.len()` bytes from user memory at `va` into kernel memory at `dst`.
	///
	/// Chunked by *source* (`va`) page offset, not destination offset: the C original chunked by
	/// destination offset, which under-read (or over-read past the page boundary) whenever `va`
	/// and `dst` straddled page boundaries at different points. Only the source address is the
	/// one actually crossing translation-table boundaries, so it is the one that must drive
	/// chunk sizing.
	pub fn user_copy_in(&self, va: VirtAddr, dst: &mut [u8]) -> KResult<()> {
		let mut addr = *va;
		let mut off = 0usize;
		while off < dst.len() {
			let (frame, prot) = self.lookup(VirtAddr(addr)).ok_or_else(|| errno!(EFAULT))?;
			if !prot.contains(VmProt::READ) {
				return Err(errno!(EFAULT));
			}
			let page_off = addr & (config::PAGE_SIZE - 1);
			let chunk = (config::PAGE_SIZE - page_off).min(dst.len() - off);
			unsafe {
				let src = buddy::page2kva(frame).add(page_off);
				core::ptr::copy_nonoverlapping(src, dst.as_mut_ptr().add(off), chunk);
			}
			addr += chunk;
			off += chunk;
		}
		Ok(())
	}

	/// Validates that `[va, va+n)` is entirely mapped with at least `want`, performing an eager
	/// copy-on-write break for any page that is mapped COW but `want` includes `VM_WRITE`.
	pub fn check_buf(&self, va: VirtAddr, n: usize, want: VmProt) -> KResult<()> {
		if !va.is_user() || !(va + n).is_user() {
			return Err(errno!(EFAULT));
		}
		let base = *va.down_align_to(config::PAGE_SIZE);
		let end = *(va + n).align_to(config::PAGE_SIZE);
		let mut addr = base;
		while addr < end {
			let target = VirtAddr(addr);
			let (frame, prot) = self.lookup(target).ok_or_else(|| errno!(EFAULT))?;
			if want.contains(VmProt::WRITE) && prot.contains(VmProt::COW) {
				self.break_cow(target, frame, prot)?;
			} else if !prot.contains(want & (VmProt::READ | VmProt::WRITE | VmProt::EXEC)) {
				return Err(errno!(EFAULT));
			}
			addr += config::PAGE_SIZE;
		}
		Ok(())
	}

	/// Validates that the NUL-terminated string starting at `va` is entirely readable, returning
	/// its length (excluding the terminator) once the NUL is found.
	pub fn check_str(&self, va: VirtAddr, max: usize) -> KResult<usize> {
		let mut addr = *va;
		let mut len = 0usize;
		while len < max {
			let (frame, prot) = self.lookup(VirtAddr(addr)).ok_or_else(|| errno!(EFAULT))?;
			if !prot.contains(VmProt::READ) {
				return Err(errno!(EFAULT));
			}
			let page_off = addr & (config::PAGE_SIZE - 1);
			let to_scan = (config::PAGE_SIZE - page_off).min(max - len);
			unsafe {
				let base = buddy::page2kva(frame).add(page_off);
				for i in 0..to_scan {
					if base.add(i).read() == 0 {
						return Ok(len + i);
					}
				}
			}
			addr += to_scan;
			len += to_scan;
		}
		Err(errno!(ENAMETOOLONG))
	}

	/// Breaks copy-on-write sharing for the page mapped at `va`, giving the caller a private
	/// writable copy.
	fn break_cow(&self, va: VirtAddr, frame: FrameId, prot: VmProt) -> KResult<()> {
		if buddy::refcount(frame) == 1 {
			let new_prot = (prot | VmProt::WRITE) - VmProt::COW;
			self.reinsert_same_frame(va, frame, new_prot);
			return Ok(());
		}
		let new_frame = buddy::alloc_one(AllocFlags::empty())?;
		unsafe {
			core::ptr::copy_nonoverlapping(
				buddy::page2kva(frame),
				buddy::page2kva(new_frame),
				config::PAGE_SIZE,
			);
		}
		let new_prot = (prot | VmProt::WRITE) - VmProt::COW;
		if let Err(e) = self.insert(va, new_frame, new_prot) {
			buddy::free_one(new_frame);
			return Err(e);
		}
		Ok(())
	}

	/// Reads `n` bytes from `inode` at file offset `off` directly into the user pages mapped at
	/// `va` (used by `execve` to bring in `PT_LOAD` segments).
	pub fn user_load(&self, va: VirtAddr, n: usize, inode: &Inode, off: u64) -> KResult<()> {
		let mut addr = *va;
		let mut remaining = n;
		let mut file_off = off;
		while remaining > 0 {
			let (frame, prot) = self.lookup(VirtAddr(addr)).ok_or_else(|| errno!(EFAULT))?;
			if !prot.contains(VmProt::WRITE) {
				return Err(errno!(EFAULT));
			}
			let page_off = addr & (config::PAGE_SIZE - 1);
			let chunk = (config::PAGE_SIZE - page_off).min(remaining);
			let buf = unsafe {
				core::slice::from_raw_parts_mut(buddy::page2kva(frame).add(page_off), chunk)
			};
			inode.read(file_off, buf)?;
			addr += chunk;
			remaining -= chunk;
			file_off += chunk as u64;
		}
		Ok(())
	}

	/// Duplicates this address space for `fork`: writable pages become copy-on-write in both the
	/// parent and the child, sharing the same frame with one more reference; non-writable pages
	/// are simply re-mapped into the child with no copy needed.
	pub fn clone(&self) -> KResult<Self> {
		let child = Self::new()?;
		for l1 in 0..config::L1_NR_ENTRIES {
			if self.l1_read(l1 & !1) & 0b11 != arm::L1_PAGE_TABLE {
				continue;
			}
			for l2 in 0..config::L2_NR_ENTRIES {
				let va = VirtAddr((l1 << 20) | (l2 << 12));
				let Some((frame, prot)) = self.lookup(va) else {
					continue;
				};
				if prot.contains(VmProt::WRITE) {
					let cow_prot = (prot | VmProt::COW) - VmProt::WRITE;
					self.reinsert_same_frame(va, frame, cow_prot);
					buddy::inc_ref(frame);
					child.insert_existing(va, frame, cow_prot);
				} else {
					child.insert(va, frame, prot)?;
				}
			}
		}
		Ok(child)
	}

	/// Rewrites the permission bits of an existing mapping in place without touching the
	/// underlying frame's reference count (used when the frame is not being replaced, only
	/// reprotected).
	fn reinsert_same_frame(&self, va: VirtAddr, frame: FrameId, prot: VmProt) {
		let (desc_ptr, perm_ptr) = self.l2_ptrs(va, true).unwrap().unwrap();
		unsafe {
			desc_ptr.write_volatile(arm::encode_small_page(*buddy::page2pa(frame), prot));
			perm_ptr.write_volatile(prot.bits());
		}
		arm::tlb_invalidate(*va);
	}

	/// Installs a mapping for a frame whose reference count the caller has already bumped
	/// (used by [`clone`] to avoid double-counting the reference `insert` would otherwise add).
	fn insert_existing(&self, va: VirtAddr, frame: FrameId, prot: VmProt) {
		let (desc_ptr, perm_ptr) = self.l2_ptrs(va, true).unwrap().unwrap();
		unsafe {
			desc_ptr.write_volatile(arm::encode_small_page(*buddy::page2pa(frame), prot));
			perm_ptr.write_volatile(prot.bits());
		}
	}

	/// Tears down every user mapping and frees the L1 table itself. Called once, when the owning
	/// process is reaped.
	pub fn destroy(&self) {
		self.user_dealloc(VirtAddr(0), config::KERNEL_BASE);
		// Free the L2 pair frame behind every user-half section that still has one: `user_dealloc`
		// only unmaps leaf pages, it never reclaims the L2 table itself (spec.md §3, vm_destroy
		// "releases ... all L2 tables").
		let user_half = config::L1_NR_ENTRIES / 2;
		for pair_base in (0..user_half).step_by(2) {
			let desc = self.l1_read(pair_base);
			if desc & 0b11 == arm::L1_PAGE_TABLE {
				let frame = buddy::pa2page(PhysAddr((desc & !0xFFF) as usize));
				buddy::free_one(frame);
			}
		}
		buddy::free_one(self.l1_frames[0]);
		buddy::free_one(self.l1_frames[1]);
	}
}

unsafe impl Send for VMem {}
unsafe impl Sync for VMem {}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn map_unmap_roundtrip() {
		buddy::init();
		let vm = VMem::new().unwrap();
		let va = VirtAddr(0x1000);
		let frame = buddy::alloc_one(AllocFlags::ZERO).unwrap();
		vm.insert(va, frame, VmProt::READ | VmProt::WRITE | VmProt::USER)
			.unwrap();
		assert!(vm.lookup(va).is_some());
		vm.remove(va);
		assert!(vm.lookup(va).is_none());
	}

	#[test_case]
	fn cow_clone_shares_then_breaks() {
		buddy::init();
		let vm = VMem::new().unwrap();
		let va = VirtAddr(0x2000);
		vm.user_alloc(va, config::PAGE_SIZE, VmProt::READ | VmProt::WRITE | VmProt::USER)
			.unwrap();
		let (frame, _) = vm.lookup(va).unwrap();
		let child = vm.clone().unwrap();
		let (_, parent_prot) = vm.lookup(va).unwrap();
		assert!(parent_prot.contains(VmProt::COW));
		assert_eq!(buddy::refcount(frame), 2);
		vm.check_buf(va, 1, VmProt::WRITE).unwrap();
		let (_, parent_prot_after) = vm.lookup(va).unwrap();
		assert!(!parent_prot_after.contains(VmProt::COW));
		child.destroy();
	}
}
