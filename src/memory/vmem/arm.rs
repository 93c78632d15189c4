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

//! ARMv7-A L1/L2 translation table descriptor encoding.
//!
//! Bit layouts follow `original_source/kernel/armv7.h` and
//! `original_source/kernel/mm/vm.c`: an L1 entry is either a fault (absent),
//! a 1 MiB section (unused by this core — it only ever builds two-level
//! mappings), or a page-table descriptor pointing at one of the two L2 units
//! packed into a single physical page.

use crate::memory::vmem::VmProt;

/// L1 descriptor type: absent.
pub const L1_FAULT: u32 = 0b00;
/// L1 descriptor type: coarse page table (points at an L2 table).
pub const L1_PAGE_TABLE: u32 = 0b01;

/// L2 descriptor type: absent.
pub const L2_FAULT: u32 = 0b00;
/// L2 descriptor type: small page (4 KiB), execute allowed.
pub const L2_SMALL_PAGE: u32 = 0b10;
/// L2 descriptor type: small page (4 KiB), execute never (`XN` folded into bit 0 for small
/// pages on ARMv7, matching the source).
pub const L2_SMALL_PAGE_XN: u32 = 0b11;

/// Access-permission bits occupy \[5:4\] and \[9\] (`APX`) of a small-page descriptor.
const AP_SHIFT: u32 = 4;
const APX_SHIFT: u32 = 9;

/// One of the four ARM (APX:AP) encodings. Mirrors `prot_to_ap[]` from
/// `original_source/kernel/mm/vm.c`, which spec.md §4.2 reproduces verbatim as the
/// "Permission → AP bit mapping" table.
#[derive(Clone, Copy)]
struct Ap {
	apx: u32,
	ap: u32,
}

const AP_KERNEL_RO: Ap = Ap { apx: 1, ap: 0b01 };
const AP_KERNEL_RW: Ap = Ap { apx: 0, ap: 0b01 };
const AP_USER_RO: Ap = Ap { apx: 1, ap: 0b10 };
const AP_USER_RW: Ap = Ap { apx: 0, ap: 0b11 };

/// Derives the (APX, AP) pair for a permission set, following spec.md's table:
///
/// | prot (VM_USER\|VM_READ\|VM_WRITE) | AP |
/// |---|---|
/// | 0 or READ only | kernel RO |
/// | WRITE or RW | kernel RW |
/// | USER+READ | user RO, kernel RO |
/// | USER+WRITE or USER+RW | both RW |
fn prot_to_ap(prot: VmProt) -> Ap {
	let user = prot.contains(VmProt::USER);
	let write = prot.contains(VmProt::WRITE);
	match (user, write) {
		(false, false) => AP_KERNEL_RO,
		(false, true) => AP_KERNEL_RW,
		(true, false) => AP_USER_RO,
		(true, true) => AP_USER_RW,
	}
}

/// Cacheable/bufferable bits, occupy \[3:2\].
const C_BIT: u32 = 1 << 2;
const B_BIT: u32 = 1 << 3;

/// Builds a small-page L2 descriptor for a frame at `pa` with software permission set `prot`.
pub fn encode_small_page(pa: usize, prot: VmProt) -> u32 {
	let ap = prot_to_ap(prot);
	let ty = if prot.contains(VmProt::USER) && !prot.contains(VmProt::EXEC) {
		L2_SMALL_PAGE_XN
	} else {
		L2_SMALL_PAGE
	};
	let mut desc = (pa as u32 & !0xFFF) | ty;
	desc |= ap.ap << AP_SHIFT;
	desc |= ap.apx << APX_SHIFT;
	if !prot.contains(VmProt::NOCACHE) {
		desc |= C_BIT | B_BIT;
	}
	desc
}

/// Returns the physical frame address encoded in a small-page descriptor, or `None` if the
/// descriptor is a fault entry.
pub fn decode_small_page_pa(desc: u32) -> Option<usize> {
	if desc & 0b11 == L2_FAULT {
		None
	} else {
		Some((desc & !0xFFF) as usize)
	}
}

/// Invalidates a single VA's TLB entry on the current CPU (`tlbimva`, per spec.md §5).
#[inline(always)]
pub fn tlb_invalidate(va: usize) {
	unsafe {
		core::arch::asm!(
			"mcr p15, 0, {0}, c8, c7, 1",
			in(reg) va,
			options(nomem, nostack, preserves_flags)
		);
	}
}
