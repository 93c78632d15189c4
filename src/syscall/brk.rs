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

//! The `SBRK` system call grows or shrinks the calling process's heap, per
//! `sys_sbrk` in `original_source/kernel/syscall.c`. Returns the break's
//! value *before* the adjustment, matching the classic `sbrk(2)` contract.

use crate::{
	errno,
	errno::KResult,
	memory::{VirtAddr, vmem::{VMem, VmProt}},
	process::Process,
};
use alloc::sync::Arc;

pub fn sys_sbrk(vm: &VMem, proc: &Arc<Process>, delta: isize) -> KResult<usize> {
	let mut brk = proc.brk.lock();
	let old_brk = *brk;
	if delta > 0 {
		vm.user_alloc(
			VirtAddr(old_brk),
			delta as usize,
			VmProt::READ | VmProt::WRITE | VmProt::USER,
		)?;
		*brk = old_brk + delta as usize;
	} else if delta < 0 {
		let shrink = (-delta) as usize;
		if shrink > old_brk {
			return Err(errno!(EINVAL));
		}
		let new_brk = old_brk - shrink;
		vm.user_dealloc(VirtAddr(new_brk), shrink);
		*brk = new_brk;
	}
	Ok(old_brk)
}
