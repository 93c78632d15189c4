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

//! The `STAT` system call fills a [`Stat`](crate::file::open_file::Stat)
//! structure describing an already-open file, per `sys_fstat` in
//! `original_source/kernel/syscall.c`.

use crate::{
	errno::KResult,
	file::open_file::Stat,
	memory::vmem::{VMem, VmProt},
	process,
	syscall::TrapFrame,
};
use core::mem::size_of;

pub fn sys_stat(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let fd = super::arg_fd(tf, 0);
	let va = super::arg_buf(vm, tf, 1, size_of::<Stat>(), VmProt::WRITE)?;
	let file = process::current().fd_table.lock().get(fd)?;
	let stat = file.stat()?;
	let bytes = unsafe {
		core::slice::from_raw_parts(&stat as *const Stat as *const u8, size_of::<Stat>())
	};
	vm.user_copy_out(va, bytes)?;
	Ok(0)
}
