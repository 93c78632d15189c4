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

//! The `GETDENTS` system call copies raw on-disk directory entries into a
//! user buffer, per `sys_getdents` in `original_source/kernel/syscall.c`.
//! Entries are handed to userspace in the same layout EXT2 stores them on
//! disk (see `RawDirent` in `file::fs`); userspace walks `rec_len` itself.
//!
//! Validated with [`VmProt::WRITE`] like `read`, for the same reason: the
//! kernel writes into this buffer, it does not read from it.

use crate::{
	errno,
	errno::KResult,
	file::open_file::FileVariant,
	memory::vmem::{VMem, VmProt},
	process,
	syscall::TrapFrame,
};
use alloc::vec;

pub fn sys_getdents(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let fd = super::arg_fd(tf, 0);
	let count = super::arg_int(tf, 2) as usize;
	if count == 0 {
		return Ok(0);
	}
	let va = super::arg_buf(vm, tf, 1, count, VmProt::WRITE)?;
	let file = process::current().fd_table.lock().get(fd)?;
	if !matches!(file.variant, FileVariant::Directory(_)) {
		return Err(errno!(ENOTDIR));
	}
	let mut buf = vec![0u8; count];
	let len = file.read(&mut buf)?;
	vm.user_copy_out(va, &buf[..len])?;
	Ok(len)
}
