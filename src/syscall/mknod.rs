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

//! The `MKNOD` system call creates a filesystem node, per `sys_mknod` in
//! `original_source/kernel/syscall.c`.
//!
//! `dev` is taken as a 16-bit value (`arg_short`), matching the original's
//! narrower device-number width rather than Linux's packed 64-bit `dev_t`.

use crate::{config, errno::KResult, file::fs, memory::vmem::VMem, process, syscall::TrapFrame};

pub fn sys_mknod(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let path = super::arg_str(vm, tf, 0, config::PATH_MAX)?;
	let mode = super::arg_short(tf, 1);
	let dev = super::arg_short(tf, 2);
	let proc = process::current();
	let cwd = proc.cwd.lock().clone();
	let inode = fs::fs_create(proc.dev(), &cwd, &path, mode, dev as u32)?;
	fs::inode_put(inode);
	Ok(0)
}
