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

//! The `LINK` system call creates a hard link, per `sys_link` in
//! `original_source/kernel/syscall.c`.

use crate::{config, errno::KResult, file::fs, memory::vmem::VMem, process, syscall::TrapFrame};

pub fn sys_link(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let oldpath = super::arg_str(vm, tf, 0, config::PATH_MAX)?;
	let newpath = super::arg_str(vm, tf, 1, config::PATH_MAX)?;
	let proc = process::current();
	let cwd = proc.cwd.lock().clone();
	let existing = fs::fs_name_lookup(proc.dev(), &cwd, &oldpath)?;
	let res = fs::fs_link(proc.dev(), &cwd, &existing, &newpath);
	fs::inode_put(existing);
	res?;
	Ok(0)
}
