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

//! The `OPEN` system call resolves (and optionally creates) a path and
//! installs it in the calling process's fd table, per `sys_open` in
//! `original_source/kernel/syscall.c`.

use crate::{config, errno::KResult, file::open_file, memory::vmem::VMem, process, syscall::TrapFrame};

pub fn sys_open(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let path = super::arg_str(vm, tf, 0, config::PATH_MAX)?;
	let oflag = super::arg_int(tf, 1) as u32;
	let mode = super::arg_short(tf, 2);
	let proc = process::current();
	let cwd = proc.cwd.lock().clone();
	let file = open_file::file_open(proc.dev(), &cwd, &path, oflag, mode)?;
	let fd = proc.fd_table.lock().alloc(file)?;
	Ok(fd as usize)
}
