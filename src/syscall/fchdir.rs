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

//! The `FCHDIR` system call changes the current working directory to an
//! already-open directory descriptor, per `sys_fchdir` in
//! `original_source/kernel/syscall.c`.

use crate::{errno, errno::KResult, file::{fs, open_file::FileVariant}, process};

pub fn sys_fchdir(fd: i32) -> KResult<usize> {
	let proc = process::current();
	let file = proc.fd_table.lock().get(fd)?;
	let FileVariant::Directory(inode) = &file.variant else {
		return Err(errno!(ENOTDIR));
	};
	let new_cwd = inode.clone();
	let old_cwd = core::mem::replace(&mut *proc.cwd.lock(), new_cwd);
	fs::inode_put(old_cwd);
	Ok(0)
}
