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

//! The `GETPPID` system call returns the PID of the calling process's parent.
//!
//! Matching `sys_getppid` in `original_source/kernel/syscall.c`, a process
//! with no parent (only `init`, once its own parent has exited and been
//! reaped) reports its own pid.

use crate::{errno::KResult, process};

pub fn sys_getppid() -> KResult<usize> {
	let proc = process::current();
	Ok(proc.parent().unwrap_or_else(|| proc.pid()) as usize)
}
