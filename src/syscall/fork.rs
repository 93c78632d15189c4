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

//! The `FORK` system call duplicates the calling process (spec.md §4.6, §6).
//!
//! The differing return value seen by parent (child pid) versus child (0) is
//! produced by the duplicated kernel stack/trap frame the (out-of-scope) fork
//! trampoline builds for the child, not by this function: `process_copy` only
//! registers the new process and hands back its pid to the parent's own
//! trap frame.

use crate::{errno::KResult, process};

pub fn sys_fork() -> KResult<usize> {
	let parent = process::current();
	let child_pid = process::process_copy(&parent)?;
	Ok(child_pid as usize)
}
