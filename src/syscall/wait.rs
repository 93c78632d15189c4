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

//! The `WAIT` system call blocks until some child has exited, per `sys_wait`
//! in `original_source/kernel/syscall.c`. Unlike Linux's `waitpid`, a process
//! always waits on its first exiting child — there is no pid-filtering or
//! `WNOHANG` here (spec.md's process model has no process groups).

use crate::{
	errno::KResult,
	memory::vmem::{VMem, VmProt},
	process,
	syscall::TrapFrame,
};

pub fn sys_wait(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let raw = super::arg_raw(tf, 0);
	let status_va = if raw != 0 {
		Some(super::arg_buf(vm, tf, 0, 4, VmProt::WRITE)?)
	} else {
		None
	};
	let proc = process::current();
	let (pid, status) = process::process_wait(&proc)?;
	if let Some(va) = status_va {
		vm.user_copy_out(va, &status.to_le_bytes())?;
	}
	Ok(pid as usize)
}
