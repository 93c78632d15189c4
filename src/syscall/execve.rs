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

//! The `EXEC` system call replaces the calling process's image, per
//! `sys_execve` in `original_source/kernel/syscall.c`.
//!
//! `argv`/`envp` must be fully materialised into kernel strings out of the
//! *old* VM before [`process::exec::exec`] runs, since that call replaces the
//! VM they were read from wholesale.

use crate::{config, errno::KResult, memory::vmem::VMem, process, process::exec::ExecImage, syscall::TrapFrame};

pub fn sys_execve(vm: &VMem, tf: &TrapFrame) -> KResult<ExecImage> {
	let path = super::arg_str(vm, tf, 0, config::PATH_MAX)?;
	let argv = super::arg_args(vm, tf, 1)?;
	let envp = super::arg_args(vm, tf, 2)?;
	let proc = process::current();
	let image = process::exec::exec(&proc, &path, &argv, &envp)?;
	*proc.brk.lock() = image.brk_base.0;
	Ok(image)
}
