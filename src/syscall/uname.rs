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

//! The `UNAME` system call reports fixed identifying strings about the
//! running kernel, per `sys_uname` in `original_source/kernel/syscall.c`.

use crate::{
	errno::KResult,
	kernel,
	memory::vmem::{VMem, VmProt},
	syscall::TrapFrame,
};
use core::mem::size_of;

/// Width of each field of [`Utsname`], matching POSIX's `utsname` struct.
const UTSNAME_LENGTH: usize = 65;

#[repr(C)]
struct Utsname {
	sysname: [u8; UTSNAME_LENGTH],
	nodename: [u8; UTSNAME_LENGTH],
	release: [u8; UTSNAME_LENGTH],
	version: [u8; UTSNAME_LENGTH],
	machine: [u8; UTSNAME_LENGTH],
}

/// Copies as much of `src` as fits into `dst`, NUL-padding the rest.
fn fill(dst: &mut [u8; UTSNAME_LENGTH], src: &[u8]) {
	let n = src.len().min(UTSNAME_LENGTH - 1);
	dst[..n].copy_from_slice(&src[..n]);
	dst[n..].fill(0);
}

pub fn sys_uname(vm: &VMem, tf: &TrapFrame) -> KResult<usize> {
	let va = super::arg_buf(vm, tf, 0, size_of::<Utsname>(), VmProt::WRITE)?;
	let mut utsname = Utsname {
		sysname: [0; UTSNAME_LENGTH],
		nodename: [0; UTSNAME_LENGTH],
		release: [0; UTSNAME_LENGTH],
		version: [0; UTSNAME_LENGTH],
		machine: [0; UTSNAME_LENGTH],
	};
	fill(&mut utsname.sysname, kernel::NAME.as_bytes());
	fill(&mut utsname.nodename, kernel::HOSTNAME.as_bytes());
	fill(&mut utsname.release, kernel::VERSION.as_bytes());
	fill(&mut utsname.version, b"");
	fill(&mut utsname.machine, b"armv7");
	let bytes = unsafe {
		core::slice::from_raw_parts(&utsname as *const Utsname as *const u8, size_of::<Utsname>())
	};
	vm.user_copy_out(va, bytes)?;
	Ok(0)
}
