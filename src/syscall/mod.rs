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

//! System call dispatch (spec.md §4.7, §6).
//!
//! A system call is how userspace asks the kernel to do something on its
//! behalf. The trap entry (an out-of-scope assembly stub, spec.md §1) builds
//! a [`TrapFrame`] from the exception's saved registers and hands it to
//! [`syscall_handler`], which decodes the call number out of the `SVC`
//! opcode, validates every pointer argument against the calling process's VM,
//! and writes the result back as `r0` — negative errno on failure, matching
//! `sys_dispatch` in `original_source/kernel/syscall.c`.

mod _exit;
mod brk;
mod chdir;
mod chmod;
mod close;
mod execve;
mod fchdir;
mod fork;
mod getdents;
mod getpid;
mod getppid;
mod link;
mod mknod;
mod open;
mod read;
mod rmdir;
mod stat;
mod time;
mod umask;
mod uname;
mod unlink;
mod wait;
mod write;

use crate::{
	errno,
	errno::KResult,
	memory::{VirtAddr, vmem::{VMem, VmProt}},
	process,
};
use alloc::{string::String, vec::Vec};

/// The portion of a trapped user context the syscall layer reads arguments from and writes a
/// result into. The remaining general-purpose registers are saved and restored by the (assembly,
/// out-of-scope) trap entry/exit stub without this layer ever seeing them.
#[repr(C)]
pub struct TrapFrame {
	pub r0: u32,
	pub r1: u32,
	pub r2: u32,
	pub r3: u32,
	pub sp: u32,
	/// Return address into user code, i.e. the instruction right after the `SVC` that trapped.
	pub pc: u32,
}

/// Syscall numbers, in the order spec.md §6 lists them. Unlike the source's Linux-compatible ABI
/// numbers, these are assigned sequentially: nothing outside this kernel and its own userspace
/// needs a stable, externally-meaningful numbering.
pub const SYS_FORK: u32 = 1;
pub const SYS_EXEC: u32 = 2;
pub const SYS_WAIT: u32 = 3;
pub const SYS_EXIT: u32 = 4;
pub const SYS_GETPID: u32 = 5;
pub const SYS_GETPPID: u32 = 6;
pub const SYS_TIME: u32 = 7;
pub const SYS_OPEN: u32 = 8;
pub const SYS_CLOSE: u32 = 9;
pub const SYS_READ: u32 = 10;
pub const SYS_WRITE: u32 = 11;
pub const SYS_STAT: u32 = 12;
pub const SYS_GETDENTS: u32 = 13;
pub const SYS_CHDIR: u32 = 14;
pub const SYS_FCHDIR: u32 = 15;
pub const SYS_CHMOD: u32 = 16;
pub const SYS_UMASK: u32 = 17;
pub const SYS_MKNOD: u32 = 18;
pub const SYS_LINK: u32 = 19;
pub const SYS_UNLINK: u32 = 20;
pub const SYS_RMDIR: u32 = 21;
pub const SYS_SBRK: u32 = 22;
pub const SYS_UNAME: u32 = 23;

/// Extracts the syscall number from the `SVC` opcode the trapped instruction encoded it in (the
/// low 24 bits), per spec.md §6's "Syscall ABI".
fn sys_get_num(vm: &VMem, tf: &TrapFrame) -> KResult<u32> {
	let insn_addr = VirtAddr((tf.pc as usize).wrapping_sub(4));
	vm.check_buf(insn_addr, 4, VmProt::READ | VmProt::USER)?;
	let mut bytes = [0u8; 4];
	vm.user_copy_in(insn_addr, &mut bytes)?;
	Ok(u32::from_le_bytes(bytes) & 0x00ff_ffff)
}

/// Returns the raw value of the `n`-th syscall argument (`r0..r3`).
fn arg_raw(tf: &TrapFrame, n: usize) -> u32 {
	match n {
		0 => tf.r0,
		1 => tf.r1,
		2 => tf.r2,
		3 => tf.r3,
		_ => panic!("invalid syscall argument number: {n}"),
	}
}

/// Fetches the `n`-th argument as a plain integer. Never fails: any bit pattern in a register is
/// a valid `int`.
fn arg_int(tf: &TrapFrame, n: usize) -> i32 {
	arg_raw(tf, n) as i32
}

/// Fetches the `n`-th argument as a 16-bit value, truncating the register.
fn arg_short(tf: &TrapFrame, n: usize) -> u16 {
	arg_raw(tf, n) as u16
}

/// Fetches the `n`-th argument as a buffer pointer, validating `[ptr, ptr+len)` against `vm` with
/// the given permissions.
fn arg_buf(vm: &VMem, tf: &TrapFrame, n: usize, len: usize, want: VmProt) -> KResult<VirtAddr> {
	let va = VirtAddr(arg_raw(tf, n) as usize);
	vm.check_buf(va, len, want | VmProt::USER)?;
	Ok(va)
}

/// Fetches the `n`-th argument as a NUL-terminated path string, validated and copied into an
/// owned `String` so the caller can drop its borrow of `vm` (needed by callers that subsequently
/// replace the VM, namely `execve`).
fn arg_str(vm: &VMem, tf: &TrapFrame, n: usize, max: usize) -> KResult<String> {
	let va = VirtAddr(arg_raw(tf, n) as usize);
	let len = vm.check_str(va, max)?;
	let mut bytes = alloc::vec![0u8; len];
	vm.user_copy_in(va, &mut bytes)?;
	String::from_utf8(bytes).map_err(|_| errno!(EILSEQ))
}

/// Fetches the `n`-th argument as a file descriptor, deferring validity checks to
/// [`crate::file::fd::FdTable::get`].
fn arg_fd(tf: &TrapFrame, n: usize) -> i32 {
	arg_raw(tf, n) as i32
}

/// Fetches the `n`-th argument as a `NULL`-terminated array of string pointers (`argv`/`envp`),
/// copying each string into the kernel. Bounded at [`crate::config::MAX_ARGS`] entries and
/// [`crate::config::ARG_MAX`] bytes per entry so a hostile array can't make the kernel walk (or
/// allocate) without limit.
fn arg_args(vm: &VMem, tf: &TrapFrame, n: usize) -> KResult<Vec<String>> {
	let base = VirtAddr(arg_raw(tf, n) as usize);
	let mut out = Vec::new();
	for i in 0..crate::config::MAX_ARGS {
		let slot = base + i * 4;
		vm.check_buf(slot, 4, VmProt::READ | VmProt::USER)?;
		let mut word = [0u8; 4];
		vm.user_copy_in(slot, &mut word)?;
		let ptr = u32::from_le_bytes(word);
		if ptr == 0 {
			return Ok(out);
		}
		let str_va = VirtAddr(ptr as usize);
		let len = vm.check_str(str_va, crate::config::ARG_MAX)?;
		let mut bytes = alloc::vec![0u8; len];
		vm.user_copy_in(str_va, &mut bytes)?;
		out.push(String::from_utf8(bytes).map_err(|_| errno!(EILSEQ))?);
	}
	Err(errno!(E2BIG))
}

/// Writes a syscall's result back into `tf.r0`, encoding failure as a negative errno per spec.md
/// §7 ("syscalls never propagate errors past user mode").
fn set_result(tf: &mut TrapFrame, result: KResult<usize>) {
	tf.r0 = match result {
		Ok(val) => val as u32,
		Err(e) => (-e) as u32,
	};
}

/// Decodes and runs the syscall named by `tf`, writing its result into `tf` for the trap exit
/// stub to restore into user registers.
///
/// `execve` is special-cased: on success, it replaces `tf.pc`/`tf.sp` with the new image's entry
/// point and stack instead of writing a return value, since the calling program's own code no
/// longer exists to return into. `_exit` is special-cased because it never returns at all.
pub fn syscall_handler(tf: &mut TrapFrame) {
	let proc = process::current();
	let vm = proc.vm.get();
	let num = match sys_get_num(vm, tf) {
		Ok(num) => num,
		Err(e) => {
			tf.r0 = (-e) as u32;
			return;
		}
	};
	match num {
		SYS_FORK => set_result(tf, fork::sys_fork()),
		SYS_EXEC => match execve::sys_execve(vm, tf) {
			Ok(image) => {
				tf.pc = image.entry.0 as u32;
				tf.sp = image.user_sp.0 as u32;
				tf.r0 = 0;
			}
			Err(e) => tf.r0 = (-e) as u32,
		},
		SYS_WAIT => set_result(tf, wait::sys_wait(vm, tf)),
		SYS_EXIT => _exit::sys_exit(arg_int(tf, 0)),
		SYS_GETPID => set_result(tf, getpid::sys_getpid()),
		SYS_GETPPID => set_result(tf, getppid::sys_getppid()),
		SYS_TIME => set_result(tf, time::sys_time()),
		SYS_OPEN => set_result(tf, open::sys_open(vm, tf)),
		SYS_CLOSE => set_result(tf, close::sys_close(arg_fd(tf, 0))),
		SYS_READ => set_result(tf, read::sys_read(vm, tf)),
		SYS_WRITE => set_result(tf, write::sys_write(vm, tf)),
		SYS_STAT => set_result(tf, stat::sys_stat(vm, tf)),
		SYS_GETDENTS => set_result(tf, getdents::sys_getdents(vm, tf)),
		SYS_CHDIR => set_result(tf, chdir::sys_chdir(vm, tf)),
		SYS_FCHDIR => set_result(tf, fchdir::sys_fchdir(arg_fd(tf, 0))),
		SYS_CHMOD => set_result(tf, chmod::sys_chmod(vm, tf)),
		SYS_UMASK => set_result(tf, umask::sys_umask(arg_short(tf, 0))),
		SYS_MKNOD => set_result(tf, mknod::sys_mknod(vm, tf)),
		SYS_LINK => set_result(tf, link::sys_link(vm, tf)),
		SYS_UNLINK => set_result(tf, unlink::sys_unlink(vm, tf)),
		SYS_RMDIR => set_result(tf, rmdir::sys_rmdir(vm, tf)),
		SYS_SBRK => set_result(tf, brk::sys_sbrk(vm, &proc, arg_int(tf, 0) as isize)),
		SYS_UNAME => set_result(tf, uname::sys_uname(vm, tf)),
		_ => tf.r0 = (-errno::ENOSYS) as u32,
	}
}
