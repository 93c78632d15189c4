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

//! A small preemptive UNIX-like kernel core for the ARMv7-A PBX-A9 platform.
//! This reference documents interfaces for modules and the kernel's
//! internals.
//!
//! The boot stub, CPU bring-up, the assembly context-switch trampoline, the
//! UART/RTC/MMC drivers and the EXT2 on-disk layout parser are external
//! collaborators reached through `extern "C"` hooks; this crate owns
//! everything above that line — virtual memory, the process model, the
//! buffer/inode/file layers, and system call dispatch.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![feature(negative_impls)]
#![deny(missing_docs)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(unsafe_op_in_unsafe_fn)]
#![test_runner(crate::selftest::runner)]
#![reexport_test_harness_main = "kernel_selftest"]

extern crate alloc;

#[macro_use]
pub mod config;
pub mod cpu;
pub mod elf;
pub mod errno;
pub mod file;
pub mod logger;
pub mod memory;
#[macro_use]
pub mod panic;
#[macro_use]
pub mod print;
pub mod process;
pub mod selftest;
pub mod sync;
pub mod syscall;

use crate::{
	file::fs,
	memory::{alloc as kalloc, buddy},
	process::{Process, scheduler},
};

/// The kernel's name, reported by `UNAME`.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version, reported by `UNAME`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// The system's fixed hostname, reported by `UNAME`.
///
/// There is no `sethostname` system call in this core (spec.md names no such
/// call), so unlike the teacher's mutable `HOSTNAME`, this is a constant.
pub const HOSTNAME: &str = "armos";

/// Device number of the root filesystem, handed to the `fs`/`file` layer as
/// an opaque handle; resolving which backing store this number maps to is
/// the disk driver's job (an external collaborator, spec.md §1).
const ROOT_DEV: u32 = 0;
/// Path to the init program, loaded as pid 1's image during boot.
const INIT_PATH: &str = "/sbin/init";

/// Brings up physical memory management, the kernel heap, and the init
/// process, then hands control to the scheduler.
///
/// Called once by the boot trampoline after the MMU and exception vectors are
/// live. Does not return: once [`scheduler::set_current`] has bound pid 1 to
/// this CPU, the trampoline's own first `context_switch` resumes it in user
/// mode.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main() -> ! {
	println!("Boot {NAME} version {VERSION}");

	println!("Setup memory management");
	buddy::init();
	kalloc::init();

	#[cfg(test)]
	kernel_selftest();

	println!("Setup init process");
	let root = fs::inode_get(ROOT_DEV, fs::ROOT_INO);
	let proc = Process::new_init(ROOT_DEV, root).expect("cannot create init process");
	let image = process::exec::exec(&proc, INIT_PATH, &[INIT_PATH.into()], &[])
		.expect("cannot load init process image");
	*proc.brk.lock() = image.brk_base.0;
	scheduler::set_current(proc);

	println!("Handing off to scheduler");
	loop {
		scheduler::schedule();
	}
}
