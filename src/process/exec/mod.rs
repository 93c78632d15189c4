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

//! Image replacement (spec.md §4.6): open the ELF inode, validate the header,
//! build a fresh address space from its `PT_LOAD` segments, and hand back the
//! entry point and initial stack pointer for the trap frame the syscall
//! dispatcher restarts into.
//!
//! `argv`/`envp` arrive already materialised into kernel strings: the syscall
//! handler reads them out of the *old* VM (via `check_str`/`user_copy_in`)
//! before calling [`exec`], matching spec.md's "materialised from the
//! caller's address space before switching VMs".

use crate::{
	elf,
	elf::{Elf32ProgramHeader, PF_R, PF_W, PF_X, PT_LOAD},
	errno,
	errno::KResult,
	file::fs,
	memory::{VirtAddr, vmem::{VMem, VmProt}},
	process::Process,
};
use alloc::{string::String, sync::Arc, vec::Vec};

/// Where the exec'd program resumes: the trap frame the syscall dispatcher restores into.
pub struct ExecImage {
	pub entry: VirtAddr,
	pub user_sp: VirtAddr,
	/// First address past every `PT_LOAD` segment, page-aligned: where `SBRK` starts growing the
	/// heap from. Computed from the segments actually loaded rather than fixed, so a binary with a
	/// large BSS never collides with its own break region.
	pub brk_base: VirtAddr,
}

fn perm_from_flags(flags: u32) -> VmProt {
	let mut prot = VmProt::USER;
	if flags & PF_R != 0 {
		prot |= VmProt::READ;
	}
	if flags & PF_W != 0 {
		prot |= VmProt::WRITE;
	}
	if flags & PF_X != 0 {
		prot |= VmProt::EXEC;
	}
	prot
}

/// Writes a little-endian `u32` at byte offset `off` of `buf`.
fn put_u32(buf: &mut [u8], off: usize, val: u32) {
	buf[off..off + 4].copy_from_slice(&val.to_le_bytes());
}

/// Lays out one page's worth of stack image: strings grown down from the top, then the argv/envp
/// pointer tables, then `argc`, matching the standard ARM EABI process-entry stack shape. Returns
/// the page image and the byte offset of `argc` within it (the initial user stack pointer).
fn build_stack(stack_base: usize, argv: &[String], envp: &[String]) -> KResult<(Vec<u8>, usize)> {
	let mut buf = alloc::vec![0u8; crate::config::PAGE_SIZE];
	let mut str_off = crate::config::PAGE_SIZE;
	let mut write_str = |buf: &mut [u8], s: &str| -> KResult<usize> {
		let len = s.len() + 1;
		if len > str_off {
			return Err(errno!(E2BIG));
		}
		str_off -= len;
		buf[str_off..str_off + s.len()].copy_from_slice(s.as_bytes());
		buf[str_off + s.len()] = 0;
		Ok(str_off)
	};
	let mut argv_addrs = Vec::with_capacity(argv.len());
	for s in argv {
		argv_addrs.push(write_str(&mut buf, s)?);
	}
	let mut envp_addrs = Vec::with_capacity(envp.len());
	for s in envp {
		envp_addrs.push(write_str(&mut buf, s)?);
	}
	str_off &= !3;
	let ptrs_needed = 1 + (argv_addrs.len() + 1) + (envp_addrs.len() + 1);
	let ptrs_bytes = ptrs_needed * 4;
	if ptrs_bytes > str_off {
		return Err(errno!(E2BIG));
	}
	let argc_off = str_off - ptrs_bytes;
	let mut cursor = argc_off;
	put_u32(&mut buf, cursor, argv.len() as u32);
	cursor += 4;
	for &a in &argv_addrs {
		put_u32(&mut buf, cursor, (stack_base + a) as u32);
		cursor += 4;
	}
	put_u32(&mut buf, cursor, 0);
	cursor += 4;
	for &a in &envp_addrs {
		put_u32(&mut buf, cursor, (stack_base + a) as u32);
		cursor += 4;
	}
	put_u32(&mut buf, cursor, 0);
	Ok((buf, argc_off))
}

/// Reads a `PT_LOAD` segment's file-backed portion into freshly allocated, zeroed pages of `vm`.
fn load_segment(vm: &VMem, inode: &fs::Inode, ph: &Elf32ProgramHeader) -> KResult<()> {
	let va = VirtAddr(ph.p_vaddr as usize);
	let memsz = ph.p_memsz as usize;
	let prot = perm_from_flags(ph.p_flags);
	vm.user_alloc(va, memsz, prot)?;
	if ph.p_filesz > 0 {
		vm.user_load(va, ph.p_filesz as usize, inode, ph.p_offset as u64)?;
	}
	Ok(())
}

/// Replaces `proc`'s image with the ELF binary at `path`, per spec.md §4.6.
pub fn exec(proc: &Arc<Process>, path: &str, argv: &[String], envp: &[String]) -> KResult<ExecImage> {
	let dev = proc.dev();
	let cwd = proc.cwd.lock().clone();
	let inode = fs::fs_name_lookup(dev, &cwd, path)?;
	let size = inode.stat().size as usize;
	let mut data = alloc::vec![0u8; size];
	inode.read(0, &mut data)?;
	let header = match elf::parse_header(&data) {
		Ok(h) => h,
		Err(e) => {
			fs::inode_put(inode);
			return Err(e);
		}
	};
	let phdrs = match elf::program_headers(&data, &header) {
		Ok(p) => p,
		Err(e) => {
			fs::inode_put(inode);
			return Err(e);
		}
	};
	let vm = match VMem::new() {
		Ok(vm) => vm,
		Err(e) => {
			fs::inode_put(inode);
			return Err(e);
		}
	};
	// `vm` is owned out here, not inside the closure, so the error path below can still tear it
	// down instead of leaking its frames.
	let build_result: KResult<ExecImage> = (|| {
		let mut brk_base = 0usize;
		for ph in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
			load_segment(&vm, &inode, ph)?;
			let seg_end = (ph.p_vaddr as usize + ph.p_memsz as usize).next_multiple_of(crate::config::PAGE_SIZE);
			brk_base = brk_base.max(seg_end);
		}
		let stack_base = crate::config::KERNEL_BASE - crate::config::PAGE_SIZE;
		vm.user_alloc(
			VirtAddr(stack_base),
			crate::config::PAGE_SIZE,
			VmProt::READ | VmProt::WRITE | VmProt::USER,
		)?;
		let (image, argc_off) = build_stack(stack_base, argv, envp)?;
		vm.user_copy_out(VirtAddr(stack_base), &image)?;
		Ok(ExecImage {
			entry: VirtAddr(header.e_entry as usize),
			user_sp: VirtAddr(stack_base + argc_off),
			brk_base: VirtAddr(brk_base),
		})
	})();
	fs::inode_put(inode);
	let image = match build_result {
		Ok(image) => image,
		Err(e) => {
			vm.destroy();
			return Err(e);
		}
	};
	// Safe: `proc` is the calling task's own process, and no other task is active in either VM
	// during this wholesale swap (spec.md §5's VM ordering guarantee).
	let old_vm = unsafe { proc.vm.replace(vm) };
	old_vm.destroy();
	Ok(image)
}
