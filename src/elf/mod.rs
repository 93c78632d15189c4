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

//! 32-bit little-endian ELF parsing: just enough to load `PT_LOAD` segments
//! for `execve` (spec.md §6). Dynamic linking, kernel module relocation and
//! the 64-bit header variants the source supported have no counterpart on
//! this platform and are not implemented.

use crate::{errno, errno::KResult};
use alloc::vec::Vec;

pub const EI_NIDENT: usize = 16;
pub const EI_CLASS: usize = 4;
pub const EI_DATA: usize = 5;

pub const ELFCLASS32: u8 = 1;
pub const ELFDATA2LSB: u8 = 1;

pub const ET_EXEC: u16 = 2;
/// Required architecture: ARM.
pub const EM_ARM: u16 = 40;

pub const PT_LOAD: u32 = 1;

/// Segment flag: execute.
pub const PF_X: u32 = 0x1;
/// Segment flag: write.
pub const PF_W: u32 = 0x2;
/// Segment flag: read.
pub const PF_R: u32 = 0x4;

/// 32-bit ELF file header.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Elf32Header {
	pub e_ident: [u8; EI_NIDENT],
	pub e_type: u16,
	pub e_machine: u16,
	pub e_version: u32,
	pub e_entry: u32,
	pub e_phoff: u32,
	pub e_shoff: u32,
	pub e_flags: u32,
	pub e_ehsize: u16,
	pub e_phentsize: u16,
	pub e_phnum: u16,
	pub e_shentsize: u16,
	pub e_shnum: u16,
	pub e_shstrndx: u16,
}

/// 32-bit ELF program header.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Elf32ProgramHeader {
	pub p_type: u32,
	pub p_offset: u32,
	pub p_vaddr: u32,
	pub p_paddr: u32,
	pub p_filesz: u32,
	pub p_memsz: u32,
	pub p_flags: u32,
	pub p_align: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<Elf32Header>();
const PHDR_SIZE: usize = core::mem::size_of::<Elf32ProgramHeader>();

/// Reads an `Elf32Header` out of `data`, rejecting anything that is not a 32-bit
/// little-endian ARM executable.
pub fn parse_header(data: &[u8]) -> KResult<Elf32Header> {
	if data.len() < HEADER_SIZE || &data[0..4] != b"\x7fELF" {
		return Err(errno!(ENOEXEC));
	}
	if data[EI_CLASS] != ELFCLASS32 || data[EI_DATA] != ELFDATA2LSB {
		return Err(errno!(ENOEXEC));
	}
	// SAFETY: `Elf32Header` is `repr(C)`, plain-old-data, and `data` is at least
	// `HEADER_SIZE` bytes, just checked above.
	let header = unsafe { (data.as_ptr() as *const Elf32Header).read_unaligned() };
	if header.e_type != ET_EXEC || header.e_machine != EM_ARM {
		return Err(errno!(ENOEXEC));
	}
	Ok(header)
}

/// Reads every program header named by `header` out of `data`.
pub fn program_headers(data: &[u8], header: &Elf32Header) -> KResult<Vec<Elf32ProgramHeader>> {
	let off = header.e_phoff as usize;
	let count = header.e_phnum as usize;
	let end = off
		.checked_add(count.checked_mul(PHDR_SIZE).ok_or_else(|| errno!(ENOEXEC))?)
		.ok_or_else(|| errno!(ENOEXEC))?;
	if header.e_phentsize as usize != PHDR_SIZE || end > data.len() {
		return Err(errno!(ENOEXEC));
	}
	let mut out = Vec::with_capacity(count);
	for i in 0..count {
		let p = off + i * PHDR_SIZE;
		// SAFETY: `p + PHDR_SIZE <= data.len()`, checked via `end` above.
		let phdr = unsafe { (data.as_ptr().add(p) as *const Elf32ProgramHeader).read_unaligned() };
		out.push(phdr);
	}
	Ok(out)
}
