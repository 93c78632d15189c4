/*
 * Copyright 2025 Luc Lenôtre
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

//! Compile-time constants describing the platform's memory map and the
//! fixed-size resources the core manages.

/// Size in bytes of a page (and of an ARMv7 small page / L2 mapping unit).
pub const PAGE_SIZE: usize = 4096;
/// Size in bytes of an L2 translation table (256 small-page descriptors).
pub const L2_TABLE_SIZE: usize = 1024;
/// Number of L2 descriptor slots per L2 table.
pub const L2_NR_ENTRIES: usize = 256;
/// Number of L1 descriptor slots in one translation table.
pub const L1_NR_ENTRIES: usize = 4096;

/// Start of the kernel's direct-mapped region. User addresses are strictly
/// below this; any VA at or above it is rejected by every VM operation.
pub const KERNEL_BASE: usize = 0x8000_0000;
/// Size of physical RAM direct-mapped starting at `KERNEL_BASE`.
pub const PHYS_TOP: usize = 0x1000_0000;
/// Base of the exception vector page, mapped high in every address space.
pub const VECTORS_BASE: usize = 0xFFFF_0000;

/// Size in bytes of one disk block (matches the EXT2 1 KiB block size this
/// core is built against).
pub const BLOCK_SIZE: usize = 1024;
/// Number of buffers held in the buffer cache.
pub const BUF_CACHE_SIZE: usize = 64;
/// Number of inodes held in the inode cache.
pub const INODE_CACHE_SIZE: usize = 32;

/// A value one greater than the maximum file descriptor a process may hold.
pub const OPEN_MAX: usize = 32;
/// Maximum number of logical CPUs.
pub const NCPU: usize = 4;
/// Size in bytes of a pipe's ring buffer.
pub const PIPE_BUF: usize = 4096;
/// Maximum number of simultaneous processes.
pub const NPROC: usize = 64;

/// Maximum length (excluding the terminator) of a path string syscall argument.
///
/// The source scans an unbounded `vm_user_check_str` up to `KERNEL_BASE`; this core bounds the
/// scan instead, since `check_str` takes an explicit cap rather than walking until it finds
/// kernel space.
pub const PATH_MAX: usize = 255;
/// Maximum length of a single `argv`/`envp` entry accepted by `EXEC`.
pub const ARG_MAX: usize = 4096;
/// Maximum number of entries accepted in a single `argv` or `envp` array by `EXEC`.
pub const MAX_ARGS: usize = 32;
