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

//! File subsystem: buffer cache, inode cache and pathwalk, the per-process
//! file descriptor table, and the file object layer tying them together
//! (spec.md §4.3, §4.4, §4.5).
//!
//! The on-disk layout (superblocks, bitmaps, indirect block arithmetic) is an
//! external collaborator reached through `fs`'s `ext2_*` hooks; only the
//! inode/block API it exposes is relevant here.

pub mod buf;
pub mod fd;
pub mod fs;
pub mod open_file;
pub mod perm;
pub mod pipe;

pub use fd::FdTable;
pub use fs::Inode;
pub use open_file::OpenFile;
