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

//! Per-process file descriptor table, fixed at `OPEN_MAX` entries (spec.md §3).

use crate::{config, errno, errno::KResult, file::open_file::OpenFile};
use alloc::sync::Arc;

/// A process's file descriptor table. Shared copy-style duplicated wholesale on `fork` (each
/// entry's `Arc` is cloned, bumping the underlying `OpenFile`'s reference count).
#[derive(Default)]
pub struct FdTable {
	entries: [Option<Arc<OpenFile>>; config::OPEN_MAX],
}

impl FdTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs `file` at the lowest unused descriptor, per `open`'s contract.
	pub fn alloc(&mut self, file: Arc<OpenFile>) -> KResult<i32> {
		let slot = self
			.entries
			.iter()
			.position(Option::is_none)
			.ok_or_else(|| errno!(EMFILE))?;
		self.entries[slot] = Some(file);
		Ok(slot as i32)
	}

	/// Installs `file` at a specific descriptor, replacing (closing) whatever was there.
	pub fn set(&mut self, fd: i32, file: Arc<OpenFile>) -> KResult<()> {
		let slot = self.slot(fd)?;
		self.entries[slot] = Some(file);
		Ok(())
	}

	pub fn get(&self, fd: i32) -> KResult<Arc<OpenFile>> {
		let slot = self.slot(fd)?;
		self.entries[slot].clone().ok_or_else(|| errno!(EBADF))
	}

	pub fn close(&mut self, fd: i32) -> KResult<()> {
		let slot = self.slot(fd)?;
		self.entries[slot].take().ok_or_else(|| errno!(EBADF))?;
		Ok(())
	}

	/// Clones every live entry for a forked child (bumps each `OpenFile`'s ref count).
	pub fn dup_all(&self) -> Self {
		Self {
			entries: core::array::from_fn(|i| self.entries[i].clone()),
		}
	}

	fn slot(&self, fd: i32) -> KResult<usize> {
		if fd < 0 || fd as usize >= config::OPEN_MAX {
			return Err(errno!(EBADF));
		}
		Ok(fd as usize)
	}
}
