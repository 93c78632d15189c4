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

//! PID allocation.
//!
//! Unlike the source's `IDAllocator`-backed 32768-entry bitfield (dropped along
//! with the `utils` crate it lived in), PIDs here are bounded by
//! [`config::NPROC`]: the process table can never hold more live processes
//! than that, so the PID space does not need to be any larger.

use crate::{config, errno, errno::KResult, sync::spin::IntSpin};
use core::ops::Deref;

/// A process ID.
pub type Pid = u16;

/// PID of the init process; the forest of `parent` pointers is rooted here.
pub const INIT_PID: Pid = 1;

static USED: IntSpin<[bool; config::NPROC]> = IntSpin::new([false; config::NPROC]);

/// An allocated PID, freed automatically when dropped.
#[derive(Debug)]
pub struct PidHandle(Pid);

impl PidHandle {
	/// Allocates the lowest free PID starting from [`INIT_PID`].
	pub fn unique() -> KResult<Self> {
		let mut used = USED.lock();
		let slot = used
			.iter()
			.enumerate()
			.skip(INIT_PID as usize)
			.find(|(_, used)| !**used)
			.map(|(i, _)| i)
			.ok_or_else(|| errno!(EAGAIN))?;
		used[slot] = true;
		Ok(Self(slot as Pid))
	}

	/// Marks `pid` used directly, for the init process which is not allocated through
	/// [`unique`](Self::unique).
	pub fn reserve(pid: Pid) -> Self {
		USED.lock()[pid as usize] = true;
		Self(pid)
	}
}

impl Deref for PidHandle {
	type Target = Pid;

	fn deref(&self) -> &Pid {
		&self.0
	}
}

impl Drop for PidHandle {
	fn drop(&mut self) {
		USED.lock()[self.0 as usize] = false;
	}
}
