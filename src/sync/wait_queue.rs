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

//! Opaque identifier on which tasks block and are awoken by `wakeup`, as
//! described in spec.md's glossary ("Wait channel").
//!
//! The source threads waiters through an intrusive list embedded in each
//! task. That list lived in the `utils` crate, which was not retrieved with
//! this repository, so waiters here are tracked as a plain `Vec<Pid>` behind
//! the queue's spinlock instead — same wait/wake semantics, a simpler
//! container.

use crate::{
	errno,
	errno::KResult,
	process,
	process::{Pid, State, scheduler::schedule},
	sync::spin::IntSpin,
};
use alloc::vec::Vec;
use core::{fmt, fmt::Formatter};

/// Queue of processes waiting on a resource.
///
/// While waiting, the process is turned to the `Sleeping` state.
pub struct WaitQueue(IntSpin<Vec<Pid>>);

impl Default for WaitQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl WaitQueue {
	/// Creates a new empty queue.
	pub const fn new() -> Self {
		Self(IntSpin::new(Vec::new()))
	}

	/// Makes the current process wait (sleep) until woken up.
	///
	/// If the process has been interrupted while waiting, the function returns `EINTR`.
	pub fn wait(&self) -> KResult<()> {
		let pid = process::current_pid();
		self.0.lock().push(pid);
		process::set_state(State::Sleeping);
		// Switch context; resumes here once woken or preempted back in.
		schedule();
		self.0.lock().retain(|p| *p != pid);
		if process::has_pending_signal(pid) {
			return Err(errno!(EINTR));
		}
		Ok(())
	}

	/// Makes the current process wait until the given closure returns `Some`.
	pub fn wait_until<F: FnMut() -> Option<T>, T>(&self, mut f: F) -> KResult<T> {
		loop {
			if let Some(val) = f() {
				break Ok(val);
			}
			self.wait()?;
		}
	}

	/// Wakes the next process in queue, if any.
	pub fn wake_next(&self) {
		let next = {
			let mut queue = self.0.lock();
			if queue.is_empty() { None } else { Some(queue.remove(0)) }
		};
		if let Some(pid) = next {
			process::wake(pid);
		}
	}

	/// Wakes all processes in queue.
	pub fn wake_all(&self) {
		let waiters = core::mem::take(&mut *self.0.lock());
		for pid in waiters {
			process::wake(pid);
		}
	}
}

unsafe impl Sync for WaitQueue {}

impl fmt::Debug for WaitQueue {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str("WaitQueue")
	}
}
