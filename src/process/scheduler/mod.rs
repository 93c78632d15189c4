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

//! Per-CPU current-task tracking and the round-robin resume point blocking
//! primitives call through (spec.md §5, §9: "Global current-task pointer...
//! replace with a per-CPU structure accessed via CPU id read from MPIDR").
//!
//! The actual register/stack swap between two tasks is an assembly
//! trampoline, which spec.md §1 places outside this core's scope alongside
//! the rest of context switching; it is reached here as the `context_switch`
//! external collaborator, the same idiom used for `disk_read`/`device_read`.

use crate::{
	config::NCPU,
	cpu,
	process::{Pid, Process, State},
	sync::spin::IntSpin,
};
use alloc::sync::Arc;

extern "C" {
	/// Saves the caller's register file onto `prev`'s kernel stack and restores `next`'s, resuming
	/// execution wherever `next` last called `context_switch` itself. Returns to this function's
	/// caller only once some later `schedule()` elsewhere switches back into `prev`.
	fn context_switch(prev: *const Process, next: *const Process);
}

/// Per-CPU "current task" slot (spec.md §9).
struct CpuSlot(IntSpin<Option<Arc<Process>>>);

static CURRENT: [CpuSlot; NCPU] = [const { CpuSlot(IntSpin::new(None)) }; NCPU];

fn this_slot() -> &'static CpuSlot {
	&CURRENT[cpu::arm::cpu_id() % NCPU]
}

/// Returns the process currently running on this CPU.
///
/// # Panics
///
/// Panics if called before [`set_current`] has installed a task for this CPU (i.e. before the
/// scheduler has taken over from the boot path).
pub fn current() -> Arc<Process> {
	this_slot()
		.0
		.lock()
		.clone()
		.expect("scheduler::current() called with no task bound to this CPU")
}

/// Binds `proc` as the task running on this CPU. Used once per CPU during boot to hand off from
/// the boot path to the scheduler, and by [`schedule`] on every switch.
pub fn set_current(proc: Arc<Process>) {
	*this_slot().0.lock() = Some(proc);
}

/// Finds the next RUNNABLE process after `after`, wrapping around the table. Returns `None` if no
/// other task is runnable, matching the teacher's own `get_next_process` round-robin shape over a
/// `BTreeMap<Pid, Arc<Process>>`.
fn next_runnable(after: Pid) -> Option<Arc<Process>> {
	let table = super::PROCESSES.lock();
	table
		.range((after + 1)..)
		.chain(table.range(..=after))
		.find(|(_, proc)| proc.state() == State::Runnable)
		.map(|(_, proc)| proc.clone())
}

/// Picks the next runnable task and switches to it, returning once this task is resumed.
///
/// Called by a blocking primitive right after moving the current task to `State::Sleeping`, or
/// voluntarily to yield the CPU. Does nothing if the current task is already the only runnable
/// one.
pub fn schedule() {
	let prev = current();
	let Some(next) = next_runnable(prev.pid()) else {
		return;
	};
	if Arc::ptr_eq(&prev, &next) {
		return;
	}
	if prev.state() == State::Running {
		prev.set_state(State::Runnable);
	}
	next.set_state(State::Running);
	set_current(next.clone());
	unsafe {
		context_switch(Arc::as_ptr(&prev), Arc::as_ptr(&next));
	}
}
