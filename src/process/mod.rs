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

//! The process/task model: the `Process` struct, the process table, and
//! `fork`/`exec`/`wait`/`exit` (spec.md §3, §4.6).
//!
//! A process owns exactly one VM, one fixed-size fd table, credentials, a
//! parent back-reference and child list, a cwd inode reference, a state, and
//! a wait channel it sleeps on for its own `wait()` calls. Scheduling and the
//! actual register/stack switch live in [`scheduler`]; they are the
//! "scheduler glue" spec.md §2 separates out from the process model itself.

pub mod exec;
pub mod pid;
pub mod scheduler;

pub use pid::{INIT_PID, Pid, PidHandle};

use crate::{
	errno,
	errno::KResult,
	file::{fd::FdTable, fs::Inode},
	memory::vmem::VMem,
	sync::{spin::IntSpin, wait_queue::WaitQueue},
};
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::cell::UnsafeCell;

/// A process's run state (spec.md §3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
	/// Ready to run but not currently assigned to a CPU.
	Runnable,
	/// Currently executing on some CPU.
	Running,
	/// Blocked on a wait channel.
	Sleeping,
	/// Exited; retains its pid and exit status until reaped by `wait`.
	Zombie,
}

/// uid/gid/umask a process acts under (spec.md §3).
#[derive(Clone, Copy, Debug)]
pub struct Credentials {
	pub uid: u16,
	pub gid: u16,
	pub umask: u16,
}

impl Default for Credentials {
	fn default() -> Self {
		Self {
			uid: 0,
			gid: 0,
			umask: 0o022,
		}
	}
}

/// Holds a process's [`VMem`] for single-writer replacement by `exec`.
///
/// Per spec.md §5's VM ordering guarantee, operations on one VM are either performed only by the
/// task that owns it, or (for `clone`/`destroy`, and the wholesale replacement `exec` does) while
/// no user-mode thread is active in that VM. True concurrent access to one process's VM therefore
/// never happens, so this is a plain `UnsafeCell` rather than a lock: wrapping `vm.get()` in a
/// sleep-lock guard would risk holding it across a nested sleep-lock acquisition inside
/// `user_load` (`Inode::read` → `buf::read`), which spec.md §5 forbids outright. Modeled on
/// [`crate::sync::once::OnceInit`], which makes the same single-writer argument for the boot-time
/// case.
pub struct VmSlot(UnsafeCell<VMem>);

impl VmSlot {
	fn new(vm: VMem) -> Self {
		Self(UnsafeCell::new(vm))
	}

	/// Borrows the current address space. Only valid while called by the owning task.
	pub fn get(&self) -> &VMem {
		unsafe { &*self.0.get() }
	}

	/// Replaces the address space wholesale, returning the old one, for `exec`.
	///
	/// # Safety
	///
	/// The caller must be the process's own task, and no other task may be concurrently active in
	/// either the old or new VM.
	pub unsafe fn replace(&self, vm: VMem) -> VMem {
		unsafe { core::mem::replace(&mut *self.0.get(), vm) }
	}
}

unsafe impl Sync for VmSlot {}

/// Fields mutated together under one lock: state, parentage, and exit status.
struct Inner {
	state: State,
	parent: Option<Pid>,
	children: Vec<Pid>,
	exit_status: i32,
}

/// A process (spec.md §3).
pub struct Process {
	pid: PidHandle,
	/// The EXT2 device this process's filesystem references (cwd, open inodes) belong to. A
	/// single mounted device is all spec.md's filesystem model supports.
	dev: u32,
	/// The process's address space.
	pub vm: VmSlot,
	/// Open file descriptions, indexed by fd.
	pub fd_table: IntSpin<FdTable>,
	/// Current working directory.
	pub cwd: IntSpin<Arc<Inode>>,
	/// uid/gid/umask.
	pub cred: IntSpin<Credentials>,
	/// Channel the process's own `wait()` calls block on, signalled when a child becomes ZOMBIE.
	pub wait_queue: WaitQueue,
	/// Current end of the heap (the `SBRK` break), reset to the loaded image's `brk_base` by every
	/// successful `exec`.
	pub brk: IntSpin<usize>,
	inner: IntSpin<Inner>,
}

/// The process table, indexed by pid. Protected by a single global spinlock on mutating
/// operations, per spec.md §5's "shared resources" rule.
pub(crate) static PROCESSES: IntSpin<BTreeMap<Pid, Arc<Process>>> = IntSpin::new(BTreeMap::new());

impl Process {
	pub fn pid(&self) -> Pid {
		*self.pid
	}

	pub fn dev(&self) -> u32 {
		self.dev
	}

	pub fn state(&self) -> State {
		self.inner.lock().state
	}

	pub(crate) fn set_state(&self, state: State) {
		self.inner.lock().state = state;
	}

	pub fn parent(&self) -> Option<Pid> {
		self.inner.lock().parent
	}

	/// Creates the init process (pid 1), the root of the parent forest. Called once during boot.
	pub fn new_init(dev: u32, root: Arc<Inode>) -> KResult<Arc<Process>> {
		let proc = Arc::new(Self {
			pid: PidHandle::reserve(INIT_PID),
			dev,
			vm: VmSlot::new(VMem::new()?),
			fd_table: IntSpin::new(FdTable::new()),
			cwd: IntSpin::new(root),
			cred: IntSpin::new(Credentials::default()),
			wait_queue: WaitQueue::new(),
			brk: IntSpin::new(0),
			inner: IntSpin::new(Inner {
				state: State::Runnable,
				parent: None,
				children: Vec::new(),
				exit_status: 0,
			}),
		});
		PROCESSES.lock().insert(INIT_PID, proc.clone());
		Ok(proc)
	}
}

/// `fork`: clones `parent`'s VM via COW, dups its fd table and cwd, and registers the child under
/// a freshly allocated pid (spec.md §4.6). Returns the child's pid.
///
/// The differing `fork` return value observed in parent versus child (child pid vs. 0) is a
/// property of the two tasks' distinct trap frames, which belongs to the syscall dispatcher that
/// drives the actual duplicated resumption, not to this function.
pub fn process_copy(parent: &Arc<Process>) -> KResult<Pid> {
	let pid = PidHandle::unique()?;
	let child_pid = *pid;
	let vm = parent.vm.get().clone()?;
	let fd_table = parent.fd_table.lock().dup_all();
	let cwd = parent.cwd.lock().clone();
	let cred = *parent.cred.lock();
	let brk = *parent.brk.lock();
	let child = Arc::new(Process {
		pid,
		dev: parent.dev,
		vm: VmSlot::new(vm),
		fd_table: IntSpin::new(fd_table),
		cwd: IntSpin::new(cwd),
		cred: IntSpin::new(cred),
		wait_queue: WaitQueue::new(),
		brk: IntSpin::new(brk),
		inner: IntSpin::new(Inner {
			state: State::Runnable,
			parent: Some(parent.pid()),
			children: Vec::new(),
			exit_status: 0,
		}),
	});
	parent.inner.lock().children.push(child_pid);
	PROCESSES.lock().insert(child_pid, child);
	Ok(child_pid)
}

/// `wait`: harvests a ZOMBIE child's exit status and pid, freeing its process-table slot, or
/// sleeps on `parent`'s wait channel until one becomes available (spec.md §4.6). Returns
/// `ECHILD` immediately if `parent` has no children left to wait for.
pub fn process_wait(parent: &Arc<Process>) -> KResult<(Pid, i32)> {
	parent.wait_queue.wait_until(|| {
		let children = parent.inner.lock().children.clone();
		if children.is_empty() {
			return Some(Err(errno!(ECHILD)));
		}
		let table = PROCESSES.lock();
		let found = children.iter().copied().find_map(|pid| {
			table
				.get(&pid)
				.filter(|c| c.state() == State::Zombie)
				.map(|c| (pid, c.inner.lock().exit_status))
		});
		drop(table);
		found.map(|(pid, status)| {
			parent.inner.lock().children.retain(|&c| c != pid);
			PROCESSES.lock().remove(&pid);
			Ok((pid, status))
		})
	})?
}

/// `exit`: moves `proc` to ZOMBIE, reassigns its children to init, wakes its parent, and parks it
/// on the scheduler forever (spec.md §4.6). Never returns.
pub fn process_destroy(proc: &Arc<Process>, status: i32) -> ! {
	// Release the address space now: nothing will ever run in it again, and the process-table
	// entry may outlive this call until the parent reaps it (spec.md §3, vm_destroy).
	proc.vm.get().destroy();
	let (parent_pid, children) = {
		let mut inner = proc.inner.lock();
		inner.state = State::Zombie;
		inner.exit_status = status;
		(inner.parent, core::mem::take(&mut inner.children))
	};
	{
		let table = PROCESSES.lock();
		if let Some(init) = table.get(&INIT_PID) {
			for pid in children {
				if let Some(child) = table.get(&pid) {
					child.inner.lock().parent = Some(INIT_PID);
				}
				init.inner.lock().children.push(pid);
			}
		}
	}
	if let Some(parent_pid) = parent_pid {
		if let Some(parent) = PROCESSES.lock().get(&parent_pid) {
			parent.wait_queue.wake_all();
		}
	}
	loop {
		scheduler::schedule();
	}
}

/// Returns the process currently running on this CPU.
pub fn current() -> Arc<Process> {
	scheduler::current()
}

/// Returns the pid of the process currently running on this CPU.
pub fn current_pid() -> Pid {
	current().pid()
}

/// Moves the current process to `state`. Used by [`crate::sync::wait_queue::WaitQueue`] to put
/// the calling task to sleep before it yields to the scheduler.
pub fn set_state(state: State) {
	current().set_state(state);
}

/// Whether `pid` has a signal pending it should be woken early to observe.
///
/// Always `false`: this core implements no signal delivery (spec.md §5, "Cancellation: none —
/// blocking primitives are non-interruptible in the current core").
pub fn has_pending_signal(_pid: Pid) -> bool {
	false
}

/// Moves `pid`'s process to RUNNABLE, if it still exists.
pub fn wake(pid: Pid) {
	if let Some(proc) = PROCESSES.lock().get(&pid) {
		proc.set_state(State::Runnable);
	}
}
