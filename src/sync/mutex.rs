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

//! Sleeping mutual exclusion synchronization primitive.
//!
//! Contrary to a spinlock, [`Mutex`] makes the current task sleep while waiting, reducing CPU
//! cycles waste. This is the "sleep-lock" spec.md refers to for per-buffer and per-inode
//! serialization (§4.3, §4.4) and the mutex re-expression of the source's sleeplock + wait-queue
//! pair (§9).

use crate::sync::wait_queue::WaitQueue;
use core::{
	cell::UnsafeCell,
	fmt,
	fmt::Formatter,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering},
};

/// Unlocks the associated [`Mutex`] when dropped.
pub struct MutexGuard<'m, T: ?Sized> {
	mutex: &'m Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		unsafe { &*self.mutex.data.get() }
	}
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		unsafe { &mut *self.mutex.data.get() }
	}
}

impl<T: ?Sized> !Send for MutexGuard<'_, T> {}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self.deref(), f)
	}
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
	fn drop(&mut self) {
		unsafe {
			self.mutex.unlock();
		}
	}
}

/// Sleeping mutex: a mutual exclusion primitive whose waiter blocks by
/// yielding to the scheduler rather than spinning.
pub struct Mutex<T: ?Sized> {
	locked: AtomicBool,
	queue: WaitQueue,
	data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
	/// Creates a new instance wrapping the given `data`.
	pub const fn new(data: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			queue: WaitQueue::new(),
			data: UnsafeCell::new(data),
		}
	}

	/// Consumes the mutex and returns the inner value.
	pub fn into_inner(self) -> T {
		self.data.into_inner()
	}
}

impl<T: Default> Default for Mutex<T> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<T: ?Sized> Mutex<T> {
	/// Acquires the mutex.
	///
	/// If already held, the calling task sleeps on the mutex's wait queue until
	/// the holder releases it.
	pub fn lock(&self) -> MutexGuard<T> {
		loop {
			if self
				.locked
				.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
				.is_ok()
			{
				return MutexGuard { mutex: self };
			}
			// May race with the unlocker's wake_next; if so the loop just retries
			// after being scheduled again.
			let _ = self.queue.wait();
		}
	}

	/// Releases the mutex, waking up the next process waiting on it, if any.
	///
	/// # Safety
	///
	/// Must only be called once, by the current holder, when the guard is dropped.
	pub unsafe fn unlock(&self) {
		self.locked.store(false, Ordering::Release);
		self.queue.wake_next();
	}
}

unsafe impl<T: ?Sized> Sync for Mutex<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let guard = self.lock();
		fmt::Debug::fmt(&*guard, f)
	}
}
