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

//! Fixed-size LRU cache of disk blocks, keyed by `(dev, blockno)` (spec.md §4.3).
//!
//! The block device itself (MMC/SD driver) is an external collaborator,
//! reached through the `disk_read`/`disk_write` hooks below — same shape as
//! `logger.rs`'s `console_write`.

use crate::{
	config,
	errno,
	errno::KResult,
	sync::{mutex::Mutex, spin::IntSpin},
};
use alloc::sync::Arc;
use core::{cell::UnsafeCell, sync::atomic::{AtomicU32, Ordering}};

extern "C" {
	/// Reads block `blockno` of `dev` into `buf` (exactly [`config::BLOCK_SIZE`] bytes).
	/// Returns 0 on success.
	fn disk_read(dev: u32, blockno: u32, buf: *mut u8) -> i32;
	/// Writes [`config::BLOCK_SIZE`] bytes from `buf` to block `blockno` of `dev`. Returns 0 on
	/// success.
	fn disk_write(dev: u32, blockno: u32, buf: *const u8) -> i32;
}

bitflags::bitflags! {
	#[derive(Clone, Copy, Default, Eq, PartialEq)]
	struct BufStatus: u32 {
		/// Buffer content reflects the on-disk block.
		const VALID = 0b01;
		/// Buffer content has been written since it was last VALID from disk.
		const DIRTY = 0b10;
	}
}

/// A single cached disk block.
pub struct Buf {
	dev: u32,
	blockno: u32,
	status: IntSpin<BufStatus>,
	/// Serializes access to one buffer's content; the "sleep-lock" of spec.md §4.3.
	lock: Mutex<()>,
	data: UnsafeCell<[u8; config::BLOCK_SIZE]>,
}

// SAFETY: `data` is only accessed while `lock` is held.
unsafe impl Sync for Buf {}

impl Buf {
	/// Returns the buffer's content. The caller must hold `self.lock`.
	pub fn data(&self) -> &[u8; config::BLOCK_SIZE] {
		unsafe { &*self.data.get() }
	}

	/// Returns the buffer's content, mutably. The caller must hold `self.lock`.
	#[allow(clippy::mut_from_ref)]
	pub fn data_mut(&self) -> &mut [u8; config::BLOCK_SIZE] {
		unsafe { &mut *self.data.get() }
	}

	pub fn blockno(&self) -> u32 {
		self.blockno
	}
}

struct CacheEntry {
	buf: Option<Arc<Buf>>,
	/// Sequence number bumped on every access; lowest value among unreferenced entries is
	/// evicted first (LRU).
	last_use: u64,
}

struct Cache {
	entries: [CacheEntry; config::BUF_CACHE_SIZE],
	clock: u64,
}

static CACHE: IntSpin<Cache> = IntSpin::new(Cache {
	entries: [const {
		CacheEntry {
			buf: None,
			last_use: 0,
		}
	}; config::BUF_CACHE_SIZE],
	clock: 0,
});

/// Finds `(dev, blockno)` in the cache, or evicts the least-recently-used unreferenced slot for
/// it. Returns a handle that is referenced but not yet guaranteed `VALID`.
fn get(dev: u32, blockno: u32) -> Arc<Buf> {
	let mut cache = CACHE.lock();
	cache.clock += 1;
	let now = cache.clock;
	for entry in &mut cache.entries {
		if let Some(buf) = &entry.buf {
			if buf.dev == dev && buf.blockno == blockno {
				entry.last_use = now;
				return buf.clone();
			}
		}
	}
	// Not resident: find a free slot, else evict the oldest unreferenced one.
	let victim = cache
		.entries
		.iter_mut()
		.enumerate()
		.filter(|(_, e)| e.buf.as_ref().map_or(true, |b| Arc::strong_count(b) == 1))
		.min_by_key(|(_, e)| if e.buf.is_none() { 0 } else { e.last_use })
		.map(|(i, _)| i)
		.expect("buffer cache exhausted: every buffer is referenced");
	let fresh = Arc::new(Buf {
		dev,
		blockno,
		status: IntSpin::new(BufStatus::empty()),
		lock: Mutex::new(()),
		data: UnsafeCell::new([0; config::BLOCK_SIZE]),
	});
	cache.entries[victim].buf = Some(fresh.clone());
	cache.entries[victim].last_use = now;
	fresh
}

/// A referenced buffer whose sleep-lock is held, released on drop (`buf_release` of spec.md
/// §4.3).
pub struct BufHandle(Arc<Buf>);

impl core::ops::Deref for BufHandle {
	type Target = Buf;

	fn deref(&self) -> &Buf {
		&self.0
	}
}

impl Drop for BufHandle {
	fn drop(&mut self) {
		// SAFETY: this handle is the sole holder of the lock acquired in `read`.
		unsafe {
			self.0.lock.unlock();
		}
	}
}

/// Returns a referenced, locked buffer for `(dev, blockno)` whose content is guaranteed `VALID`.
pub fn read(dev: u32, blockno: u32) -> KResult<BufHandle> {
	let buf = get(dev, blockno);
	// The typed guard only exists to auto-unlock on drop; `BufHandle` takes over that duty so
	// the lock can outlive this stack frame without a self-referential struct.
	core::mem::forget(buf.lock.lock());
	if !buf.status.lock().contains(BufStatus::VALID) {
		let rc = unsafe { disk_read(dev, blockno, buf.data_mut().as_mut_ptr()) };
		if rc != 0 {
			unsafe {
				buf.lock.unlock();
			}
			return Err(errno!(EIO));
		}
		buf.status.lock().insert(BufStatus::VALID);
	}
	Ok(BufHandle(buf))
}

/// Marks `buf` dirty and writes it through to disk, clearing `DIRTY` on success. The caller must
/// already hold the buffer's lock.
pub fn write(buf: &Buf) -> KResult<()> {
	buf.status.lock().insert(BufStatus::DIRTY);
	let rc = unsafe { disk_write(buf.dev, buf.blockno, buf.data().as_ptr()) };
	if rc != 0 {
		return Err(errno!(EIO));
	}
	buf.status.lock().remove(BufStatus::DIRTY);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn cache_reuses_resident_buffer() {
		let a = get(0, 5);
		let b = get(0, 5);
		assert!(Arc::ptr_eq(&a, &b));
	}
}
