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

//! A pipe links a reading end and a writing end through a fixed-size ring
//! buffer, with backpressure in both directions (spec.md §4.5).

use crate::{
	config,
	errno,
	errno::KResult,
	sync::{spin::IntSpin, wait_queue::WaitQueue},
};
use core::sync::atomic::{AtomicU32, Ordering};

struct Ring {
	data: [u8; config::PIPE_BUF],
	head: usize,
	tail: usize,
	len: usize,
}

/// A pipe's shared state. `readers`/`writers` count live file descriptions referencing each end;
/// a write to a pipe with no readers left, or a read past EOF (no writers left, buffer drained),
/// are the two terminal conditions callers must check for.
pub struct Pipe {
	ring: IntSpin<Ring>,
	readers: AtomicU32,
	writers: AtomicU32,
	read_wait: WaitQueue,
	write_wait: WaitQueue,
}

impl Pipe {
	pub fn new() -> Self {
		Self {
			ring: IntSpin::new(Ring {
				data: [0; config::PIPE_BUF],
				head: 0,
				tail: 0,
				len: 0,
			}),
			readers: AtomicU32::new(1),
			writers: AtomicU32::new(1),
			read_wait: WaitQueue::new(),
			write_wait: WaitQueue::new(),
		}
	}

	pub fn add_reader(&self) {
		self.readers.fetch_add(1, Ordering::Relaxed);
	}

	pub fn add_writer(&self) {
		self.writers.fetch_add(1, Ordering::Relaxed);
	}

	/// Drops one reader reference, waking writers blocked on backpressure if this was the last
	/// one (further writes should observe `EPIPE`, which is the writer's job to check).
	pub fn drop_reader(&self) {
		if self.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.write_wait.wake_all();
		}
	}

	/// Drops one writer reference, waking readers so they can observe EOF.
	pub fn drop_writer(&self) {
		if self.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.read_wait.wake_all();
		}
	}

	/// Reads up to `buf.len()` bytes, blocking while the ring is empty and writers remain.
	/// Returns `0` once the ring is empty and every writer has closed (EOF).
	pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
		self.read_wait.wait_until(|| {
			let mut ring = self.ring.lock();
			if ring.len == 0 && self.writers.load(Ordering::Acquire) > 0 {
				return None;
			}
			let n = ring.len.min(buf.len());
			for b in buf.iter_mut().take(n) {
				*b = ring.data[ring.tail];
				ring.tail = (ring.tail + 1) % config::PIPE_BUF;
			}
			ring.len -= n;
			if n > 0 {
				self.write_wait.wake_all();
			}
			Some(n)
		})
	}

	/// Writes `buf`, blocking while the ring is full and at least one reader remains. Returns
	/// `EPIPE` once every reader has closed.
	pub fn write(&self, buf: &[u8]) -> KResult<usize> {
		if self.readers.load(Ordering::Acquire) == 0 {
			return Err(errno!(EPIPE));
		}
		let mut written = 0;
		while written < buf.len() {
			if self.readers.load(Ordering::Acquire) == 0 {
				return Err(errno!(EPIPE));
			}
			let n = self.write_wait.wait_until(|| {
				let mut ring = self.ring.lock();
				let free = config::PIPE_BUF - ring.len;
				if free == 0 {
					return None;
				}
				let n = free.min(buf.len() - written);
				for &b in &buf[written..written + n] {
					ring.data[ring.head] = b;
					ring.head = (ring.head + 1) % config::PIPE_BUF;
				}
				ring.len += n;
				Some(n)
			})?;
			written += n;
			self.read_wait.wake_all();
		}
		Ok(written)
	}
}

impl Default for Pipe {
	fn default() -> Self {
		Self::new()
	}
}
