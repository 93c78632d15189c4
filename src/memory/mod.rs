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

//! The memory is one of the main components of the system.
//!
//! This module handles physical page allocation (`buddy`), the kernel heap
//! (`alloc`) and per-process virtual memory (`vmem`).
//!
//! The system's memory is divided in two halves:
//! - Userspace: virtual memory below `KERNEL_BASE`, private to the currently running process.
//! - Kernelspace: virtual memory at and above `KERNEL_BASE`, direct-mapped and shared by every
//!   address space.

use crate::config;
use core::{fmt, mem::size_of, ops::{Add, Deref, DerefMut, Sub}, ptr, ptr::NonNull};

pub mod alloc;
pub mod buddy;
pub mod vmem;

pub use config::PAGE_SIZE;

/// Address of the start of the kernel's direct-mapped region; also the first invalid user
/// address (spec.md §4.2: "All addresses ≥ KERNEL_BASE are rejected").
pub const KERNEL_BASE: VirtAddr = VirtAddr(config::KERNEL_BASE);

/// An address in physical memory.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
	/// Converts a physical address in the direct-mapped region to a virtual address.
	pub fn to_virt(self) -> VirtAddr {
		VirtAddr(self.0.wrapping_add(config::KERNEL_BASE))
	}
}

/// An address in virtual memory.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(pub usize);

impl<T> From<*const T> for VirtAddr {
	fn from(ptr: *const T) -> Self {
		Self(ptr as usize)
	}
}

impl<T> From<*mut T> for VirtAddr {
	fn from(ptr: *mut T) -> Self {
		Self(ptr as usize)
	}
}

impl<T> From<NonNull<T>> for VirtAddr {
	fn from(ptr: NonNull<T>) -> Self {
		Self(ptr.as_ptr() as usize)
	}
}

impl VirtAddr {
	/// Converts a kernel virtual address in the direct-mapped region to a physical address.
	pub fn to_phys(self) -> PhysAddr {
		PhysAddr(self.0.wrapping_sub(config::KERNEL_BASE))
	}

	/// Returns whether this address belongs to the user half of the address space.
	pub fn is_user(self) -> bool {
		self.0 < config::KERNEL_BASE
	}

	/// Returns a raw pointer for this address.
	pub fn as_ptr<T>(self) -> *mut T {
		self.0 as *mut T
	}
}

macro_rules! addr_impl {
	($name:ident) => {
		impl $name {
			/// Tells whether the address is null.
			pub fn is_null(self) -> bool {
				self.0 == 0
			}

			/// Rounds down to the nearest multiple of `align`.
			pub fn down_align_to(self, align: usize) -> Self {
				Self(self.0 & !(align - 1))
			}

			/// Rounds up to the nearest multiple of `align`.
			pub fn align_to(self, align: usize) -> Self {
				Self(self.0.next_multiple_of(align))
			}
		}

		impl Deref for $name {
			type Target = usize;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}

		impl DerefMut for $name {
			fn deref_mut(&mut self) -> &mut Self::Target {
				&mut self.0
			}
		}

		impl Add<usize> for $name {
			type Output = Self;

			fn add(self, off: usize) -> Self::Output {
				Self(self.0.wrapping_add(off))
			}
		}

		impl Sub<usize> for $name {
			type Output = Self;

			fn sub(self, off: usize) -> Self::Output {
				Self(self.0.wrapping_sub(off))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
				const LEN: usize = size_of::<usize>() * 2;
				write!(fmt, "{:0LEN$x}", self.0)
			}
		}
	};
}

addr_impl!(PhysAddr);
addr_impl!(VirtAddr);
