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

//! This module implements kernel panics handling.
//!
//! A kernel panic occurs when an error is raised that the kernel cannot recover
//! from. This is an undesirable state which requires to reboot the host
//! machine.

use crate::{cpu::arm::cpsid_i, logger::LOGGER, println};
use core::{arch::asm, panic::PanicInfo};

/// Stops the current CPU for good, in an interrupt-masked wait loop.
///
/// This is the terminal state reached after a panic: there is no supervisor
/// to restart the kernel, so the only correct move left is to stop fetching.
pub fn halt() -> ! {
	cpsid_i();
	loop {
		unsafe {
			asm!("wfi", options(nomem, nostack, preserves_flags));
		}
	}
}

/// Called on Rust panic.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
	cpsid_i();
	LOGGER.lock().silent = false;
	println!("-- KERNEL PANIC! --");
	if let Some(loc) = info.location() {
		println!("Reason: {} Location: {loc}", info.message());
	} else {
		println!("Reason: {}", info.message());
	}
	println!("-- end trace --");
	halt();
}
