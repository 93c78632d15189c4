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

//! POSIX `S_IRWXU`/`S_IRWXG`/`S_IRWXO` access checks against a process's credentials.

bitflags::bitflags! {
	/// The access kind being requested of `check`.
	#[derive(Clone, Copy)]
	pub struct Access: u8 {
		const READ = 0b100;
		const WRITE = 0b010;
		const EXEC = 0b001;
	}
}

/// Returns whether a process with `(uid, gid)` may access an entity owned by
/// `(owner_uid, owner_gid)` with mode bits `mode` (lowest 9 bits, `rwxrwxrwx`), for `want`.
pub fn check(mode: u16, owner_uid: u16, owner_gid: u16, uid: u16, gid: u16, want: Access) -> bool {
	// uid 0 bypasses all checks, matching root semantics.
	if uid == 0 {
		return true;
	}
	let shift = if uid == owner_uid {
		6
	} else if gid == owner_gid {
		3
	} else {
		0
	};
	let bits = (mode >> shift) & 0o7;
	(bits as u8) & want.bits() == want.bits()
}
