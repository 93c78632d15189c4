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

//! Open file descriptions: a tagged variant over {regular inode, directory,
//! pipe, device} referenced by file descriptors (spec.md §4.5).

use crate::{
	errno,
	errno::KResult,
	file::{
		fs,
		fs::{Ext2Inode, Inode, S_IFMT},
		pipe::Pipe,
	},
	sync::spin::IntSpin,
};
use alloc::{collections::BTreeMap, sync::{Arc, Weak}};

/// `O_*` open flags (spec.md §6).
pub const O_RDONLY: u32 = 1;
pub const O_WRONLY: u32 = 2;
pub const O_RDWR: u32 = 3;
pub const O_APPEND: u32 = 4;
pub const O_CREAT: u32 = 8;
pub const O_EXCL: u32 = 16;
pub const O_NOCTTY: u32 = 32;
pub const O_NONBLOCK: u32 = 64;
pub const O_TRUNC: u32 = 128;

extern "C" {
	/// Reads from character/block device `devid` (an external collaborator: UART console, RTC,
	/// MMC/SD). Returns the number of bytes read, or a negative errno.
	fn device_read(devid: u32, buf: *mut u8, len: usize) -> isize;
	/// Writes to character/block device `devid`. Returns the number of bytes written, or a
	/// negative errno.
	fn device_write(devid: u32, buf: *const u8, len: usize) -> isize;
}

/// POSIX `stat` fields exposed by the `STAT` syscall.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct Stat {
	pub st_ino: u32,
	pub st_mode: u16,
	pub st_nlink: u16,
	pub st_uid: u16,
	pub st_gid: u16,
	pub st_size: u32,
	pub st_atime: u32,
	pub st_mtime: u32,
	pub st_ctime: u32,
}

impl From<(u32, Ext2Inode)> for Stat {
	fn from((ino, disk): (u32, Ext2Inode)) -> Self {
		Self {
			st_ino: ino,
			st_mode: disk.mode,
			st_nlink: disk.links_count,
			st_uid: disk.uid,
			st_gid: disk.gid,
			st_size: disk.size,
			st_atime: disk.atime,
			st_mtime: disk.mtime,
			st_ctime: disk.ctime,
		}
	}
}

/// What kind of object a file descriptor actually refers to.
pub enum FileVariant {
	Regular(Arc<Inode>),
	Directory(Arc<Inode>),
	Pipe(Arc<Pipe>),
	Device(u32),
}

/// An open file description. Shared by `dup`/`fork`; the underlying resource is released only
/// when the last `Arc` is dropped.
pub struct OpenFile {
	pub variant: FileVariant,
	flags: u32,
	offset: IntSpin<u64>,
}

/// Registry of FIFOs currently open, keyed by `(dev, inode number)` so that every opener of the
/// same named pipe shares one ring buffer.
static FIFOS: IntSpin<BTreeMap<(u32, u32), Weak<Pipe>>> = IntSpin::new(BTreeMap::new());

fn fifo_for(dev: u32, inode: &Inode, writer: bool) -> Arc<Pipe> {
	let key = (dev, inode.num);
	let mut table = FIFOS.lock();
	if let Some(existing) = table.get(&key).and_then(Weak::upgrade) {
		if writer {
			existing.add_writer();
		} else {
			existing.add_reader();
		}
		return existing;
	}
	let fresh = Arc::new(Pipe::new());
	table.insert(key, Arc::downgrade(&fresh));
	fresh
}

/// Resolves or creates the inode named by `path` (respecting `O_CREAT`/`O_EXCL`/`O_TRUNC`) and
/// returns a fresh `OpenFile` with offset 0.
pub fn file_open(
	dev: u32,
	cwd: &Arc<Inode>,
	path: &str,
	oflag: u32,
	mode: u16,
) -> KResult<Arc<OpenFile>> {
	let lookup = fs::fs_name_lookup(dev, cwd, path);
	let inode = match lookup {
		Ok(inode) => {
			if oflag & O_CREAT != 0 && oflag & O_EXCL != 0 {
				fs::inode_put(inode);
				return Err(errno!(EEXIST));
			}
			inode
		}
		Err(e) if e == errno!(ENOENT) && oflag & O_CREAT != 0 => {
			fs::fs_create(dev, cwd, path, fs::S_IFREG | (mode & 0o7777), 0)?
		}
		Err(e) => return Err(e),
	};
	let file_mode = inode.stat().mode;
	if oflag & O_TRUNC != 0 && file_mode & S_IFMT == fs::S_IFREG {
		inode.write(0, &[])?;
	}
	let variant = match file_mode & S_IFMT {
		fs::S_IFDIR => FileVariant::Directory(inode),
		fs::S_IFIFO => {
			let writer = oflag & (O_WRONLY | O_RDWR) != 0;
			let pipe = fifo_for(dev, &inode, writer);
			fs::inode_put(inode);
			FileVariant::Pipe(pipe)
		}
		fs::S_IFCHR | fs::S_IFBLK => {
			let devid = inode.stat().osd1;
			fs::inode_put(inode);
			FileVariant::Device(devid)
		}
		_ => FileVariant::Regular(inode),
	};
	Ok(Arc::new(OpenFile {
		variant,
		flags: oflag,
		offset: IntSpin::new(0),
	}))
}

impl OpenFile {
	pub fn stat(&self) -> KResult<Stat> {
		match &self.variant {
			FileVariant::Regular(inode) | FileVariant::Directory(inode) => {
				Ok(Stat::from((inode.num, inode.stat())))
			}
			_ => Err(errno!(EINVAL)),
		}
	}

	/// Reads into `buf`, advancing the offset for inode-backed variants.
	pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
		match &self.variant {
			FileVariant::Regular(inode) | FileVariant::Directory(inode) => {
				let mut off = self.offset.lock();
				let n = inode.read(*off, buf)?;
				*off += n as u64;
				Ok(n)
			}
			FileVariant::Pipe(pipe) => pipe.read(buf),
			FileVariant::Device(devid) => {
				let rc = unsafe { device_read(*devid, buf.as_mut_ptr(), buf.len()) };
				if rc < 0 {
					Err(-(rc as i32))
				} else {
					Ok(rc as usize)
				}
			}
		}
	}

	/// Writes `buf`, advancing the offset for inode-backed variants (seeking to the end first
	/// when the file was opened with `O_APPEND`).
	pub fn write(&self, buf: &[u8]) -> KResult<usize> {
		match &self.variant {
			FileVariant::Regular(inode) | FileVariant::Directory(inode) => {
				let mut off = self.offset.lock();
				if self.flags & O_APPEND != 0 {
					*off = inode.stat().size as u64;
				}
				let n = inode.write(*off, buf)?;
				*off += n as u64;
				Ok(n)
			}
			FileVariant::Pipe(pipe) => pipe.write(buf),
			FileVariant::Device(devid) => {
				let rc = unsafe { device_write(*devid, buf.as_ptr(), buf.len()) };
				if rc < 0 {
					Err(-(rc as i32))
				} else {
					Ok(rc as usize)
				}
			}
		}
	}
}

impl Drop for OpenFile {
	fn drop(&mut self) {
		match &self.variant {
			FileVariant::Pipe(pipe) => {
				if self.flags & (O_WRONLY | O_RDWR) != 0 {
					pipe.drop_writer();
				} else {
					pipe.drop_reader();
				}
			}
			// The `Arc<Inode>` inside `FileVariant` is released by the field drop that follows
			// this body; the inode cache only cares about the strong count.
			FileVariant::Regular(_) | FileVariant::Directory(_) => {}
			FileVariant::Device(_) => {}
		}
	}
}
