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

//! Reference-counted inode cache and path resolution (spec.md §4.4).
//!
//! The EXT2 on-disk layout — superblocks, block group descriptors, bitmap
//! allocation, indirect-block arithmetic — is an external collaborator: only
//! the inode/block API it exposes matters here (spec.md §1). That API is the
//! `ext2_*` extern block below. What *is* this module's job is everything a
//! generic EXT2 client needs on top of that API: the inode cache itself,
//! directory-entry iteration for pathwalk, and the POSIX-shaped operations
//! (`fs_create`, `fs_link`, ...) the syscall layer drives.

use crate::{
	config,
	errno,
	errno::KResult,
	file::buf,
	sync::{mutex::Mutex, spin::IntSpin},
};
use alloc::{string::String, sync::Arc};

/// Root directory inode number, fixed by the EXT2 layout.
pub const ROOT_INO: u32 = 2;

/// `st_mode` file-type bits (POSIX `S_IFMT` family).
pub const S_IFMT: u16 = 0o170000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFIFO: u16 = 0o010000;

/// On-disk EXT2 inode body (rev 0, 128 bytes), filled in by the `ext2_*` collaborator. Layout
/// matches the format verbatim since callers (this module, `stat`) read these fields directly.
#[derive(Clone, Copy, Default)]
#[repr(C)]
pub struct Ext2Inode {
	pub mode: u16,
	pub uid: u16,
	pub size: u32,
	pub atime: u32,
	pub ctime: u32,
	pub mtime: u32,
	pub dtime: u32,
	pub gid: u16,
	pub links_count: u16,
	pub blocks: u32,
	pub flags: u32,
	pub osd1: u32,
	/// 12 direct block numbers, then single/double/triple indirect.
	pub block: [u32; 15],
	pub generation: u32,
	pub file_acl: u32,
	pub dir_acl: u32,
	pub faddr: u32,
}

extern "C" {
	/// Loads inode `num` of `dev` into `out`. Returns 0 on success.
	fn ext2_inode_load(dev: u32, num: u32, out: *mut Ext2Inode) -> i32;
	/// Writes `inode` back to inode `num` of `dev`. Returns 0 on success.
	fn ext2_inode_store(dev: u32, num: u32, inode: *const Ext2Inode) -> i32;
	/// Allocates a fresh inode number on `dev` with the given mode, or 0 on exhaustion.
	fn ext2_inode_alloc(dev: u32, mode: u16) -> u32;
	/// Releases inode `num` back to the free list.
	fn ext2_inode_free(dev: u32, num: u32);
	/// Maps logical block `logical` of `inode` to a physical block number, allocating it (and any
	/// indirect blocks needed to hold the mapping) if `alloc` and currently unmapped. Returns 0 on
	/// failure or when unmapped and `!alloc`.
	fn ext2_block_map(dev: u32, inode: *const Ext2Inode, logical: u32, alloc: bool) -> u32;
}

struct InodeInner {
	valid: bool,
	disk: Ext2Inode,
}

/// A cached EXT2 inode. Fields are only safe to read once locked (spec.md §3).
///
/// The "reference count" of spec.md §3 is simply this struct's `Arc` strong count: `inode_get`
/// hands out a clone, `inode_put` drops one, and the cache treats `strong_count == 1` (only the
/// cache slot itself holding a reference) as evictable.
pub struct Inode {
	pub dev: u32,
	pub num: u32,
	inner: Mutex<InodeInner>,
}

impl Inode {
	/// Loads the on-disk body on first lock, then returns the locked, valid body.
	fn lock(&self) -> crate::sync::mutex::MutexGuard<InodeInner> {
		let mut guard = self.inner.lock();
		if !guard.valid {
			let rc = unsafe { ext2_inode_load(self.dev, self.num, &mut guard.disk) };
			assert!(rc == 0, "inode_get on a nonexistent inode");
			guard.valid = true;
		}
		guard
	}

	/// Returns a snapshot of the inode's on-disk body.
	pub fn stat(&self) -> Ext2Inode {
		self.lock().disk
	}

	pub fn is_dir(&self) -> bool {
		self.stat().mode & S_IFMT == S_IFDIR
	}

	/// Reads `buf.len()` bytes starting at file offset `off`, through the buffer cache.
	pub fn read(&self, off: u64, buf_out: &mut [u8]) -> KResult<usize> {
		let guard = self.lock();
		let size = guard.disk.size as u64;
		let disk = guard.disk;
		drop(guard);
		let mut total = 0usize;
		let mut off = off;
		while total < buf_out.len() && off < size {
			let logical = (off / config::BLOCK_SIZE as u64) as u32;
			let block_off = (off % config::BLOCK_SIZE as u64) as usize;
			let pblock = unsafe { ext2_block_map(self.dev, &disk, logical, false) };
			let chunk = (config::BLOCK_SIZE - block_off)
				.min(buf_out.len() - total)
				.min((size - off) as usize);
			if pblock == 0 {
				buf_out[total..total + chunk].fill(0);
			} else {
				let handle = buf::read(self.dev, pblock)?;
				buf_out[total..total + chunk].copy_from_slice(&handle.data()[block_off..block_off + chunk]);
			}
			total += chunk;
			off += chunk as u64;
		}
		Ok(total)
	}

	/// Writes `data` starting at file offset `off`, growing the inode's size if needed.
	pub fn write(&self, off: u64, data: &[u8]) -> KResult<usize> {
		let mut guard = self.lock();
		let mut total = 0usize;
		let mut off = off;
		while total < data.len() {
			let logical = (off / config::BLOCK_SIZE as u64) as u32;
			let block_off = (off % config::BLOCK_SIZE as u64) as usize;
			let pblock = unsafe { ext2_block_map(self.dev, &guard.disk, logical, true) };
			if pblock == 0 {
				return Err(errno!(ENOSPC));
			}
			let chunk = (config::BLOCK_SIZE - block_off).min(data.len() - total);
			let handle = buf::read(self.dev, pblock)?;
			handle.data_mut()[block_off..block_off + chunk].copy_from_slice(&data[total..total + chunk]);
			buf::write(&handle)?;
			total += chunk;
			off += chunk as u64;
		}
		if off > guard.disk.size as u64 {
			guard.disk.size = off as u32;
		}
		unsafe {
			ext2_inode_store(self.dev, self.num, &guard.disk);
		}
		Ok(total)
	}

	pub fn chmod(&self, mode: u16) {
		let mut guard = self.lock();
		guard.disk.mode = (guard.disk.mode & S_IFMT) | (mode & !S_IFMT);
		unsafe {
			ext2_inode_store(self.dev, self.num, &guard.disk);
		}
	}
}

const CACHE_LEN: usize = config::INODE_CACHE_SIZE;

struct CacheSlot {
	inode: Option<Arc<Inode>>,
}

static CACHE: IntSpin<[CacheSlot; CACHE_LEN]> = IntSpin::new([const { CacheSlot { inode: None } }; CACHE_LEN]);

/// Returns a referenced handle for `(dev, num)`, creating a cache entry (not yet loaded from
/// disk) if it is not already resident.
pub fn inode_get(dev: u32, num: u32) -> Arc<Inode> {
	let mut cache = CACHE.lock();
	for slot in cache.iter() {
		if let Some(inode) = &slot.inode {
			if inode.dev == dev && inode.num == num {
				return inode.clone();
			}
		}
	}
	let victim = cache
		.iter()
		.position(|s| s.inode.as_ref().map_or(true, |i| Arc::strong_count(i) == 1))
		.expect("inode cache exhausted: every inode is referenced");
	let fresh = Arc::new(Inode {
		dev,
		num,
		inner: Mutex::new(InodeInner {
			valid: false,
			disk: Ext2Inode::default(),
		}),
	});
	cache[victim].inode = Some(fresh.clone());
	fresh
}

/// Drops one reference to `inode`. Evicted lazily by `inode_get` once unreferenced.
pub fn inode_put(inode: Arc<Inode>) {
	drop(inode);
}

/// On-disk directory entry (variable length, padded to `rec_len`).
#[repr(C)]
struct RawDirent {
	inode: u32,
	rec_len: u16,
	name_len: u8,
	file_type: u8,
}

const DIRENT_HEADER: usize = core::mem::size_of::<RawDirent>();

/// Looks up `name` as a direct child of directory inode `dir`.
fn dir_lookup(dir: &Inode, name: &str) -> KResult<u32> {
	if !dir.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	let size = dir.stat().size as u64;
	let mut block = [0u8; config::BLOCK_SIZE];
	let mut off = 0u64;
	while off < size {
		let n = dir.read(off, &mut block)?;
		let mut pos = 0usize;
		while pos + DIRENT_HEADER <= n {
			let ent = unsafe { &*(block.as_ptr().add(pos) as *const RawDirent) };
			if ent.rec_len == 0 {
				break;
			}
			if ent.inode != 0 {
				let name_bytes = &block[pos + DIRENT_HEADER..pos + DIRENT_HEADER + ent.name_len as usize];
				if name_bytes == name.as_bytes() {
					return Ok(ent.inode);
				}
			}
			pos += ent.rec_len as usize;
		}
		off += n as u64;
	}
	Err(errno!(ENOENT))
}

/// Appends a `(name, inum, file_type)` entry to directory `dir`.
fn dir_add(dir: &Inode, name: &str, inum: u32, file_type: u8) -> KResult<()> {
	let rec_len = (DIRENT_HEADER + name.len()).next_multiple_of(4) as u16;
	let mut rec = alloc::vec![0u8; rec_len as usize];
	unsafe {
		let hdr = &mut *(rec.as_mut_ptr() as *mut RawDirent);
		hdr.inode = inum;
		hdr.rec_len = rec_len;
		hdr.name_len = name.len() as u8;
		hdr.file_type = file_type;
	}
	rec[DIRENT_HEADER..DIRENT_HEADER + name.len()].copy_from_slice(name.as_bytes());
	let off = dir.stat().size as u64;
	dir.write(off, &rec)?;
	Ok(())
}

/// Removes the entry named `name` from directory `dir` by zeroing its inode field in place
/// (leaves a tombstone, matching the classic EXT2 unlink-in-directory approach).
fn dir_remove(dir: &Inode, name: &str) -> KResult<()> {
	let size = dir.stat().size as u64;
	let mut block = [0u8; config::BLOCK_SIZE];
	let mut off = 0u64;
	while off < size {
		let n = dir.read(off, &mut block)?;
		let mut pos = 0usize;
		while pos + DIRENT_HEADER <= n {
			let ent_inode = u32::from_ne_bytes(block[pos..pos + 4].try_into().unwrap());
			let rec_len = u16::from_ne_bytes(block[pos + 4..pos + 6].try_into().unwrap());
			let name_len = block[pos + 6] as usize;
			if rec_len == 0 {
				break;
			}
			if ent_inode != 0 && &block[pos + DIRENT_HEADER..pos + DIRENT_HEADER + name_len] == name.as_bytes() {
				block[pos..pos + 4].fill(0);
				dir.write(off, &block[..n])?;
				return Ok(());
			}
			pos += rec_len as usize;
		}
		off += n as u64;
	}
	Err(errno!(ENOENT))
}

/// Resolves `path` against `cwd`, following "." and ".." but no symlinks (non-goal).
pub fn fs_name_lookup(dev: u32, cwd: &Arc<Inode>, path: &str) -> KResult<Arc<Inode>> {
	let mut cur = if path.starts_with('/') {
		inode_get(dev, ROOT_INO)
	} else {
		cwd.clone()
	};
	for component in path.split('/').filter(|c| !c.is_empty()) {
		if component == "." {
			continue;
		}
		let num = dir_lookup(&cur, component)?;
		let next = inode_get(dev, num);
		inode_put(cur);
		cur = next;
	}
	Ok(cur)
}

/// Splits `path` into (parent directory path, final component), resolving the parent.
fn split_parent(dev: u32, cwd: &Arc<Inode>, path: &str) -> KResult<(Arc<Inode>, String)> {
	let (parent_path, name) = match path.rfind('/') {
		Some(i) => (&path[..=i], &path[i + 1..]),
		None => ("", path),
	};
	if name.is_empty() {
		return Err(errno!(EINVAL));
	}
	let parent = if parent_path.is_empty() {
		cwd.clone()
	} else {
		fs_name_lookup(dev, cwd, parent_path)?
	};
	Ok((parent, String::from(name)))
}

/// Creates a new inode named `path` with `mode` (and `dev_id` for device nodes), per `mknod`.
pub fn fs_create(dev: u32, cwd: &Arc<Inode>, path: &str, mode: u16, dev_id: u32) -> KResult<Arc<Inode>> {
	let (parent, name) = split_parent(dev, cwd, path)?;
	if dir_lookup(&parent, &name).is_ok() {
		return Err(errno!(EEXIST));
	}
	let num = unsafe { ext2_inode_alloc(dev, mode) };
	if num == 0 {
		return Err(errno!(ENOSPC));
	}
	let inode = inode_get(dev, num);
	{
		let mut guard = inode.lock();
		guard.disk.mode = mode;
		guard.disk.links_count = 1;
		if mode & S_IFMT == S_IFBLK || mode & S_IFMT == S_IFCHR {
			guard.disk.osd1 = dev_id;
		}
		unsafe {
			ext2_inode_store(dev, num, &guard.disk);
		}
	}
	let file_type = ((mode & S_IFMT) >> 12) as u8;
	dir_add(&parent, &name, num, file_type)?;
	inode_put(parent);
	Ok(inode)
}

/// Links `existing` into the directory tree as `path` (refuses directories, per POSIX `link`).
pub fn fs_link(dev: u32, cwd: &Arc<Inode>, existing: &Arc<Inode>, path: &str) -> KResult<()> {
	if existing.is_dir() {
		return Err(errno!(EPERM));
	}
	let (parent, name) = split_parent(dev, cwd, path)?;
	if dir_lookup(&parent, &name).is_ok() {
		inode_put(parent);
		return Err(errno!(EEXIST));
	}
	let file_type = ((existing.stat().mode & S_IFMT) >> 12) as u8;
	dir_add(&parent, &name, existing.num, file_type)?;
	{
		let mut guard = existing.lock();
		guard.disk.links_count += 1;
		unsafe {
			ext2_inode_store(existing.dev, existing.num, &guard.disk);
		}
	}
	inode_put(parent);
	Ok(())
}

/// Removes the directory entry `path`, dropping the target's link count (and freeing the inode
/// once it reaches zero).
pub fn fs_unlink(dev: u32, cwd: &Arc<Inode>, path: &str) -> KResult<()> {
	let (parent, name) = split_parent(dev, cwd, path)?;
	let num = match dir_lookup(&parent, &name) {
		Ok(n) => n,
		Err(e) => {
			inode_put(parent);
			return Err(e);
		}
	};
	let target = inode_get(dev, num);
	if target.is_dir() {
		inode_put(target);
		inode_put(parent);
		return Err(errno!(EISDIR));
	}
	dir_remove(&parent, &name)?;
	let links = {
		let mut guard = target.lock();
		guard.disk.links_count = guard.disk.links_count.saturating_sub(1);
		unsafe {
			ext2_inode_store(dev, num, &guard.disk);
		}
		guard.disk.links_count
	};
	if links == 0 {
		unsafe {
			ext2_inode_free(dev, num);
		}
	}
	inode_put(target);
	inode_put(parent);
	Ok(())
}

/// Counts non-tombstone entries in a directory beyond "." and "..".
fn dir_is_empty(dir: &Inode) -> KResult<bool> {
	let size = dir.stat().size as u64;
	let mut block = [0u8; config::BLOCK_SIZE];
	let mut off = 0u64;
	while off < size {
		let n = dir.read(off, &mut block)?;
		let mut pos = 0usize;
		while pos + DIRENT_HEADER <= n {
			let ent_inode = u32::from_ne_bytes(block[pos..pos + 4].try_into().unwrap());
			let rec_len = u16::from_ne_bytes(block[pos + 4..pos + 6].try_into().unwrap());
			let name_len = block[pos + 6] as usize;
			if rec_len == 0 {
				break;
			}
			if ent_inode != 0 {
				let name = &block[pos + DIRENT_HEADER..pos + DIRENT_HEADER + name_len];
				if name != b"." && name != b".." {
					return Ok(false);
				}
			}
			pos += rec_len as usize;
		}
		off += n as u64;
	}
	Ok(true)
}

/// Removes empty directory `path` (`ENOTEMPTY` otherwise).
pub fn fs_rmdir(dev: u32, cwd: &Arc<Inode>, path: &str) -> KResult<()> {
	let (parent, name) = split_parent(dev, cwd, path)?;
	let num = match dir_lookup(&parent, &name) {
		Ok(n) => n,
		Err(e) => {
			inode_put(parent);
			return Err(e);
		}
	};
	let target = inode_get(dev, num);
	if !target.is_dir() {
		inode_put(target);
		inode_put(parent);
		return Err(errno!(ENOTDIR));
	}
	if !dir_is_empty(&target)? {
		inode_put(target);
		inode_put(parent);
		return Err(errno!(ENOTEMPTY));
	}
	dir_remove(&parent, &name)?;
	unsafe {
		ext2_inode_free(dev, num);
	}
	inode_put(target);
	inode_put(parent);
	Ok(())
}

/// Resolves `path` to an inode suitable for use as a new current working directory (must exist
/// and be a directory).
pub fn fs_chdir(dev: u32, cwd: &Arc<Inode>, path: &str) -> KResult<Arc<Inode>> {
	let inode = fs_name_lookup(dev, cwd, path)?;
	if !inode.is_dir() {
		inode_put(inode);
		return Err(errno!(ENOTDIR));
	}
	Ok(inode)
}

/// Changes the permission bits of `path`.
pub fn fs_chmod(dev: u32, cwd: &Arc<Inode>, path: &str, mode: u16) -> KResult<()> {
	let inode = fs_name_lookup(dev, cwd, path)?;
	inode.chmod(mode);
	inode_put(inode);
	Ok(())
}
